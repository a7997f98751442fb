//! Outbound email subsystem: a single [`EmailProvider`] capability behind
//! three interchangeable transports (console, SMTP, transactional-API),
//! wrapped in a suppression gate, retry with backoff, and a circuit breaker.

pub mod circuit_breaker;
pub mod console;
pub mod message;
pub mod pool;
pub mod provider;
pub mod retry;
pub mod ses;
pub mod smtp_provider;
pub mod suppression;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use console::ConsoleProvider;
pub use message::{
    EmailAttachment, EmailMessage, EmailMessageBuilder, EmailPriority, EmailResult, MessageError,
};
pub use pool::{PoolError, SmtpConnectionPool, SmtpPoolConfig, SmtpTransportConfig};
pub use provider::{EmailProvider, TransportError};
pub use retry::{with_retry, RetryConfig, Retryable};
pub use ses::{TransactionalApiConfig, TransactionalProvider};
pub use smtp_provider::{default_retry_config, SmtpProvider};
pub use suppression::{suppressed_recipients, InMemorySuppressionList, SuppressionList};
