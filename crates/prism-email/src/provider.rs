//! The `EmailProvider` capability (§4.10): one interface behind which the
//! console, SMTP, and transactional-API (SES-style) implementations sit.

use async_trait::async_trait;

use crate::message::{EmailMessage, EmailResult};
use crate::retry::Retryable;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("tls negotiation failed: {0}")]
    Tls(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("server rejected the message: {0}")]
    Rejected(String),
}

impl Retryable for TransportError {
    /// Only connectivity-shaped failures are retried; auth and rejection are
    /// treated as permanent, matching the "expected exception" class carved
    /// out for the retry wrapper and circuit breaker in §4.12.
    fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Tls(_))
    }
}

/// Capability every email provider implements. `send` must never propagate
/// an error to the caller -- every failure mode is folded into a
/// `success = false` [`EmailResult`] (§4.10).
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Human-readable provider name, stamped onto every [`EmailResult`].
    fn name(&self) -> &str;

    async fn send(&self, message: &EmailMessage) -> EmailResult;

    /// Send many messages. The default sequential implementation is the one
    /// used unless a provider overrides it with a genuinely concurrent path.
    async fn send_bulk(&self, messages: &[EmailMessage]) -> Vec<EmailResult> {
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            results.push(self.send(message).await);
        }
        results
    }

    async fn verify_configuration(&self) -> bool;
}
