//! SMTP email provider: pool + retry + circuit breaker + MIME construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mail_builder::MessageBuilder;
use mail_send::smtp::message::IntoMessage;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::message::{EmailMessage, EmailResult};
use crate::pool::{SmtpConnectionPool, SmtpPoolConfig, SmtpTransportConfig};
use crate::provider::{EmailProvider, TransportError};
use crate::retry::{with_retry, RetryConfig};
use crate::suppression::{suppressed_recipients, SuppressionList};

pub struct SmtpProvider {
    pool: Arc<SmtpConnectionPool>,
    retry: RetryConfig,
    breaker: CircuitBreaker,
    suppression: Arc<dyn SuppressionList>,
    from_email: String,
}

impl SmtpProvider {
    pub fn new(
        transport: SmtpTransportConfig,
        pool_config: SmtpPoolConfig,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
        suppression: Arc<dyn SuppressionList>,
        from_email: impl Into<String>,
    ) -> Self {
        SmtpProvider {
            pool: Arc::new(SmtpConnectionPool::new(pool_config, transport)),
            retry,
            breaker: CircuitBreaker::new(breaker),
            suppression,
            from_email: from_email.into(),
        }
    }

    fn build_mime<'a>(
        &self,
        message: &'a EmailMessage,
    ) -> mail_send::Result<mail_send::smtp::message::Message<'a>> {
        let from_email = message.from_email.as_deref().unwrap_or(&self.from_email);
        let mut builder = MessageBuilder::new();
        builder = match &message.from_name {
            Some(name) => builder.from((name.as_str(), from_email)),
            None => builder.from(from_email),
        };
        builder = builder.to(message.to.iter().map(String::as_str).collect::<Vec<_>>());
        if !message.cc.is_empty() {
            builder = builder.cc(message.cc.iter().map(String::as_str).collect::<Vec<_>>());
        }
        if !message.bcc.is_empty() {
            builder = builder.bcc(message.bcc.iter().map(String::as_str).collect::<Vec<_>>());
        }
        builder = builder.subject(message.subject.as_str());
        if let Some(html) = &message.html_body {
            builder = builder.html_body(html.as_str());
        }
        if let Some(text) = &message.text_body {
            builder = builder.text_body(text.as_str());
        }
        if let Some(reply_to) = &message.reply_to {
            builder = builder.reply_to(reply_to.as_str());
        }
        builder.into_message()
    }

    async fn send_once(&self, message: &EmailMessage) -> Result<String, TransportError> {
        let mime = self
            .build_mime(message)
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        let handle = self.pool.acquire().await.map_err(|e| match e {
            crate::pool::PoolError::Closed => TransportError::Network("pool closed".to_owned()),
            crate::pool::PoolError::PoolExhausted => {
                TransportError::Network("pool exhausted".to_owned())
            }
            crate::pool::PoolError::Connect(e) => TransportError::Network(e),
        })?;

        let result = self.pool.send(&handle, mime).await;
        self.pool.release(handle).await;

        result
            .map(|()| uuid::Uuid::new_v4().to_string())
            .map_err(classify_send_error)
    }
}

fn classify_send_error(err: mail_send::Error) -> TransportError {
    match err {
        mail_send::Error::Io(_) | mail_send::Error::Timeout => {
            TransportError::Network(err.to_string())
        }
        mail_send::Error::Tls(_) | mail_send::Error::InvalidTLSName => {
            TransportError::Tls(err.to_string())
        }
        mail_send::Error::Auth(_)
        | mail_send::Error::AuthenticationFailed(_)
        | mail_send::Error::MissingCredentials
        | mail_send::Error::UnsupportedAuthMechanism => TransportError::Auth(err.to_string()),
        _ => TransportError::Rejected(err.to_string()),
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, message: &EmailMessage) -> EmailResult {
        let recipients = message.all_recipients();
        let suppressed = suppressed_recipients(self.suppression.as_ref(), &recipients).await;
        if !suppressed.is_empty() && suppressed.len() == recipients.len() {
            return EmailResult::failure(self.name(), "recipients suppressed")
                .with_metadata("suppressed", suppressed.join(","));
        }
        let filtered = if suppressed.is_empty() {
            None
        } else {
            Some(message.without_recipients(&suppressed))
        };
        let message = filtered.as_ref().unwrap_or(message);

        let retry = self.retry;
        let outcome = self
            .breaker
            .call(|| async { with_retry(&retry, || self.send_once(message)).await })
            .await;

        match outcome {
            Ok(message_id) => EmailResult::success(self.name(), message_id),
            Err(CircuitBreakerError::CircuitOpen) => {
                EmailResult::failure(self.name(), "circuit breaker open")
                    .with_error_code("CircuitOpen")
            }
            Err(CircuitBreakerError::Inner(e)) => {
                EmailResult::failure(self.name(), e.to_string()).with_error_code(match e {
                    TransportError::Network(_) => "Network",
                    TransportError::Tls(_) => "Tls",
                    TransportError::Auth(_) => "Auth",
                    TransportError::Rejected(_) => "Rejected",
                })
            }
        }
    }

    async fn verify_configuration(&self) -> bool {
        self.pool.acquire().await.is_ok()
    }
}

pub fn default_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        exponential_base: 2.0,
        jitter: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suppression::InMemorySuppressionList;

    #[tokio::test]
    async fn all_recipients_suppressed_skips_transport() {
        let suppression = Arc::new(InMemorySuppressionList::new());
        suppression.suppress("blocked@example.com");

        let provider = SmtpProvider::new(
            SmtpTransportConfig {
                host: "127.0.0.1".to_owned(),
                port: 1,
                username: None,
                password: None,
                use_tls: false,
                use_ssl: false,
            },
            SmtpPoolConfig::default(),
            default_retry_config(),
            CircuitBreakerConfig::default(),
            suppression,
            "noreply@example.com",
        );

        let message = EmailMessage::builder()
            .to("blocked@example.com")
            .subject("hi")
            .text_body("hi")
            .build()
            .unwrap();

        let result = provider.send(&message).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("recipients suppressed"));
    }
}
