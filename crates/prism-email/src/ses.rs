//! Transactional-API email provider (SES-style): a single async HTTP call
//! per send, gated by the suppression list, with an API-error -> user-facing
//! message table (§4.10).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::{EmailMessage, EmailResult};
use crate::provider::EmailProvider;
use crate::suppression::{suppressed_recipients, SuppressionList};

/// Maps a provider error code to a message safe to show a user (§7 -- no
/// internal paths or stack traces in user-visible text).
fn user_message(error_code: &str, raw_message: &str) -> String {
    let table: HashMap<&str, &str> = HashMap::from([
        ("MessageRejected", "Email was rejected. Please check the content."),
        ("MailFromDomainNotVerified", "Sender domain is not verified."),
        ("ConfigurationSetDoesNotExist", "Email configuration set not found."),
        ("AccountSendingPausedException", "Email sending is paused for this account."),
        ("SendingQuotaExceeded", "Daily email sending limit reached."),
        ("MaxSendingRateExceeded", "Sending emails too quickly. Please slow down."),
    ]);
    table
        .get(error_code)
        .map(|m| (*m).to_owned())
        .unwrap_or_else(|| format!("email provider error: {raw_message}"))
}

#[derive(Debug, Clone)]
pub struct TransactionalApiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub configuration_set: Option<String>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    cc: &'a [String],
    bcc: &'a [String],
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html_body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    configuration_set: Option<&'a str>,
}

#[derive(Deserialize)]
struct SendResponse {
    message_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
}

/// A transactional email API reached over HTTP (SES, Postmark, SendGrid, and
/// similar services all fit this shape). Auth is a bearer API key.
pub struct TransactionalProvider {
    client: reqwest::Client,
    config: TransactionalApiConfig,
    suppression: Arc<dyn SuppressionList>,
    from_email: String,
}

impl TransactionalProvider {
    pub fn new(
        config: TransactionalApiConfig,
        suppression: Arc<dyn SuppressionList>,
        from_email: impl Into<String>,
    ) -> Self {
        TransactionalProvider {
            client: reqwest::Client::new(),
            config,
            suppression,
            from_email: from_email.into(),
        }
    }
}

#[async_trait]
impl EmailProvider for TransactionalProvider {
    fn name(&self) -> &str {
        "transactional-api"
    }

    async fn send(&self, message: &EmailMessage) -> EmailResult {
        let recipients = message.all_recipients();
        let suppressed = suppressed_recipients(self.suppression.as_ref(), &recipients).await;
        if !suppressed.is_empty() && suppressed.len() == recipients.len() {
            return EmailResult::failure(self.name(), "recipients suppressed");
        }
        let filtered = if suppressed.is_empty() {
            None
        } else {
            Some(message.without_recipients(&suppressed))
        };
        let message = filtered.as_ref().unwrap_or(message);

        let from_email = message.from_email.as_deref().unwrap_or(&self.from_email);
        let body = SendRequest {
            from: from_email,
            to: &message.to,
            cc: &message.cc,
            bcc: &message.bcc,
            subject: &message.subject,
            html_body: message.html_body.as_deref(),
            text_body: message.text_body.as_deref(),
            reply_to: message.reply_to.as_deref(),
            configuration_set: self.config.configuration_set.as_deref(),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return EmailResult::failure(self.name(), e.to_string()),
        };

        let status = response.status();
        let parsed: Result<SendResponse, _> = response.json().await;
        let parsed = match parsed {
            Ok(p) => p,
            Err(e) => return EmailResult::failure(self.name(), e.to_string()),
        };

        if !status.is_success() {
            let code = parsed.error_code.unwrap_or_else(|| "Unknown".to_owned());
            let raw = parsed.error_message.unwrap_or_default();
            return EmailResult::failure(self.name(), user_message(&code, &raw)).with_error_code(code);
        }

        EmailResult::success(
            self.name(),
            parsed.message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        )
    }

    async fn verify_configuration(&self) -> bool {
        !self.config.endpoint.is_empty() && !self.config.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_error_code_maps_to_friendly_message() {
        assert_eq!(
            user_message("SendingQuotaExceeded", "raw"),
            "Daily email sending limit reached."
        );
    }

    #[test]
    fn unknown_error_code_falls_back_to_raw_message() {
        assert_eq!(user_message("Weird", "boom"), "email provider error: boom");
    }
}
