//! Email value types: [`EmailMessage`], [`EmailResult`], priority, and
//! attachments (§3 "Email types").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relative urgency of an outbound email. Providers may use this to pick a
/// transport queue or SES configuration set; it has no effect on validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailPriority {
    Low,
    Normal,
    High,
}

impl Default for EmailPriority {
    fn default() -> Self {
        EmailPriority::Normal
    }
}

/// A single email attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub content_id: Option<String>,
    pub is_inline: bool,
}

impl EmailAttachment {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        EmailAttachment {
            filename: filename.into(),
            content,
            content_type: "application/octet-stream".to_owned(),
            content_id: None,
            is_inline: false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("at least one recipient is required")]
    NoRecipients,
    #[error("subject is required")]
    MissingSubject,
    #[error("either html_body or text_body is required")]
    MissingBody,
}

/// An outbound email, validated at construction time.
///
/// Every address field is case-folded and trimmed on build, matching the
/// source's `EmailMessage.__post_init__` normalization.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub headers: HashMap<String, String>,
    pub attachments: Vec<EmailAttachment>,
    pub priority: EmailPriority,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// Builds an [`EmailMessage`], enforcing the §3 invariant (recipient,
/// subject, and at least one body part) on [`EmailMessageBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct EmailMessageBuilder {
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    subject: Option<String>,
    html_body: Option<String>,
    text_body: Option<String>,
    from_email: Option<String>,
    from_name: Option<String>,
    reply_to: Option<String>,
    headers: HashMap<String, String>,
    attachments: Vec<EmailAttachment>,
    priority: EmailPriority,
    tags: Vec<String>,
    metadata: HashMap<String, String>,
}

fn fold(address: &str) -> String {
    address.trim().to_lowercase()
}

impl EmailMessageBuilder {
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(fold(&address.into()));
        self
    }

    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(fold(&address.into()));
        self
    }

    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(fold(&address.into()));
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    pub fn from(mut self, email: impl Into<String>, name: Option<String>) -> Self {
        self.from_email = Some(fold(&email.into()));
        self.from_name = name;
        self
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(fold(&address.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn attachment(mut self, attachment: EmailAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn priority(mut self, priority: EmailPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<EmailMessage, MessageError> {
        if self.to.is_empty() {
            return Err(MessageError::NoRecipients);
        }
        let subject = self.subject.ok_or(MessageError::MissingSubject)?;
        if subject.is_empty() {
            return Err(MessageError::MissingSubject);
        }
        if self.html_body.is_none() && self.text_body.is_none() {
            return Err(MessageError::MissingBody);
        }

        Ok(EmailMessage {
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            subject,
            html_body: self.html_body,
            text_body: self.text_body,
            from_email: self.from_email,
            from_name: self.from_name,
            reply_to: self.reply_to,
            headers: self.headers,
            attachments: self.attachments,
            priority: self.priority,
            tags: self.tags,
            metadata: self.metadata,
        })
    }
}

impl EmailMessage {
    pub fn builder() -> EmailMessageBuilder {
        EmailMessageBuilder::default()
    }

    /// Every recipient across `to`, `cc`, and `bcc`.
    pub fn all_recipients(&self) -> Vec<String> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .cloned()
            .collect()
    }

    /// A copy of this message with every address in `excluded` dropped from
    /// `to`/`cc`/`bcc` (§4.10: suppressed recipients are dropped, not the
    /// whole send -- only "every recipient suppressed" aborts the send).
    pub fn without_recipients(&self, excluded: &[String]) -> EmailMessage {
        let keep = |addrs: &[String]| -> Vec<String> {
            addrs.iter().filter(|a| !excluded.contains(a)).cloned().collect()
        };
        EmailMessage {
            to: keep(&self.to),
            cc: keep(&self.cc),
            bcc: keep(&self.bcc),
            ..self.clone()
        }
    }
}

/// Outcome of a single `send` call. Never constructed from a panic or an
/// uncaught exception -- every provider failure mode maps to a populated
/// `error`/`error_code` pair on a `success = false` result.
#[derive(Debug, Clone)]
pub struct EmailResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub provider: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    pub retry_after: Option<std::time::Duration>,
}

impl EmailResult {
    pub fn success(provider: impl Into<String>, message_id: impl Into<String>) -> Self {
        EmailResult {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
            error_code: None,
            provider: provider.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            retry_after: None,
        }
    }

    pub fn failure(provider: impl Into<String>, error: impl Into<String>) -> Self {
        EmailResult {
            success: false,
            message_id: None,
            error: Some(error.into()),
            error_code: None,
            provider: provider.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            retry_after: None,
        }
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_at_least_one_recipient() {
        let result = EmailMessage::builder().subject("hi").text_body("hi").build();
        assert_eq!(result.unwrap_err(), MessageError::NoRecipients);
    }

    #[test]
    fn builder_requires_a_body() {
        let result = EmailMessage::builder()
            .to("user@example.com")
            .subject("hi")
            .build();
        assert_eq!(result.unwrap_err(), MessageError::MissingBody);
    }

    #[test]
    fn builder_case_folds_and_trims_addresses() {
        let msg = EmailMessage::builder()
            .to("  User@Example.COM ")
            .subject("hi")
            .text_body("hi")
            .build()
            .unwrap();
        assert_eq!(msg.to, vec!["user@example.com"]);
    }

    #[test]
    fn without_recipients_drops_only_the_named_addresses() {
        let msg = EmailMessage::builder()
            .to("a@example.com")
            .to("b@example.com")
            .cc("c@example.com")
            .subject("hi")
            .text_body("hi")
            .build()
            .unwrap();
        let filtered = msg.without_recipients(&["b@example.com".to_owned()]);
        assert_eq!(filtered.to, vec!["a@example.com"]);
        assert_eq!(filtered.cc, vec!["c@example.com"]);
    }

    #[test]
    fn all_recipients_combines_to_cc_and_bcc() {
        let msg = EmailMessage::builder()
            .to("a@example.com")
            .cc("b@example.com")
            .bcc("c@example.com")
            .subject("hi")
            .text_body("hi")
            .build()
            .unwrap();
        assert_eq!(
            msg.all_recipients(),
            vec!["a@example.com", "b@example.com", "c@example.com"]
        );
    }
}
