//! Structural and semantic validation of [`RegisterMessage`] payloads.
//!
//! Validation runs in two stages: a cheap structural check (handled mostly
//! by `serde` via [`RegisterMessage`]'s `deny_unknown_fields`, plus the
//! version/type discriminants here), followed by the semantic checks this
//! module owns -- hostname shape, timestamp parseability, and a security
//! scan across every string field.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::message::{RegisterMessage, PROTOCOL_VERSION};

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Hostnames that are accepted but flagged for a warning-level log line.
pub const RESERVED_HOSTNAMES: &[&str] = &[
    "localhost",
    "broadcasthost",
    "local",
    "localdomain",
    "example",
    "test",
    "invalid",
    "onion",
    "exit",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),
    #[error("invalid message type: {0}")]
    InvalidType(String),
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("message failed security scan: {0}")]
    SecurityViolation(String),
    #[error("malformed registration message: {0}")]
    Malformed(String),
}

/// A `REGISTER` message that has passed every structural and semantic check.
#[derive(Debug, Clone)]
pub struct ValidatedRegistration {
    /// Canonical, sanitized form -- this is what gets stored.
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    pub auth_token: Option<String>,
    /// True if the sanitized hostname is in [`RESERVED_HOSTNAMES`].
    pub is_reserved: bool,
}

/// Run structural then semantic validation over a raw decoded JSON value.
pub fn validate_register(value: &Value) -> Result<ValidatedRegistration, ValidationError> {
    let msg: RegisterMessage = serde_json::from_value(value.clone())
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    validate_register_message(&msg)
}

/// Run semantic validation over an already-structurally-parsed message.
pub fn validate_register_message(
    msg: &RegisterMessage,
) -> Result<ValidatedRegistration, ValidationError> {
    if msg.version != PROTOCOL_VERSION {
        return Err(ValidationError::UnsupportedVersion(msg.version.clone()));
    }
    if msg.message_type != "registration" {
        return Err(ValidationError::InvalidType(msg.message_type.clone()));
    }

    security_scan(&msg.hostname)?;
    security_scan(&msg.timestamp)?;
    if let Some(token) = &msg.auth_token {
        security_scan(token)?;
    }

    validate_hostname_shape(&msg.hostname)?;
    let sanitized = sanitize_hostname(&msg.hostname);
    let is_reserved = RESERVED_HOSTNAMES.contains(&sanitized.as_str());

    let timestamp = parse_timestamp(&msg.timestamp)?;

    Ok(ValidatedRegistration {
        hostname: sanitized,
        timestamp,
        auth_token: msg.auth_token.clone(),
        is_reserved,
    })
}

/// RFC-1123-ish shape check: length, label count/length, character set.
fn validate_hostname_shape(hostname: &str) -> Result<(), ValidationError> {
    if hostname.is_empty() {
        return Err(ValidationError::InvalidHostname(
            "hostname must be non-empty".to_owned(),
        ));
    }
    if hostname.len() > MAX_HOSTNAME_LEN {
        return Err(ValidationError::InvalidHostname(format!(
            "hostname too long: {} > {MAX_HOSTNAME_LEN} characters",
            hostname.len()
        )));
    }
    if hostname.starts_with('.') || hostname.ends_with('.') {
        return Err(ValidationError::InvalidHostname(
            "hostname cannot start or end with a dot".to_owned(),
        ));
    }
    if hostname.contains("..") {
        return Err(ValidationError::InvalidHostname(
            "hostname cannot contain consecutive dots".to_owned(),
        ));
    }

    for label in hostname.split('.') {
        if label.is_empty() {
            return Err(ValidationError::InvalidHostname(
                "hostname labels cannot be empty".to_owned(),
            ));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(ValidationError::InvalidHostname(format!(
                "label '{label}' too long: {} > {MAX_LABEL_LEN} characters",
                label.len()
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(ValidationError::InvalidHostname(format!(
                "label cannot start or end with a hyphen: '{label}'"
            )));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ValidationError::InvalidHostname(format!(
                "label contains invalid characters: '{label}'"
            )));
        }
    }

    Ok(())
}

/// Lowercase, trim, collapse `..`, strip leading/trailing `.` and `-`.
///
/// Informational only -- shape validity was already established by
/// [`validate_hostname_shape`]; this just picks the canonical stored form.
pub fn sanitize_hostname(hostname: &str) -> String {
    let mut sanitized = hostname.to_lowercase();
    sanitized = sanitized.trim().to_owned();
    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", ".");
    }
    sanitized = sanitized.trim_matches(|c| c == '.' || c == '-').to_owned();
    if sanitized.len() > MAX_HOSTNAME_LEN {
        sanitized.truncate(MAX_HOSTNAME_LEN);
    }
    sanitized
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ValidationError::InvalidTimestamp(format!("{raw}: {e}")))
}

fn event_handler_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)on[a-z]+\s*=").expect("valid regex"))
}

/// Reject strings carrying script injection, URL-scheme, control-character,
/// or path-traversal payloads.
fn security_scan(field: &str) -> Result<(), ValidationError> {
    let lower = field.to_lowercase();
    if lower.contains("<script") {
        return Err(ValidationError::SecurityViolation(
            "contains <script".to_owned(),
        ));
    }
    if lower.contains("javascript:") {
        return Err(ValidationError::SecurityViolation(
            "contains javascript: URL".to_owned(),
        ));
    }
    if lower.contains("../") {
        return Err(ValidationError::SecurityViolation(
            "contains path-traversal fragment".to_owned(),
        ));
    }
    if event_handler_pattern().is_match(&lower) {
        return Err(ValidationError::SecurityViolation(
            "contains HTML event-handler pattern".to_owned(),
        ));
    }
    if field
        .chars()
        .any(|c| c.is_control() && c != '\t' && c != '\n')
    {
        return Err(ValidationError::SecurityViolation(
            "contains disallowed control character".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(hostname: &str) -> RegisterMessage {
        RegisterMessage {
            version: PROTOCOL_VERSION.to_owned(),
            message_type: "registration".to_owned(),
            timestamp: "2025-01-01T00:00:00Z".to_owned(),
            hostname: hostname.to_owned(),
            auth_token: None,
        }
    }

    #[test]
    fn accepts_well_formed_hostname() {
        let result = validate_register_message(&register("host-a.example.com"));
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut msg = register("host-a");
        msg.version = "2.0".to_owned();
        assert_eq!(
            validate_register_message(&msg),
            Err(ValidationError::UnsupportedVersion("2.0".to_owned()))
        );
    }

    #[test]
    fn rejects_leading_and_trailing_hyphen_label() {
        assert!(validate_register_message(&register("-bad-")).is_err());
    }

    #[test]
    fn hostname_of_253_is_accepted_254_is_rejected() {
        let ok = "a".repeat(63) + "." + &"a".repeat(63) + "." + &"a".repeat(63) + "." + &"a".repeat(61);
        assert_eq!(ok.len(), 253);
        assert!(validate_register_message(&register(&ok)).is_ok());

        let too_long = ok + "a";
        assert_eq!(too_long.len(), 254);
        assert!(validate_register_message(&register(&too_long)).is_err());
    }

    #[test]
    fn label_of_63_is_accepted_64_is_rejected() {
        let ok_label = "a".repeat(63);
        assert!(validate_register_message(&register(&ok_label)).is_ok());

        let bad_label = "a".repeat(64);
        assert!(validate_register_message(&register(&bad_label)).is_err());
    }

    #[test]
    fn rejects_consecutive_dots() {
        assert!(validate_register_message(&register("host..example")).is_err());
    }

    #[test]
    fn flags_reserved_hostname_as_accepted_but_marked() {
        let result = validate_register_message(&register("localhost")).unwrap();
        assert!(result.is_reserved);
    }

    #[test]
    fn rejects_script_injection_in_hostname() {
        let mut msg = register("host-a");
        msg.auth_token = Some("<script>alert(1)</script>".to_owned());
        assert!(matches!(
            validate_register_message(&msg),
            Err(ValidationError::SecurityViolation(_))
        ));
    }

    #[test]
    fn rejects_path_traversal_in_auth_token() {
        let mut msg = register("host-a");
        msg.auth_token = Some("../../etc/passwd".to_owned());
        assert!(matches!(
            validate_register_message(&msg),
            Err(ValidationError::SecurityViolation(_))
        ));
    }

    #[test]
    fn sanitize_collapses_consecutive_dots_and_trims_edges() {
        assert_eq!(sanitize_hostname("  Host..Example.-"), "host.example");
    }

    #[test]
    fn rejects_malformed_timestamp() {
        let mut msg = register("host-a");
        msg.timestamp = "not-a-timestamp".to_owned();
        assert!(matches!(
            validate_register_message(&msg),
            Err(ValidationError::InvalidTimestamp(_))
        ));
    }
}
