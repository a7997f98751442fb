//! Wire message types for the registration protocol.
//!
//! A [`RegisterMessage`] travels client -> server inside a length-prefixed
//! frame (see [`crate::codec`]); a [`ResponseMessage`] travels back.

use serde::{Deserialize, Serialize};

/// The only protocol version this implementation accepts.
pub const PROTOCOL_VERSION: &str = "1.0";

/// `REGISTER` message, client -> server.
///
/// `#[serde(deny_unknown_fields)]` enforces the "other fields are rejected"
/// rule at the structural-validation layer for free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterMessage {
    pub version: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub timestamp: String,
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Status carried by a [`ResponseMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// `RESPONSE` message, server -> client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub version: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub status: ResponseStatus,
    pub message: String,
    pub timestamp: String,
}

impl ResponseMessage {
    /// Build a `success` response stamped with the current time.
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Success, message)
    }

    /// Build an `error` response stamped with the current time.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Error, message)
    }

    fn new(status: ResponseStatus, message: impl Into<String>) -> Self {
        ResponseMessage {
            version: PROTOCOL_VERSION.to_owned(),
            message_type: "response".to_owned(),
            status,
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_message_rejects_unknown_fields() {
        let json = serde_json::json!({
            "version": "1.0",
            "type": "registration",
            "timestamp": "2025-01-01T00:00:00Z",
            "hostname": "host-a",
            "extra_field": "nope",
        });
        let result: Result<RegisterMessage, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn register_message_accepts_optional_auth_token() {
        let json = serde_json::json!({
            "version": "1.0",
            "type": "registration",
            "timestamp": "2025-01-01T00:00:00Z",
            "hostname": "host-a",
        });
        let msg: RegisterMessage = serde_json::from_value(json).expect("deserializes");
        assert_eq!(msg.auth_token, None);
    }

    #[test]
    fn response_round_trips_through_json() {
        let resp = ResponseMessage::success("registered");
        let json = serde_json::to_string(&resp).expect("serializes");
        let back: ResponseMessage = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back.status, ResponseStatus::Success);
        assert_eq!(back.message, "registered");
    }
}
