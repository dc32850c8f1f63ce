//! Relay request/response bodies.
//!
//! All relay calls are JSON over HTTP. Envelopes returned by `/poll` are kept
//! as raw JSON values so that every one of them goes through
//! [`MessageCodec::verify_value`](crate::MessageCodec::verify_value) before
//! any field is trusted.

use airc_types::Envelope;
use serde::{Deserialize, Serialize};

/// Current protocol version advertised by the client.
pub const PROTOCOL_VERSION: &str = "0.2";

/// `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub agent_name: String,
    /// Base64 raw Ed25519 public key.
    pub public_key: String,
    /// Base64 signature over [`register_proof_message`].
    pub key_proof: String,
    /// Unix milliseconds covered by `key_proof`.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub session_token: String,
    /// Session TTL in seconds.
    pub ttl: u64,
}

/// `POST /heartbeat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub session_token: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ttl: u64,
}

/// `POST /send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub session_token: String,
    pub envelope: Envelope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub accepted: bool,
}

/// `GET /poll` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRequest {
    pub session_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

/// `GET /poll` response, in relay arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub envelopes: Vec<serde_json::Value>,
    /// Opaque cursor to pass as `since` on the next poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// `GET /identity/{agent_name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub agent_name: String,
    pub public_key: String,
}

/// Error body the relay may attach to non-2xx responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: String,
}

/// Bytes signed to prove key ownership at registration.
///
/// `"airc-register\n{agent_name}\n{public_key}\n{timestamp}"`
pub fn register_proof_message(agent_name: &str, public_key: &str, timestamp: i64) -> Vec<u8> {
    format!("airc-register\n{agent_name}\n{public_key}\n{timestamp}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_fields() {
        let req = RegisterRequest {
            agent_name: "scout".into(),
            public_key: "cGs=".into(),
            key_proof: "c2ln".into(),
            timestamp: 42,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["agent_name"], "scout");
        assert_eq!(json["key_proof"], "c2ln");
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn test_poll_response_defaults() {
        let resp: PollResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.envelopes.is_empty());
        assert!(resp.cursor.is_none());

        let resp: PollResponse =
            serde_json::from_str(r#"{"envelopes":[{"from":"a"}],"cursor":"17"}"#).unwrap();
        assert_eq!(resp.envelopes.len(), 1);
        assert_eq!(resp.cursor.as_deref(), Some("17"));
    }

    #[test]
    fn test_poll_request_omits_empty_since() {
        let req = PollRequest {
            session_token: "t".into(),
            since: None,
        };
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"session_token":"t"}"#);
    }

    #[test]
    fn test_proof_message_layout() {
        let msg = register_proof_message("scout", "PK", 7);
        assert_eq!(msg, b"airc-register\nscout\nPK\n7".to_vec());
    }
}
