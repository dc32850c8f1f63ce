//! Signed, typed protocol envelopes.
//!
//! An [`UnsignedEnvelope`] holds the six signed fields. Once the codec signs
//! it, the result is an [`Envelope`] whose fields can only be read: any change
//! to a signed field requires re-encoding, which re-signs with a fresh nonce.

use crate::serde_compat::base64_bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Application payload; only delivered between consented peers.
    Data,
    /// Ask the recipient for consent to exchange data.
    ConsentRequest,
    /// Consent granted.
    ConsentGrant,
    /// Consent refused.
    ConsentDeny,
    /// Relay acknowledgement of presence.
    HeartbeatAck,
}

impl EnvelopeKind {
    /// Fixed one-byte tag used in canonical bytes.
    pub fn tag(self) -> u8 {
        match self {
            EnvelopeKind::Data => 0,
            EnvelopeKind::ConsentRequest => 1,
            EnvelopeKind::ConsentGrant => 2,
            EnvelopeKind::ConsentDeny => 3,
            EnvelopeKind::HeartbeatAck => 4,
        }
    }

    /// Inverse of [`EnvelopeKind::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(EnvelopeKind::Data),
            1 => Some(EnvelopeKind::ConsentRequest),
            2 => Some(EnvelopeKind::ConsentGrant),
            3 => Some(EnvelopeKind::ConsentDeny),
            4 => Some(EnvelopeKind::HeartbeatAck),
            _ => None,
        }
    }

    /// Consent control messages drive the consent state machine.
    pub fn is_consent_control(self) -> bool {
        matches!(
            self,
            EnvelopeKind::ConsentRequest | EnvelopeKind::ConsentGrant | EnvelopeKind::ConsentDeny
        )
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeKind::Data => write!(f, "data"),
            EnvelopeKind::ConsentRequest => write!(f, "consent_request"),
            EnvelopeKind::ConsentGrant => write!(f, "consent_grant"),
            EnvelopeKind::ConsentDeny => write!(f, "consent_deny"),
            EnvelopeKind::HeartbeatAck => write!(f, "heartbeat_ack"),
        }
    }
}

/// The signed fields of an envelope, before a signature is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEnvelope {
    /// Sender agent name.
    pub from: String,
    /// Recipient agent name.
    pub to: String,
    /// Envelope type.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Opaque payload bytes.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Per-sender strictly increasing counter.
    pub nonce: u64,
    /// Wall-clock send time, unix milliseconds.
    pub timestamp: i64,
}

/// A signed envelope. Immutable: fields are exposed through accessors only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    header: UnsignedEnvelope,
    /// Ed25519 signature over the canonical bytes of `header`.
    #[serde(with = "base64_bytes")]
    signature: Vec<u8>,
}

impl Envelope {
    /// Attach a signature to a header. The codec is the only caller that
    /// produces valid pairs; anything else fails verification.
    pub fn from_parts(header: UnsignedEnvelope, signature: Vec<u8>) -> Self {
        Self { header, signature }
    }

    pub fn header(&self) -> &UnsignedEnvelope {
        &self.header
    }

    pub fn from(&self) -> &str {
        &self.header.from
    }

    pub fn to(&self) -> &str {
        &self.header.to
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.header.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.header.payload
    }

    pub fn nonce(&self) -> u64 {
        self.header.nonce
    }

    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Consume the envelope, keeping only the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.header.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::from_parts(
            UnsignedEnvelope {
                from: "alice".to_string(),
                to: "bob".to_string(),
                kind: EnvelopeKind::ConsentRequest,
                payload: b"hi".to_vec(),
                nonce: 7,
                timestamp: 1_700_000_000_000,
            },
            vec![9; 64],
        )
    }

    #[test]
    fn test_kind_tags_are_stable() {
        for kind in [
            EnvelopeKind::Data,
            EnvelopeKind::ConsentRequest,
            EnvelopeKind::ConsentGrant,
            EnvelopeKind::ConsentDeny,
            EnvelopeKind::HeartbeatAck,
        ] {
            assert_eq!(EnvelopeKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(EnvelopeKind::Data.tag(), 0);
        assert_eq!(EnvelopeKind::HeartbeatAck.tag(), 4);
        assert_eq!(EnvelopeKind::from_tag(5), None);
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["type"], "consent_request");
        assert_eq!(json["from"], "alice");
        assert_eq!(json["payload"], "aGk=");
        assert_eq!(json["nonce"], 7);
        assert!(json["signature"].is_string());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["type"] = serde_json::Value::String("task".into());
        assert!(serde_json::from_value::<Envelope>(json).is_err());
    }

    #[test]
    fn test_consent_control() {
        assert!(EnvelopeKind::ConsentGrant.is_consent_control());
        assert!(!EnvelopeKind::Data.is_consent_control());
        assert!(!EnvelopeKind::HeartbeatAck.is_consent_control());
        assert_eq!(EnvelopeKind::ConsentDeny.to_string(), "consent_deny");
    }
}
