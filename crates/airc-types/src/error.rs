//! Error taxonomy for the AIRC client.
//!
//! Errors fall into four classes: fatal local failures (the process must not
//! continue under a possibly-wrong identity), transient relay failures
//! (retried with backoff before surfacing), protocol/security rejections of
//! inbound envelopes (dropped, never surfaced as data), and consent policy
//! outcomes (reported as values, not errors).

use crate::consent::ConsentState;
use thiserror::Error;

/// Top-level error type for the AIRC client.
#[derive(Error, Debug)]
pub enum AircError {
    /// Persisted key material exists but is unreadable or inconsistent.
    #[error("Key store corrupt: {0}")]
    KeyStoreCorrupt(String),

    /// The relay rejected our proof of key ownership.
    #[error("Invalid key proof: {0}")]
    InvalidKeyProof(String),

    /// The agent name is claimed by a different public key.
    #[error("Name conflict: '{0}' is registered to a different key")]
    NameConflict(String),

    /// The relay could not be reached (connect failure, 5xx, throttling).
    #[error("Relay unreachable: {0}")]
    RelayUnreachable(String),

    /// A relay call exceeded its timeout.
    #[error("Relay request timed out: {0}")]
    Timeout(String),

    /// The relay no longer recognises our session token.
    #[error("Session expired")]
    SessionExpired,

    /// Presence could not be restored after a re-registration.
    #[error("Presence lost after {attempts} attempts: {reason}")]
    PresenceLost {
        /// Heartbeat attempts made, including the one after re-registration.
        attempts: u32,
        /// The last failure.
        reason: String,
    },

    /// The relay answered with an unexpected status.
    #[error("Relay error {status}: {message}")]
    Relay {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// A local consent action does not apply in the peer's current state.
    #[error("Cannot {action} '{peer}' while consent is {state}")]
    InvalidConsentAction {
        /// Peer agent name.
        peer: String,
        /// The peer's current state.
        state: ConsentState,
        /// The attempted action.
        action: String,
    },

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AircError {
    /// Whether the failure is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AircError::RelayUnreachable(_) | AircError::Timeout(_) | AircError::SessionExpired
        )
    }

    /// Whether the process must refuse to proceed under its current identity.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AircError::KeyStoreCorrupt(_) | AircError::InvalidKeyProof(_)
        )
    }
}

impl From<serde_json::Error> for AircError {
    fn from(e: serde_json::Error) -> Self {
        AircError::Serialization(e.to_string())
    }
}

/// Alias for Result with AircError.
pub type AircResult<T> = Result<T, AircError>;

/// Reasons an inbound envelope is rejected by the codec.
///
/// These are attacker-controlled conditions: the client drops the envelope
/// and logs, it never raises them to the caller as application errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The wire form could not be parsed.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// No public key is known for the claimed sender.
    #[error("Unknown sender: {0}")]
    UnknownSender(String),

    /// The signature does not match the canonical bytes.
    #[error("Signature mismatch for envelope from {0}")]
    SignatureMismatch(String),

    /// The nonce is not strictly greater than the last accepted one.
    #[error("Replay detected from {from}: nonce {nonce} <= {last_accepted}")]
    ReplayDetected {
        /// Claimed sender.
        from: String,
        /// Nonce carried by the envelope.
        nonce: u64,
        /// Highest nonce previously accepted from this sender.
        last_accepted: u64,
    },

    /// The timestamp lies outside the accepted clock-skew window.
    #[error("Stale timestamp from {from}: skew {skew_ms}ms exceeds {window_ms}ms")]
    StaleTimestamp {
        /// Claimed sender.
        from: String,
        /// Absolute distance from local time.
        skew_ms: u64,
        /// Accepted window.
        window_ms: i64,
    },

    /// The envelope is addressed to another agent.
    #[error("Envelope addressed to {to}, not {local}")]
    WrongRecipient {
        /// Recipient named in the envelope.
        to: String,
        /// The local agent name.
        local: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AircError::RelayUnreachable("down".into()).is_retryable());
        assert!(AircError::Timeout("30s".into()).is_retryable());
        assert!(AircError::SessionExpired.is_retryable());
        assert!(!AircError::NameConflict("bob".into()).is_retryable());
        assert!(!AircError::KeyStoreCorrupt("bad".into()).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AircError::KeyStoreCorrupt("bad".into()).is_fatal());
        assert!(AircError::InvalidKeyProof("nope".into()).is_fatal());
        assert!(!AircError::SessionExpired.is_fatal());
    }

    #[test]
    fn test_replay_message() {
        let e = VerificationError::ReplayDetected {
            from: "alice".into(),
            nonce: 3,
            last_accepted: 7,
        };
        assert_eq!(e.to_string(), "Replay detected from alice: nonce 3 <= 7");
    }
}
