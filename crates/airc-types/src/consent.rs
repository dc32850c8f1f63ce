//! Per-peer consent records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consent state of a peer relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    /// No exchange has happened yet.
    #[default]
    Unknown,
    /// We asked the peer for consent and await an answer.
    PendingOutbound,
    /// The peer asked us; a local grant or deny is due.
    PendingInbound,
    /// Data may flow both ways.
    Granted,
    /// Consent was refused.
    Denied,
    /// Locally blocked. Left only through an explicit unblock.
    Blocked,
}

impl ConsentState {
    /// Whether `data` envelopes may be delivered or surfaced.
    pub fn permits_data(self) -> bool {
        self == ConsentState::Granted
    }

    /// Pending in either direction.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            ConsentState::PendingOutbound | ConsentState::PendingInbound
        )
    }
}

impl fmt::Display for ConsentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentState::Unknown => write!(f, "unknown"),
            ConsentState::PendingOutbound => write!(f, "pending_outbound"),
            ConsentState::PendingInbound => write!(f, "pending_inbound"),
            ConsentState::Granted => write!(f, "granted"),
            ConsentState::Denied => write!(f, "denied"),
            ConsentState::Blocked => write!(f, "blocked"),
        }
    }
}

/// One record per peer, owned by the consent engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Peer agent name.
    pub peer: String,
    /// Current state.
    pub state: ConsentState,
    /// Time of the last transition.
    pub updated_at: DateTime<Utc>,
}

impl ConsentRecord {
    /// A fresh `unknown` record.
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            state: ConsentState::Unknown,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_granted_permits_data() {
        assert!(ConsentState::Granted.permits_data());
        for s in [
            ConsentState::Unknown,
            ConsentState::PendingOutbound,
            ConsentState::PendingInbound,
            ConsentState::Denied,
            ConsentState::Blocked,
        ] {
            assert!(!s.permits_data(), "{s} must not permit data");
        }
    }

    #[test]
    fn test_new_record_is_unknown() {
        let r = ConsentRecord::new("bob");
        assert_eq!(r.state, ConsentState::Unknown);
        assert_eq!(r.peer, "bob");
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&ConsentState::PendingInbound).unwrap();
        assert_eq!(json, "\"pending_inbound\"");
    }
}
