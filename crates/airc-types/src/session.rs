//! Relay presence sessions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A relay-issued session. Absent or expired sessions force re-registration
/// before any other relay call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque relay credential.
    pub token: String,
    /// When the relay issued the token.
    pub issued_at: DateTime<Utc>,
    /// Last successful heartbeat (or `issued_at`).
    pub last_heartbeat_at: DateTime<Utc>,
    /// Seconds the relay keeps the session alive without a heartbeat.
    pub ttl_secs: u64,
}

impl Session {
    /// A session issued now.
    pub fn issued(token: impl Into<String>, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            token: token.into(),
            issued_at: now,
            last_heartbeat_at: now,
            ttl_secs,
        }
    }

    /// Instant after which the relay considers the session dead. `None`
    /// when the relay-supplied TTL reaches past the representable range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = i64::try_from(self.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)?;
        self.last_heartbeat_at.checked_add_signed(ttl)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Record a successful heartbeat with the TTL the relay returned.
    pub fn refreshed(&self, ttl_secs: u64) -> Self {
        Self {
            token: self.token.clone(),
            issued_at: self.issued_at,
            last_heartbeat_at: Utc::now(),
            ttl_secs,
        }
    }
}
