//! Key directory: public keys of senders we can verify.
//!
//! The [`KeyDirectory`] is a thread-safe map from agent name to Ed25519
//! public key. Keys arrive through registration (our own), relay lookups
//! (trust on first use), or explicit pinning by the operator. Once a name is
//! known, later lookups never replace its key.

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Where a key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Our own identity, added at registration.
    Registration,
    /// Learned from the relay's identity directory.
    Relay,
    /// Pinned by the operator.
    Pinned,
}

/// A known sender key.
#[derive(Debug, Clone)]
pub struct KnownKey {
    /// Agent name.
    pub agent_name: String,
    /// Ed25519 public key.
    pub public_key: VerifyingKey,
    /// Provenance.
    pub source: KeySource,
    /// When the key entered the directory.
    pub first_seen: DateTime<Utc>,
}

/// Result of adding a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    /// New entry.
    Inserted,
    /// Same key was already known.
    AlreadyKnown,
    /// A different key is already known for this name; nothing changed.
    Conflict,
}

/// Thread-safe directory of sender keys.
#[derive(Debug, Clone, Default)]
pub struct KeyDirectory {
    keys: Arc<RwLock<HashMap<String, KnownKey>>>,
}

impl KeyDirectory {
    /// Create a new empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key unless the name is already bound.
    pub fn add(&self, agent_name: &str, public_key: VerifyingKey, source: KeySource) -> PinOutcome {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        match keys.get(agent_name) {
            Some(existing) if existing.public_key == public_key => PinOutcome::AlreadyKnown,
            Some(_) => PinOutcome::Conflict,
            None => {
                keys.insert(
                    agent_name.to_string(),
                    KnownKey {
                        agent_name: agent_name.to_string(),
                        public_key,
                        source,
                        first_seen: Utc::now(),
                    },
                );
                PinOutcome::Inserted
            }
        }
    }

    /// Pin a key, replacing any previous binding. Operator action only.
    pub fn pin(&self, agent_name: &str, public_key: VerifyingKey) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(
            agent_name.to_string(),
            KnownKey {
                agent_name: agent_name.to_string(),
                public_key,
                source: KeySource::Pinned,
                first_seen: Utc::now(),
            },
        );
    }

    /// Forget a key.
    pub fn remove(&self, agent_name: &str) -> Option<KnownKey> {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.remove(agent_name)
    }

    /// Public key for a sender.
    pub fn public_key(&self, agent_name: &str) -> Option<VerifyingKey> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(agent_name).map(|k| k.public_key)
    }

    /// Snapshot of an entry.
    pub fn get(&self, agent_name: &str) -> Option<KnownKey> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(agent_name).cloned()
    }

    pub fn contains(&self, agent_name: &str) -> bool {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.contains_key(agent_name)
    }

    /// All known entries.
    pub fn all(&self) -> Vec<KnownKey> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn key() -> VerifyingKey {
        SigningKey::generate(&mut OsRng).verifying_key()
    }

    #[test]
    fn test_add_and_lookup() {
        let dir = KeyDirectory::new();
        let k = key();
        assert_eq!(dir.add("alice", k, KeySource::Relay), PinOutcome::Inserted);
        assert_eq!(dir.public_key("alice"), Some(k));
        assert_eq!(dir.get("alice").unwrap().source, KeySource::Relay);
        assert!(dir.public_key("bob").is_none());
    }

    #[test]
    fn test_first_key_wins() {
        let dir = KeyDirectory::new();
        let k1 = key();
        let k2 = key();
        dir.add("alice", k1, KeySource::Relay);
        assert_eq!(dir.add("alice", k1, KeySource::Relay), PinOutcome::AlreadyKnown);
        assert_eq!(dir.add("alice", k2, KeySource::Relay), PinOutcome::Conflict);
        assert_eq!(dir.public_key("alice"), Some(k1));
    }

    #[test]
    fn test_pin_overrides() {
        let dir = KeyDirectory::new();
        let k1 = key();
        let k2 = key();
        dir.add("alice", k1, KeySource::Relay);
        dir.pin("alice", k2);
        assert_eq!(dir.public_key("alice"), Some(k2));
        assert_eq!(dir.get("alice").unwrap().source, KeySource::Pinned);
    }

    #[test]
    fn test_remove_and_len() {
        let dir = KeyDirectory::new();
        assert!(dir.is_empty());
        dir.add("alice", key(), KeySource::Relay);
        dir.add("bob", key(), KeySource::Pinned);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.all().len(), 2);
        assert!(dir.remove("alice").is_some());
        assert!(!dir.contains("alice"));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_clone_shares_state() {
        let dir = KeyDirectory::new();
        let view = dir.clone();
        dir.add("alice", key(), KeySource::Relay);
        assert!(view.contains("alice"));
    }
}
