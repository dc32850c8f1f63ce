//! Nonce state: the outbound counter and the inbound replay guard.
//!
//! Both are shared mutable state touched by concurrent `send` and `poll`
//! calls, so every read-modify-write happens under a single mutex.

use airc_types::{AircError, AircResult, VerificationError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Strictly increasing outbound nonce source for one identity.
///
/// With a backing file, each new value is written (temp file + rename)
/// before it is handed out, so a restart never reuses a nonce.
#[derive(Debug)]
pub struct NonceCounter {
    last: Mutex<u64>,
    path: Option<PathBuf>,
}

impl NonceCounter {
    /// Counter that lives only for this process run.
    pub fn in_memory() -> Self {
        Self {
            last: Mutex::new(0),
            path: None,
        }
    }

    /// Counter persisted at `path`, resuming from its last value.
    pub fn persistent(path: impl Into<PathBuf>) -> AircResult<Self> {
        let path = path.into();
        let last = match std::fs::read_to_string(&path) {
            Ok(text) => text.trim().parse::<u64>().map_err(|e| {
                AircError::KeyStoreCorrupt(format!(
                    "nonce file {} is unreadable: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(AircError::Io(e)),
        };
        debug!(path = %path.display(), last, "Loaded nonce counter");
        Ok(Self {
            last: Mutex::new(last),
            path: Some(path),
        })
    }

    /// Reserve the next nonce. The counter only advances if persisting it
    /// succeeded.
    pub fn next(&self) -> AircResult<u64> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let next = last
            .checked_add(1)
            .ok_or_else(|| AircError::Config("nonce counter exhausted".into()))?;
        if let Some(ref path) = self.path {
            write_atomic(path, next.to_string().as_bytes())?;
        }
        *last = next;
        Ok(next)
    }

    /// Last nonce handed out (0 if none).
    pub fn current(&self) -> u64 {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> AircResult<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Highest accepted nonce per sender.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    accepted: Mutex<HashMap<String, u64>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail if `nonce` would be a replay. Does not record anything.
    pub fn check(&self, from: &str, nonce: u64) -> Result<(), VerificationError> {
        let accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());
        check_locked(&accepted, from, nonce)
    }

    /// Record `nonce` as accepted. Re-checks under the lock so two racing
    /// envelopes with the same nonce cannot both pass.
    pub fn commit(&self, from: &str, nonce: u64) -> Result<(), VerificationError> {
        let mut accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());
        check_locked(&accepted, from, nonce)?;
        accepted.insert(from.to_string(), nonce);
        Ok(())
    }

    /// Highest accepted nonce for a sender.
    pub fn last_accepted(&self, from: &str) -> Option<u64> {
        let accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());
        accepted.get(from).copied()
    }
}

fn check_locked(
    accepted: &HashMap<String, u64>,
    from: &str,
    nonce: u64,
) -> Result<(), VerificationError> {
    match accepted.get(from) {
        Some(&last) if nonce <= last => Err(VerificationError::ReplayDetected {
            from: from.to_string(),
            nonce,
            last_accepted: last,
        }),
        _ => Ok(()),
    }
}
