//! PresenceSession: session token lifecycle and heartbeats.
//!
//! A missing or locally expired token forces a registration before any
//! other relay call. A token the relay has expired is replaced by exactly
//! one silent re-registration; if the heartbeat still fails after that, the
//! caller gets [`AircError::PresenceLost`].

use crate::keystore::Identity;
use crate::relay::RelayTransport;
use crate::retry::{retry_relay, RetryConfig};
use airc_types::serde_compat::encode_b64;
use airc_types::{AircError, AircResult, Session};
use airc_wire::codec::now_ms;
use airc_wire::message::{register_proof_message, HeartbeatRequest, RegisterRequest};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Default presence status string.
pub const DEFAULT_STATUS: &str = "available";

/// Registration and heartbeat state against one relay.
pub struct PresenceSession {
    relay: Arc<dyn RelayTransport>,
    session: RwLock<Option<Session>>,
    retry: RetryConfig,
    status: RwLock<String>,
}

impl PresenceSession {
    pub fn new(relay: Arc<dyn RelayTransport>, retry: RetryConfig) -> Self {
        Self {
            relay,
            session: RwLock::new(None),
            retry,
            status: RwLock::new(DEFAULT_STATUS.to_string()),
        }
    }

    /// Status carried by subsequent heartbeats.
    pub fn set_status(&self, status: impl Into<String>) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status.into();
    }

    pub fn status(&self) -> String {
        self.status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The current session, if any (possibly expired).
    pub fn current(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Token of a session that has not expired locally.
    pub fn valid_token(&self) -> Option<String> {
        self.current()
            .filter(|s| !s.is_expired())
            .map(|s| s.token)
    }

    /// Forget the current session.
    pub fn invalidate(&self) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn store(&self, session: Session) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    /// Prove ownership of `identity` to the relay and open a session.
    ///
    /// Transient failures are retried with backoff; `NameConflict` and
    /// `InvalidKeyProof` are returned at once.
    pub async fn register(&self, identity: &Identity) -> AircResult<Session> {
        let public_key = identity.public_key_base64();
        let response = retry_relay(&self.retry, || {
            let relay = self.relay.clone();
            let timestamp = now_ms();
            let proof = identity.sign(&register_proof_message(
                identity.agent_name(),
                &public_key,
                timestamp,
            ));
            let request = RegisterRequest {
                agent_name: identity.agent_name().to_string(),
                public_key: public_key.clone(),
                key_proof: encode_b64(&proof.to_bytes()),
                timestamp,
            };
            async move { relay.register(request).await }
        })
        .await?;

        let session = Session::issued(response.session_token, response.ttl);
        info!(
            agent = identity.agent_name(),
            ttl = session.ttl_secs,
            "Registered with relay"
        );
        self.store(session.clone());
        Ok(session)
    }

    /// A usable token, registering first when there is none.
    pub async fn ensure(&self, identity: &Identity) -> AircResult<String> {
        match self.valid_token() {
            Some(token) => Ok(token),
            None => {
                debug!(agent = identity.agent_name(), "No valid session; registering");
                Ok(self.register(identity).await?.token)
            }
        }
    }

    /// Refresh presence, re-registering once if the relay expired the token.
    pub async fn heartbeat(&self, identity: &Identity) -> AircResult<Session> {
        let token = self.ensure(identity).await?;
        match self.send_heartbeat(&token).await {
            Err(AircError::SessionExpired) => {}
            other => return other,
        }

        warn!(agent = identity.agent_name(), "Session expired at relay; re-registering");
        self.invalidate();
        let session = match self.register(identity).await {
            Ok(session) => session,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                return Err(AircError::PresenceLost {
                    attempts: 1,
                    reason: e.to_string(),
                })
            }
        };

        self.send_heartbeat(&session.token)
            .await
            .map_err(|e| AircError::PresenceLost {
                attempts: 2,
                reason: e.to_string(),
            })
    }

    async fn send_heartbeat(&self, token: &str) -> AircResult<Session> {
        let status = self.status();
        let response = retry_relay(&self.retry, || {
            let relay = self.relay.clone();
            let request = HeartbeatRequest {
                session_token: token.to_string(),
                status: status.clone(),
            };
            async move { relay.heartbeat(request).await }
        })
        .await?;

        let mut guard = self.session.write().unwrap_or_else(|e| e.into_inner());
        let refreshed = match guard.as_ref() {
            Some(current) if current.token == token => current.refreshed(response.ttl),
            _ => Session::issued(token, response.ttl),
        };
        *guard = Some(refreshed.clone());
        debug!(ttl = response.ttl, "Heartbeat ok");
        Ok(refreshed)
    }
}
