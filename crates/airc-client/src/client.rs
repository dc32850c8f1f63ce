//! Client: the public face of the AIRC protocol core.
//!
//! `register` and `heartbeat` go through the [`PresenceSession`]; `send` and
//! `poll` go through the [`ConsentEngine`] and the [`MessageCodec`]. All
//! relay calls carry the current session token, and a token the relay has
//! expired is replaced by one re-registration before the call is retried.
//!
//! Sends, polls, and local consent actions are serialized by one async
//! lock so nonces stay monotonic and no consent transition is lost when
//! several tasks share a client.

use crate::config::load_config;
use crate::consent::{ConsentEngine, ConsentNotice, ConsentPolicy, LocalAction, SendPlan};
use crate::keystore::{Identity, KeyStore};
use crate::presence::PresenceSession;
use crate::relay::{HttpRelay, RelayTransport};
use crate::retry::{retry_relay, RetryConfig};
use airc_types::config::ClientConfig;
use airc_types::signing::decode_public_key;
use airc_types::{
    AircError, AircResult, ConsentRecord, ConsentState, Envelope, EnvelopeKind, Session,
};
use airc_wire::message::{PollRequest, SendRequest};
use airc_wire::{KeyDirectory, KeySource, MessageCodec, NonceCounter, PinOutcome};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Result of [`Client::send`]. Consent outcomes are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The data envelope was accepted by the relay.
    Delivered { nonce: u64 },
    /// A `consent_request` went out instead; the payload is queued.
    ConsentRequested { nonce: u64 },
    /// A request is outstanding; the payload is queued.
    Queued,
    /// The peer asked us first; grant or deny before data can flow.
    AwaitingLocalDecision,
    Denied,
    Blocked,
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }
}

/// Something the caller should see after a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// A data payload from a granted peer.
    Message {
        from: String,
        payload: Vec<u8>,
        nonce: u64,
        timestamp: i64,
    },
    /// A peer asked for consent; answer with grant or deny.
    ConsentRequested { from: String },
    ConsentGranted { from: String },
    ConsentDenied { from: String },
}

impl PollEvent {
    fn message(envelope: Envelope) -> Self {
        let from = envelope.from().to_string();
        let nonce = envelope.nonce();
        let timestamp = envelope.timestamp();
        PollEvent::Message {
            from,
            payload: envelope.into_payload(),
            nonce,
            timestamp,
        }
    }

    /// The peer this event concerns.
    pub fn peer(&self) -> &str {
        match self {
            PollEvent::Message { from, .. }
            | PollEvent::ConsentRequested { from }
            | PollEvent::ConsentGranted { from }
            | PollEvent::ConsentDenied { from } => from,
        }
    }
}

/// Strip surrounding whitespace and a leading `@` from an agent name.
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_start_matches('@').to_string()
}

/// An AIRC client bound to one identity and one relay.
pub struct Client {
    config: ClientConfig,
    identity: Arc<Identity>,
    codec: MessageCodec,
    directory: KeyDirectory,
    consent: ConsentEngine,
    presence: PresenceSession,
    relay: Arc<dyn RelayTransport>,
    retry: RetryConfig,
    exchange: tokio::sync::Mutex<()>,
    poll_cursor: Mutex<Option<String>>,
}

impl Client {
    /// Client from the config file at `path` (or the default location).
    pub fn from_config_file(path: Option<&Path>) -> AircResult<Self> {
        Self::new(load_config(path))
    }

    /// Load (or create) the identity and talk to the configured relay over HTTP.
    pub fn new(config: ClientConfig) -> AircResult<Self> {
        config.validate().map_err(AircError::Config)?;
        let store = KeyStore::from_config(&config);
        let identity = Arc::new(store.load_or_create()?);
        let relay = Arc::new(HttpRelay::from_config(&config, identity.clone())?);
        let nonces = NonceCounter::persistent(store.nonce_path())?;
        Ok(Self::with_relay(config, identity, relay, nonces))
    }

    /// Load (or create) the identity and use the given relay transport.
    pub fn open(config: ClientConfig, relay: Arc<dyn RelayTransport>) -> AircResult<Self> {
        config.validate().map_err(AircError::Config)?;
        let store = KeyStore::from_config(&config);
        let identity = Arc::new(store.load_or_create()?);
        let nonces = NonceCounter::persistent(store.nonce_path())?;
        Ok(Self::with_relay(config, identity, relay, nonces))
    }

    /// Assemble a client from parts already loaded.
    pub fn with_relay(
        config: ClientConfig,
        identity: Arc<Identity>,
        relay: Arc<dyn RelayTransport>,
        nonces: NonceCounter,
    ) -> Self {
        let retry = RetryConfig::from(&config.retry);
        let skew_ms = i64::try_from(config.clock_skew_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let codec = MessageCodec::new(identity.agent_name(), nonces).with_skew_window_ms(skew_ms);

        let directory = KeyDirectory::new();
        directory.add(
            identity.agent_name(),
            identity.public_key(),
            KeySource::Registration,
        );

        let presence = PresenceSession::new(relay.clone(), retry.clone());
        presence.set_status(config.presence_status.clone());

        Self {
            consent: ConsentEngine::new(ConsentPolicy::from(&config)),
            config,
            identity,
            codec,
            directory,
            presence,
            relay,
            retry,
            exchange: tokio::sync::Mutex::new(()),
            poll_cursor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn agent_name(&self) -> &str {
        self.identity.agent_name()
    }

    pub fn directory(&self) -> &KeyDirectory {
        &self.directory
    }

    /// The current session, if registered.
    pub fn session(&self) -> Option<Session> {
        self.presence.current()
    }

    /// Last outbound nonce issued.
    pub fn current_nonce(&self) -> u64 {
        self.codec.current_nonce()
    }

    pub fn consent_state(&self, peer: &str) -> ConsentState {
        self.consent.state(&normalize_name(peer))
    }

    pub fn consent_records(&self) -> Vec<ConsentRecord> {
        self.consent.records()
    }

    /// Status carried by subsequent heartbeats.
    pub fn set_presence_status(&self, status: impl Into<String>) {
        self.presence.set_status(status);
    }

    // -- Presence -----------------------------------------------------------

    /// Prove our identity to the relay and open a session.
    pub async fn register(&self) -> AircResult<Session> {
        self.presence.register(&self.identity).await
    }

    /// Refresh presence. See [`PresenceSession::heartbeat`].
    pub async fn heartbeat(&self) -> AircResult<Session> {
        self.presence.heartbeat(&self.identity).await
    }

    /// Run a relay call with a valid token, re-registering once if the
    /// relay reports the session expired.
    async fn call_with_session<F, Fut, T>(&self, op: F) -> AircResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = AircResult<T>>,
    {
        let token = self.presence.ensure(&self.identity).await?;
        match retry_relay(&self.retry, || op(token.clone())).await {
            Err(AircError::SessionExpired) => {
                warn!(agent = self.agent_name(), "Session expired at relay; re-registering");
                self.presence.invalidate();
                let session = self.presence.register(&self.identity).await?;
                retry_relay(&self.retry, || op(session.token.clone())).await
            }
            other => other,
        }
    }

    // -- Sending ------------------------------------------------------------

    /// Send `payload` to `to`, subject to consent.
    ///
    /// The first send to a new peer emits a `consent_request` and queues the
    /// payload; it is delivered once the peer grants.
    pub async fn send(&self, to: &str, payload: impl Into<Vec<u8>>) -> AircResult<SendOutcome> {
        let peer = normalize_name(to);
        let payload = payload.into();
        let _guard = self.exchange.lock().await;

        let plan = self.consent.plan_send(&peer);
        let outcome = match plan {
            SendPlan::Deliver => {
                self.flush_peer(&peer).await?;
                let nonce = self.ship(&peer, EnvelopeKind::Data, payload).await?;
                SendOutcome::Delivered { nonce }
            }
            SendPlan::RequestConsent => {
                let nonce = self
                    .ship(&peer, EnvelopeKind::ConsentRequest, Vec::new())
                    .await?;
                self.consent.commit_send(&peer, plan, payload);
                SendOutcome::ConsentRequested { nonce }
            }
            SendPlan::Queue => {
                self.consent.commit_send(&peer, plan, payload);
                SendOutcome::Queued
            }
            SendPlan::AwaitLocalDecision => {
                self.consent.commit_send(&peer, plan, payload);
                SendOutcome::AwaitingLocalDecision
            }
            SendPlan::Refuse(ConsentState::Blocked) => SendOutcome::Blocked,
            SendPlan::Refuse(_) => SendOutcome::Denied,
        };
        debug!(peer = %peer, ?outcome, "Send");
        Ok(outcome)
    }

    /// Sign and hand one envelope to the relay. Returns its nonce.
    async fn ship(&self, peer: &str, kind: EnvelopeKind, payload: Vec<u8>) -> AircResult<u64> {
        let envelope = self
            .codec
            .encode(self.identity.as_ref(), peer, kind, payload)?;
        let nonce = envelope.nonce();
        let response = self
            .call_with_session(|token| {
                let relay = self.relay.clone();
                let request = SendRequest {
                    session_token: token,
                    envelope: envelope.clone(),
                };
                async move { relay.send(request).await }
            })
            .await?;
        if !response.accepted {
            return Err(AircError::Relay {
                status: 200,
                message: format!("relay did not accept {kind} envelope for {peer}"),
            });
        }
        debug!(peer, %kind, nonce, "Envelope accepted by relay");
        Ok(nonce)
    }

    /// Send everything queued for a granted peer, oldest first.
    async fn flush_peer(&self, peer: &str) -> AircResult<usize> {
        let mut pending = self.consent.take_outbound(peer).into_iter();
        let mut sent = 0;
        while let Some(payload) = pending.next() {
            if let Err(e) = self.ship(peer, EnvelopeKind::Data, payload.clone()).await {
                let mut rest = vec![payload];
                rest.extend(pending);
                self.consent.requeue_front(peer, rest);
                return Err(e);
            }
            sent += 1;
        }
        if sent > 0 {
            info!(peer, sent, "Delivered queued messages");
        }
        Ok(sent)
    }

    async fn flush_granted(&self) {
        for peer in self.consent.pending_flushes() {
            if let Err(e) = self.flush_peer(&peer).await {
                warn!(peer = %peer, error = %e, "Queued messages not delivered yet");
            }
        }
    }

    // -- Receiving ----------------------------------------------------------

    /// Fetch, verify, and apply pending envelopes.
    ///
    /// Envelopes that fail verification are dropped and logged. Data from
    /// peers without granted consent is withheld or dropped, never returned.
    pub async fn poll(&self) -> AircResult<Vec<PollEvent>> {
        let since = self
            .poll_cursor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let response = self
            .call_with_session(|token| {
                let relay = self.relay.clone();
                let request = PollRequest {
                    session_token: token,
                    since: since.clone(),
                };
                async move { relay.poll(request).await }
            })
            .await?;

        self.learn_senders(&response.envelopes).await;

        let _guard = self.exchange.lock().await;
        let mut events: Vec<PollEvent> = self
            .consent
            .drain_released()
            .into_iter()
            .map(PollEvent::message)
            .collect();

        for value in response.envelopes {
            let envelope = match self.codec.verify_value(value, &self.directory) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "Dropped inbound envelope");
                    continue;
                }
            };
            let from = envelope.from().to_string();
            let outcome = self.consent.receive(envelope);

            if let Some(kind) = outcome.reply {
                if let Err(e) = self.ship(&from, kind, Vec::new()).await {
                    warn!(peer = %from, %kind, error = %e, "Consent reply not sent");
                }
            }
            match outcome.notice {
                Some(ConsentNotice::Requested) => {
                    events.push(PollEvent::ConsentRequested { from: from.clone() })
                }
                Some(ConsentNotice::Granted) => {
                    events.push(PollEvent::ConsentGranted { from: from.clone() })
                }
                Some(ConsentNotice::Denied) => {
                    events.push(PollEvent::ConsentDenied { from: from.clone() })
                }
                None => {}
            }
            events.extend(outcome.deliver.into_iter().map(PollEvent::message));
        }

        self.flush_granted().await;

        if let Some(cursor) = response.cursor {
            *self.poll_cursor.lock().unwrap_or_else(|e| e.into_inner()) = Some(cursor);
        }
        Ok(events)
    }

    /// Look up keys for senders we have never seen. Known names keep their
    /// first key.
    async fn learn_senders(&self, envelopes: &[serde_json::Value]) {
        let unknown: BTreeSet<&str> = envelopes
            .iter()
            .filter_map(|v| v.get("from").and_then(|f| f.as_str()))
            .filter(|name| !self.directory.contains(name))
            .collect();

        for name in unknown {
            let found = match self.relay.lookup_identity(name).await {
                Ok(found) => found,
                Err(e) => {
                    debug!(peer = name, error = %e, "Identity lookup failed");
                    continue;
                }
            };
            let Some(found) = found.filter(|f| f.agent_name == name) else {
                debug!(peer = name, "Relay has no identity for sender");
                continue;
            };
            match decode_public_key(&found.public_key) {
                Ok(key) => match self.directory.add(name, key, KeySource::Relay) {
                    PinOutcome::Inserted => info!(peer = name, "Learned sender key from relay"),
                    PinOutcome::AlreadyKnown => {}
                    PinOutcome::Conflict => {
                        warn!(peer = name, "Relay key differs from the known key; keeping known key")
                    }
                },
                Err(e) => warn!(peer = name, error = %e, "Relay returned an invalid key"),
            }
        }
    }

    // -- Local consent actions ----------------------------------------------

    /// Grant a pending inbound request. Queued payloads for the peer are
    /// sent; withheld inbound data surfaces on the next poll.
    pub async fn grant(&self, peer: &str) -> AircResult<()> {
        self.local_action(peer, LocalAction::Grant).await
    }

    /// Deny a pending inbound request.
    pub async fn deny(&self, peer: &str) -> AircResult<()> {
        self.local_action(peer, LocalAction::Deny).await
    }

    /// Block a peer from any state. Nothing from it is surfaced afterwards.
    pub async fn block(&self, peer: &str) -> AircResult<()> {
        self.local_action(peer, LocalAction::Block).await
    }

    /// Return a blocked peer to `unknown`.
    pub async fn unblock(&self, peer: &str) -> AircResult<()> {
        self.local_action(peer, LocalAction::Unblock).await
    }

    /// Return a denied peer to `unknown`.
    pub async fn reset(&self, peer: &str) -> AircResult<()> {
        self.local_action(peer, LocalAction::Reset).await
    }

    async fn local_action(&self, peer: &str, action: LocalAction) -> AircResult<()> {
        let peer = normalize_name(peer);
        let _guard = self.exchange.lock().await;

        let planned = self.consent.plan_local(&peer, action)?;
        if let Some(kind) = planned.emit {
            self.ship(&peer, kind, Vec::new()).await?;
        }
        self.consent.commit_local(&peer, planned)?;

        if planned.to == ConsentState::Granted {
            if let Err(e) = self.flush_peer(&peer).await {
                warn!(peer = %peer, error = %e, "Queued messages not delivered yet");
            }
        }
        Ok(())
    }

    /// Pin `public_key` (base64) for `peer`, replacing whatever was known.
    pub fn trust_peer(&self, peer: &str, public_key: &str) -> AircResult<()> {
        let peer = normalize_name(peer);
        let key = decode_public_key(public_key)
            .map_err(|e| AircError::Config(format!("invalid public key for '{peer}': {e}")))?;
        self.directory.pin(&peer, key);
        info!(peer = %peer, "Pinned peer key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airc_types::UnsignedEnvelope;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("@bob"), "bob");
        assert_eq!(normalize_name("  bob "), "bob");
        assert_eq!(normalize_name("bob"), "bob");
    }

    #[test]
    fn test_poll_event_from_envelope() {
        let envelope = Envelope::from_parts(
            UnsignedEnvelope {
                from: "alice".into(),
                to: "bob".into(),
                kind: EnvelopeKind::Data,
                payload: b"hi".to_vec(),
                nonce: 4,
                timestamp: 99,
            },
            vec![0; 64],
        );
        let event = PollEvent::message(envelope);
        assert_eq!(event.peer(), "alice");
        assert_eq!(
            event,
            PollEvent::Message {
                from: "alice".into(),
                payload: b"hi".to_vec(),
                nonce: 4,
                timestamp: 99,
            }
        );
    }

    #[test]
    fn test_send_outcome_delivered() {
        assert!(SendOutcome::Delivered { nonce: 1 }.is_delivered());
        assert!(!SendOutcome::Queued.is_delivered());
    }
}
