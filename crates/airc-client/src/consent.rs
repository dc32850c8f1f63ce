//! ConsentEngine: per-peer consent state machine and delivery gate.
//!
//! Every send and every verified inbound envelope passes through here. Only
//! `granted` peers exchange `data`; everything else is requested, buffered,
//! or dropped according to [`transition`].
//!
//! Locally initiated transitions that emit an envelope are split into a plan
//! and a commit: the client ships the emitted envelope first and commits only
//! once the relay has accepted it, so a failed send leaves the record as it
//! was. Transitions triggered by received envelopes apply immediately.

use airc_types::config::ClientConfig;
use airc_types::{AircError, AircResult, ConsentRecord, ConsentState, Envelope, EnvelopeKind};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Inputs to the consent state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentEvent {
    /// The caller tried to send data.
    LocalSend,
    LocalGrant,
    LocalDeny,
    LocalBlock,
    LocalUnblock,
    /// Forget a `denied` outcome.
    LocalReset,
    ReceivedRequest,
    ReceivedGrant,
    ReceivedDeny,
}

/// A legal state change and the envelope it emits, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConsentState,
    pub to: ConsentState,
    pub emit: Option<EnvelopeKind>,
}

/// The consent transition table. `None` means the event is ignored (for
/// received envelopes) or refused (for local actions).
pub fn transition(state: ConsentState, event: ConsentEvent) -> Option<Transition> {
    use ConsentEvent::*;
    use ConsentState::*;

    let (to, emit) = match (state, event) {
        // Blocked absorbs everything except an explicit unblock.
        (Blocked, LocalUnblock) => (Unknown, None),
        (_, LocalBlock) => (Blocked, None),
        (Blocked, _) => return None,

        (Unknown, LocalSend) => (PendingOutbound, Some(EnvelopeKind::ConsentRequest)),
        (PendingInbound, LocalGrant) => (Granted, Some(EnvelopeKind::ConsentGrant)),
        (PendingInbound, LocalDeny) => (Denied, Some(EnvelopeKind::ConsentDeny)),
        (Denied, LocalReset) => (Unknown, None),

        (Unknown, ReceivedRequest) => (PendingInbound, None),
        // Both sides asked at once.
        (PendingOutbound, ReceivedRequest) => (Granted, Some(EnvelopeKind::ConsentGrant)),
        // The peer lost our grant; repeat it.
        (Granted, ReceivedRequest) => (Granted, Some(EnvelopeKind::ConsentGrant)),
        (PendingOutbound, ReceivedGrant) => (Granted, None),
        (PendingOutbound, ReceivedDeny) => (Denied, None),

        _ => return None,
    };

    Some(Transition {
        from: state,
        to,
        emit,
    })
}

/// Locally initiated consent actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAction {
    Grant,
    Deny,
    Block,
    Unblock,
    Reset,
}

impl LocalAction {
    fn event(self) -> ConsentEvent {
        match self {
            LocalAction::Grant => ConsentEvent::LocalGrant,
            LocalAction::Deny => ConsentEvent::LocalDeny,
            LocalAction::Block => ConsentEvent::LocalBlock,
            LocalAction::Unblock => ConsentEvent::LocalUnblock,
            LocalAction::Reset => ConsentEvent::LocalReset,
        }
    }

    fn name(self) -> &'static str {
        match self {
            LocalAction::Grant => "grant",
            LocalAction::Deny => "deny",
            LocalAction::Block => "block",
            LocalAction::Unblock => "unblock",
            LocalAction::Reset => "reset",
        }
    }
}

/// What a send to a peer must do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPlan {
    /// Consent is granted: ship the data envelope.
    Deliver,
    /// Emit a `consent_request` instead; the payload is queued on commit.
    RequestConsent,
    /// A request is already outstanding and recent; queue the payload.
    Queue,
    /// The peer asked us first; queue until the local grant or deny.
    AwaitLocalDecision,
    /// Denied or blocked; nothing is sent or queued.
    Refuse(ConsentState),
}

/// Consent news for the caller, produced by received control envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentNotice {
    /// The peer is now `pending_inbound` and awaits a local decision.
    Requested,
    /// The peer granted (or both sides requested at once).
    Granted,
    Denied,
}

/// Result of applying one verified inbound envelope.
#[derive(Debug, Default)]
pub struct ReceiveOutcome {
    pub notice: Option<ConsentNotice>,
    /// Data envelopes the caller may now see, oldest first.
    pub deliver: Vec<Envelope>,
    /// Control envelope to send back to the peer.
    pub reply: Option<EnvelopeKind>,
}

/// Consent policy parameters.
#[derive(Debug, Clone)]
pub struct ConsentPolicy {
    /// Minimum age of an unanswered request before a send repeats it.
    pub retry_after: Duration,
    /// Payloads buffered per peer in each direction; the oldest is dropped.
    pub max_buffered: usize,
}

impl Default for ConsentPolicy {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ConsentPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            retry_after: Duration::from_secs(config.consent_retry_secs),
            max_buffered: config.max_withheld_per_peer.max(1),
        }
    }
}

#[derive(Debug)]
struct PeerSlot {
    record: ConsentRecord,
    /// Outbound payloads waiting for `granted`.
    outbound: VecDeque<Vec<u8>>,
    /// Inbound data held while consent is pending.
    withheld: VecDeque<Envelope>,
    /// Withheld data released by a local grant, surfaced on the next poll.
    released: Vec<Envelope>,
    request_sent_at: Option<DateTime<Utc>>,
}

impl PeerSlot {
    fn new(peer: &str) -> Self {
        Self {
            record: ConsentRecord::new(peer),
            outbound: VecDeque::new(),
            withheld: VecDeque::new(),
            released: Vec::new(),
            request_sent_at: None,
        }
    }

    fn apply(&mut self, to: ConsentState) {
        let from = self.record.state;
        self.record.state = to;
        self.record.updated_at = Utc::now();
        match to {
            ConsentState::Denied | ConsentState::Blocked | ConsentState::Unknown => {
                let dropped = self.outbound.len() + self.withheld.len() + self.released.len();
                self.outbound.clear();
                self.withheld.clear();
                self.released.clear();
                self.request_sent_at = None;
                if dropped > 0 {
                    debug!(peer = %self.record.peer, dropped, "Discarded buffered messages");
                }
            }
            ConsentState::Granted => self.request_sent_at = None,
            _ => {}
        }
        if from != to {
            info!(peer = %self.record.peer, %from, %to, "Consent transition");
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize, peer: &str, what: &str) {
    if queue.len() >= max {
        queue.pop_front();
        warn!(peer, max, "Dropped oldest {what} message");
    }
    queue.push_back(item);
}

/// Per-peer consent records plus the buffers they gate.
#[derive(Debug, Default)]
pub struct ConsentEngine {
    policy: ConsentPolicy,
    peers: DashMap<String, PeerSlot>,
}

impl ConsentEngine {
    pub fn new(policy: ConsentPolicy) -> Self {
        Self {
            policy,
            peers: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &ConsentPolicy {
        &self.policy
    }

    /// Current state; peers never seen are `unknown`.
    pub fn state(&self, peer: &str) -> ConsentState {
        self.peers
            .get(peer)
            .map(|slot| slot.record.state)
            .unwrap_or_default()
    }

    pub fn record(&self, peer: &str) -> ConsentRecord {
        self.peers
            .get(peer)
            .map(|slot| slot.record.clone())
            .unwrap_or_else(|| ConsentRecord::new(peer))
    }

    /// All records, sorted by peer name.
    pub fn records(&self) -> Vec<ConsentRecord> {
        let mut records: Vec<ConsentRecord> =
            self.peers.iter().map(|e| e.value().record.clone()).collect();
        records.sort_by(|a, b| a.peer.cmp(&b.peer));
        records
    }

    /// Number of outbound payloads waiting on `peer`.
    pub fn queued(&self, peer: &str) -> usize {
        self.peers.get(peer).map(|s| s.outbound.len()).unwrap_or(0)
    }

    // -- Sending ------------------------------------------------------------

    /// Decide how a send to `peer` proceeds. Does not mutate.
    pub fn plan_send(&self, peer: &str) -> SendPlan {
        self.plan_send_at(peer, Utc::now())
    }

    fn plan_send_at(&self, peer: &str, now: DateTime<Utc>) -> SendPlan {
        let Some(slot) = self.peers.get(peer) else {
            return SendPlan::RequestConsent;
        };
        match slot.record.state {
            ConsentState::Granted => SendPlan::Deliver,
            ConsentState::Unknown => SendPlan::RequestConsent,
            ConsentState::PendingOutbound => {
                let stale = slot.request_sent_at.map_or(true, |sent| {
                    let age = now.signed_duration_since(sent).to_std().unwrap_or_default();
                    age >= self.policy.retry_after
                });
                if stale {
                    SendPlan::RequestConsent
                } else {
                    SendPlan::Queue
                }
            }
            ConsentState::PendingInbound => SendPlan::AwaitLocalDecision,
            state @ (ConsentState::Denied | ConsentState::Blocked) => SendPlan::Refuse(state),
        }
    }

    /// Record the effect of a send plan once its envelope (if any) is out.
    ///
    /// The plan is re-checked against the current state; a stale plan is
    /// ignored and reported as `false`.
    pub fn commit_send(&self, peer: &str, plan: SendPlan, payload: Vec<u8>) -> bool {
        let mut slot = self
            .peers
            .entry(peer.to_string())
            .or_insert_with(|| PeerSlot::new(peer));
        let state = slot.record.state;
        let max = self.policy.max_buffered;
        match plan {
            SendPlan::RequestConsent
                if matches!(state, ConsentState::Unknown | ConsentState::PendingOutbound) =>
            {
                if let Some(t) = transition(state, ConsentEvent::LocalSend) {
                    slot.apply(t.to);
                }
                slot.request_sent_at = Some(Utc::now());
                push_bounded(&mut slot.outbound, payload, max, peer, "outbound");
                true
            }
            SendPlan::Queue if state == ConsentState::PendingOutbound => {
                push_bounded(&mut slot.outbound, payload, max, peer, "outbound");
                true
            }
            SendPlan::AwaitLocalDecision if state == ConsentState::PendingInbound => {
                push_bounded(&mut slot.outbound, payload, max, peer, "outbound");
                true
            }
            SendPlan::Deliver => state == ConsentState::Granted,
            SendPlan::Refuse(expected) => state == expected,
            _ => false,
        }
    }

    /// Peers that are `granted` with queued outbound payloads.
    pub fn pending_flushes(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|e| e.record.state == ConsentState::Granted && !e.outbound.is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Drain queued payloads for a `granted` peer.
    pub fn take_outbound(&self, peer: &str) -> Vec<Vec<u8>> {
        match self.peers.get_mut(peer) {
            Some(mut slot) if slot.record.state == ConsentState::Granted => {
                slot.outbound.drain(..).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Put back payloads that could not be flushed, ahead of anything newer.
    pub fn requeue_front(&self, peer: &str, payloads: Vec<Vec<u8>>) {
        if let Some(mut slot) = self.peers.get_mut(peer) {
            if slot.record.state != ConsentState::Granted {
                return;
            }
            for payload in payloads.into_iter().rev() {
                slot.outbound.push_front(payload);
            }
        }
    }

    // -- Local actions ------------------------------------------------------

    /// Check a local action against the table. Does not mutate.
    pub fn plan_local(&self, peer: &str, action: LocalAction) -> AircResult<Transition> {
        let state = self.state(peer);
        transition(state, action.event()).ok_or_else(|| AircError::InvalidConsentAction {
            peer: peer.to_string(),
            state,
            action: action.name().to_string(),
        })
    }

    /// Apply a planned local transition after its envelope was accepted.
    pub fn commit_local(&self, peer: &str, planned: Transition) -> AircResult<()> {
        let mut slot = self
            .peers
            .entry(peer.to_string())
            .or_insert_with(|| PeerSlot::new(peer));
        if slot.record.state != planned.from {
            return Err(AircError::InvalidConsentAction {
                peer: peer.to_string(),
                state: slot.record.state,
                action: format!("move to {}", planned.to),
            });
        }
        slot.apply(planned.to);
        if planned.to == ConsentState::Granted {
            let released: Vec<Envelope> = slot.withheld.drain(..).collect();
            slot.released.extend(released);
        }
        Ok(())
    }

    /// Withheld data released by local grants since the last call.
    pub fn drain_released(&self) -> Vec<Envelope> {
        let mut out = Vec::new();
        for mut slot in self.peers.iter_mut() {
            out.append(&mut slot.released);
        }
        out
    }

    // -- Receiving ----------------------------------------------------------

    /// Apply one verified inbound envelope.
    pub fn receive(&self, envelope: Envelope) -> ReceiveOutcome {
        let peer = envelope.from().to_string();
        let mut outcome = ReceiveOutcome::default();

        let event = match envelope.kind() {
            EnvelopeKind::HeartbeatAck => {
                debug!(peer = %peer, "Heartbeat ack");
                return outcome;
            }
            EnvelopeKind::Data => None,
            EnvelopeKind::ConsentRequest => Some(ConsentEvent::ReceivedRequest),
            EnvelopeKind::ConsentGrant => Some(ConsentEvent::ReceivedGrant),
            EnvelopeKind::ConsentDeny => Some(ConsentEvent::ReceivedDeny),
        };

        // A slot is only created by a transition out of Unknown.
        let mut slot = match self.peers.entry(peer.clone()) {
            Entry::Occupied(occupied) => occupied.into_ref(),
            Entry::Vacant(vacant) => {
                if event.and_then(|e| transition(ConsentState::Unknown, e)).is_none() {
                    debug!(peer = %peer, kind = %envelope.kind(), "Dropped envelope from unknown peer");
                    return outcome;
                }
                vacant.insert(PeerSlot::new(&peer))
            }
        };
        let state = slot.record.state;

        let Some(event) = event else {
            match state {
                ConsentState::Granted => outcome.deliver.push(envelope),
                ConsentState::PendingInbound | ConsentState::PendingOutbound => {
                    let max = self.policy.max_buffered;
                    push_bounded(&mut slot.withheld, envelope, max, &peer, "withheld");
                    debug!(peer = %peer, %state, "Withholding data until consent resolves");
                }
                _ => warn!(peer = %peer, %state, "Dropped data from unconsented peer"),
            }
            return outcome;
        };

        let Some(t) = transition(state, event) else {
            debug!(peer = %peer, %state, kind = %envelope.kind(), "Ignored consent envelope");
            return outcome;
        };

        slot.apply(t.to);
        outcome.reply = t.emit;
        outcome.notice = match (t.from, t.to) {
            (_, ConsentState::PendingInbound) => Some(ConsentNotice::Requested),
            (ConsentState::Granted, ConsentState::Granted) => None,
            (_, ConsentState::Granted) => Some(ConsentNotice::Granted),
            (_, ConsentState::Denied) => Some(ConsentNotice::Denied),
            _ => None,
        };
        if t.to == ConsentState::Granted {
            outcome.deliver.extend(slot.withheld.drain(..));
        }
        outcome
    }
}
