//! MessageCodec: signs outgoing envelopes and verifies incoming ones.
//!
//! Verification order is fixed: parse, sender key lookup, signature,
//! recipient, replay, timestamp window. Nothing is recorded until every check
//! has passed, so a forged or stale envelope never advances replay state.

use crate::canonical::canonical_bytes;
use crate::directory::KeyDirectory;
use crate::replay::{NonceCounter, ReplayGuard};
use airc_types::signing::verify_detached;
use airc_types::{
    AircError, AircResult, Envelope, EnvelopeKind, UnsignedEnvelope, VerificationError,
};
use ed25519_dalek::Signature;
use tracing::{debug, warn};

/// Default accepted clock skew for inbound timestamps (5 minutes).
pub const DEFAULT_SKEW_MS: i64 = 5 * 60 * 1000;

/// Something that can sign on behalf of one agent identity.
pub trait EnvelopeSigner: Send + Sync {
    /// The agent name placed in `from`.
    fn agent_name(&self) -> &str;

    /// Deterministic Ed25519 signature over `message`.
    fn sign(&self, message: &[u8]) -> Signature;
}

/// Envelope codec bound to the local agent.
#[derive(Debug)]
pub struct MessageCodec {
    local_name: String,
    nonces: NonceCounter,
    replay: ReplayGuard,
    skew_window_ms: i64,
}

impl MessageCodec {
    /// Create a codec for `local_name` with the given nonce source.
    pub fn new(local_name: impl Into<String>, nonces: NonceCounter) -> Self {
        Self {
            local_name: local_name.into(),
            nonces,
            replay: ReplayGuard::new(),
            skew_window_ms: DEFAULT_SKEW_MS,
        }
    }

    /// Override the clock-skew window.
    pub fn with_skew_window_ms(mut self, window_ms: i64) -> Self {
        self.skew_window_ms = window_ms.max(0);
        self
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Last outbound nonce issued.
    pub fn current_nonce(&self) -> u64 {
        self.nonces.current()
    }

    /// Highest nonce accepted from `sender`.
    pub fn last_accepted_nonce(&self, sender: &str) -> Option<u64> {
        self.replay.last_accepted(sender)
    }

    /// Build and sign an envelope from the local identity.
    pub fn encode(
        &self,
        signer: &dyn EnvelopeSigner,
        to: &str,
        kind: EnvelopeKind,
        payload: Vec<u8>,
    ) -> AircResult<Envelope> {
        self.encode_at(signer, to, kind, payload, now_ms())
    }

    fn encode_at(
        &self,
        signer: &dyn EnvelopeSigner,
        to: &str,
        kind: EnvelopeKind,
        payload: Vec<u8>,
        timestamp: i64,
    ) -> AircResult<Envelope> {
        let nonce = self.nonces.next()?;
        let header = UnsignedEnvelope {
            from: signer.agent_name().to_string(),
            to: to.to_string(),
            kind,
            payload,
            nonce,
            timestamp,
        };
        let canonical =
            canonical_bytes(&header).map_err(|e| AircError::Serialization(e.to_string()))?;
        let signature = signer.sign(&canonical);
        debug!(to, %kind, nonce, "Encoded envelope");
        Ok(Envelope::from_parts(header, signature.to_bytes().to_vec()))
    }

    /// Serialize an envelope to its JSON wire form.
    pub fn to_wire(envelope: &Envelope) -> AircResult<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }

    /// Parse and verify a raw wire envelope.
    pub fn decode_and_verify(
        &self,
        raw: &[u8],
        directory: &KeyDirectory,
    ) -> Result<Envelope, VerificationError> {
        self.decode_and_verify_at(raw, directory, now_ms())
    }

    /// Verify an envelope already parsed from a JSON body.
    pub fn verify_value(
        &self,
        value: serde_json::Value,
        directory: &KeyDirectory,
    ) -> Result<Envelope, VerificationError> {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        self.verify_at(envelope, directory, now_ms())
    }

    fn decode_and_verify_at(
        &self,
        raw: &[u8],
        directory: &KeyDirectory,
        now: i64,
    ) -> Result<Envelope, VerificationError> {
        let envelope: Envelope = serde_json::from_slice(raw)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        self.verify_at(envelope, directory, now)
    }

    fn verify_at(
        &self,
        envelope: Envelope,
        directory: &KeyDirectory,
        now: i64,
    ) -> Result<Envelope, VerificationError> {
        let from = envelope.from().to_string();

        let key = directory
            .public_key(&from)
            .ok_or_else(|| VerificationError::UnknownSender(from.clone()))?;

        let canonical = canonical_bytes(envelope.header())
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        if let Err(e) = verify_detached(&key, &canonical, envelope.signature()) {
            warn!(from = %from, error = %e, "Envelope signature rejected");
            return Err(VerificationError::SignatureMismatch(from));
        }

        if envelope.to() != self.local_name {
            return Err(VerificationError::WrongRecipient {
                to: envelope.to().to_string(),
                local: self.local_name.clone(),
            });
        }

        self.replay.check(&from, envelope.nonce())?;

        // abs_diff: sender-chosen timestamps may sit at the ends of i64.
        let skew_ms = now.abs_diff(envelope.timestamp());
        if skew_ms > self.skew_window_ms.unsigned_abs() {
            return Err(VerificationError::StaleTimestamp {
                from,
                skew_ms,
                window_ms: self.skew_window_ms,
            });
        }

        self.replay.commit(&from, envelope.nonce())?;
        Ok(envelope)
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
