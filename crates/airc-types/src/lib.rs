//! Core types for the AIRC protocol client.
//!
//! This crate defines the data model shared by the wire codec and the client:
//! signed envelopes, consent records, presence sessions, configuration, and
//! the error taxonomy. It contains no business logic.

pub mod config;
pub mod consent;
pub mod envelope;
pub mod error;
pub mod serde_compat;
pub mod session;
pub mod signing;

pub use consent::{ConsentRecord, ConsentState};
pub use envelope::{Envelope, EnvelopeKind, UnsignedEnvelope};
pub use error::{AircError, AircResult, VerificationError};
pub use session::Session;
