//! AIRC wire layer: envelope codec and relay message bodies.
//!
//! ## Architecture
//!
//! - **canonical**: byte-exact signing input shared by every implementation
//! - **MessageCodec**: signs outgoing envelopes, verifies incoming ones
//! - **KeyDirectory**: public keys of known senders
//! - **NonceCounter / ReplayGuard**: outbound nonce source, inbound replay state
//! - **message**: request/response bodies of the relay contract

pub mod canonical;
pub mod codec;
pub mod directory;
pub mod message;
pub mod replay;

pub use codec::{EnvelopeSigner, MessageCodec};
pub use directory::{KeyDirectory, KeySource, KnownKey, PinOutcome};
pub use replay::{NonceCounter, ReplayGuard};
