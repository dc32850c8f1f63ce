//! AIRC client: who's here, who are you, can we talk.
//!
//! Composes the key store, envelope codec, consent engine, and presence
//! session into four relay operations: [`Client::register`],
//! [`Client::heartbeat`], [`Client::send`], and [`Client::poll`], plus the
//! local consent actions that answer inbound requests.

pub mod background;
pub mod client;
pub mod config;
pub mod consent;
pub mod keystore;
pub mod presence;
pub mod recovery;
pub mod relay;
pub mod retry;

pub use background::MaintenanceHandle;
pub use client::{Client, PollEvent, SendOutcome};
pub use consent::{ConsentEngine, ConsentPolicy, LocalAction, SendPlan};
pub use keystore::{Identity, KeyStore};
pub use presence::PresenceSession;
pub use recovery::RecoveryKey;
pub use relay::{HttpRelay, RelayTransport};
