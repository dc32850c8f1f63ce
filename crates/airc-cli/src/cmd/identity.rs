//! Identity, key pinning, and recovery key commands.

use super::{fail, open_client};
use crate::cli::RecoveryCommands;
use crate::ui;
use airc_client::client::normalize_name;
use airc_client::{KeyStore, RecoveryKey};
use airc_types::config::ClientConfig;
use airc_types::signing::fingerprint;

pub fn cmd_identity(config: ClientConfig, json: bool) {
    let store = KeyStore::from_config(&config);
    let identity = match store.load_or_create() {
        Ok(identity) => identity,
        Err(e) => fail(&e),
    };

    if json {
        let out = serde_json::json!({
            "agent_name": identity.agent_name(),
            "public_key": identity.public_key_base64(),
            "fingerprint": identity.fingerprint(),
            "created_at": identity.created_at().to_rfc3339(),
            "key_path": store.key_path().display().to_string(),
        });
        println!("{out}");
        return;
    }

    ui::section("Identity");
    ui::kv("Agent", &format!("@{}", identity.agent_name()));
    ui::kv("Public key", &identity.public_key_base64());
    ui::kv("Fingerprint", &identity.fingerprint());
    ui::kv("Created", &identity.created_at().to_rfc3339());
    ui::kv("Key file", &store.key_path().display().to_string());
    ui::blank();
    ui::hint("Share the public key out of band so peers can `airc trust` it.");
}

pub fn cmd_trust(config: ClientConfig, peer: &str, public_key: &str) {
    let client = open_client(config);
    let peer = normalize_name(peer);
    if let Err(e) = client.trust_peer(&peer, public_key) {
        fail(&e);
    }
    ui::success(&format!("Pinned key for @{peer}"));
}

pub fn cmd_recovery(config: ClientConfig, sub: RecoveryCommands) {
    let recovery = match RecoveryKey::from_config(&config) {
        Ok(key) => key,
        Err(e) => fail(&e),
    };

    match sub {
        RecoveryCommands::Show => {
            ui::section("Recovery key");
            ui::kv("Agent", &format!("@{}", config.agent_name));
            ui::kv("Public key", &recovery.public_key_base64());
            ui::kv("Fingerprint", &fingerprint(&recovery.public_key()));
            ui::kv("Key file", &recovery.path().display().to_string());
            ui::blank();
            ui::hint("Keep this file offline. It is the only way to rotate or revoke.");
        }
        RecoveryCommands::Rotate { new_public_key } => {
            match recovery.rotation_proof(new_public_key.trim()) {
                Ok(proof) => println!("{proof}"),
                Err(e) => fail(&e),
            }
        }
        RecoveryCommands::Revoke { reason } => {
            match recovery.revocation_proof(&format!("@{}", config.agent_name), &reason) {
                Ok(proof) => println!("{proof}"),
                Err(e) => fail(&e),
            }
        }
    }
}
