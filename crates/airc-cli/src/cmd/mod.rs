//! Command implementations by domain.

pub mod identity;
pub mod presence;
pub mod run;

use crate::ui;
use airc_client::client::normalize_name;
use airc_client::config::load_config;
use airc_client::Client;
use airc_types::config::ClientConfig;
use airc_types::AircError;
use std::path::PathBuf;

/// Config file plus the `--agent` override.
pub(crate) fn resolve_config(config: Option<PathBuf>, agent: Option<String>) -> ClientConfig {
    let mut resolved = load_config(config.as_deref());
    if let Some(agent) = agent {
        resolved.agent_name = normalize_name(&agent);
    }
    if let Err(e) = resolved.validate() {
        ui::error_with_fix(&e, "set agent_name and registry_url in ~/.airc/config.toml");
        std::process::exit(1);
    }
    resolved
}

pub(crate) fn open_client(config: ClientConfig) -> Client {
    match Client::new(config) {
        Ok(client) => client,
        Err(e) => fail(&e),
    }
}

pub(crate) fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    }
}

/// Print `e` with a remedy and exit.
pub(crate) fn fail(e: &AircError) -> ! {
    ui::error_with_fix(&e.to_string(), fix_for(e));
    std::process::exit(1);
}

pub(crate) fn fix_for(e: &AircError) -> &'static str {
    match e {
        AircError::KeyStoreCorrupt(_) => {
            "inspect the key file under key_dir; move it aside only if you mean to abandon this identity"
        }
        AircError::InvalidKeyProof(_) => "check that the system clock is in sync",
        AircError::NameConflict(_) => {
            "choose another agent_name, or restore the key that registered this name"
        }
        AircError::RelayUnreachable(_) | AircError::Timeout(_) => {
            "check registry_url in ~/.airc/config.toml and that the relay is up"
        }
        AircError::SessionExpired | AircError::PresenceLost { .. } => {
            "run `airc register` and try again"
        }
        AircError::InvalidConsentAction { .. } => "run `/peers` in `airc run` to see consent states",
        AircError::Config(_) => "edit ~/.airc/config.toml",
        _ => "re-run with RUST_LOG=debug for details",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_for_fatal_errors_never_suggests_deleting_keys() {
        let fix = fix_for(&AircError::KeyStoreCorrupt("bad".into()));
        assert!(fix.contains("only if"));
        assert!(fix_for(&AircError::Timeout("x".into())).contains("registry_url"));
        assert!(fix_for(&AircError::SessionExpired).contains("airc register"));
    }
}
