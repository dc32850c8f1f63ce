//! Clap CLI definitions for the `airc` agent.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AIRC: signed identity, presence, and consent-gated messaging for agents.
#[derive(Parser)]
#[command(name = "airc", version, about)]
pub struct Cli {
    /// Path to config file (defaults to ~/.airc/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Act as this agent instead of the configured `agent_name`.
    #[arg(long, global = true)]
    pub agent: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show (creating on first use) this agent's signing identity.
    Identity {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Register with the relay and print the session.
    Register,
    /// Register if needed, then send one heartbeat.
    Heartbeat,
    /// Poll once and print what arrived.
    Poll {
        /// Output as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Pin a peer's public key so relay lookups can never replace it.
    Trust {
        /// Peer agent name.
        peer: String,
        /// Base64-encoded Ed25519 public key.
        public_key: String,
    },
    /// Offline recovery key management.
    #[command(subcommand)]
    Recovery(RecoveryCommands),
    /// Stay online: heartbeat and poll in the background, read commands from stdin.
    Run {
        /// Presence status to advertise.
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum RecoveryCommands {
    /// Show (creating on first use) the recovery key.
    Show,
    /// Print a signed proof rotating the identity to a new public key.
    Rotate {
        /// Base64-encoded new Ed25519 public key.
        new_public_key: String,
    },
    /// Print a signed revocation proof for this agent.
    Revoke {
        /// Why the identity is being revoked.
        #[arg(long, default_value = "key compromised")]
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["airc", "poll", "--json", "--agent", "@scout"]).unwrap();
        assert_eq!(cli.agent.as_deref(), Some("@scout"));
        assert!(matches!(cli.command, Commands::Poll { json: true }));
    }

    #[test]
    fn test_recovery_revoke_default_reason() {
        let cli = Cli::try_parse_from(["airc", "recovery", "revoke"]).unwrap();
        match cli.command {
            Commands::Recovery(RecoveryCommands::Revoke { reason }) => {
                assert_eq!(reason, "key compromised")
            }
            _ => panic!("expected recovery revoke"),
        }
    }
}
