//! `airc`: command-line agent for the AIRC protocol.

mod cli;
mod cmd;
mod ui;

use clap::Parser;
use cli::{Cli, Commands};

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let config = cmd::resolve_config(cli.config, cli.agent);

    match cli.command {
        Commands::Identity { json } => cmd::identity::cmd_identity(config, json),
        Commands::Register => cmd::presence::cmd_register(config),
        Commands::Heartbeat => cmd::presence::cmd_heartbeat(config),
        Commands::Poll { json } => cmd::presence::cmd_poll(config, json),
        Commands::Trust { peer, public_key } => cmd::identity::cmd_trust(config, &peer, &public_key),
        Commands::Recovery(sub) => cmd::identity::cmd_recovery(config, sub),
        Commands::Run { status } => cmd::run::cmd_run(config, status),
    }
}
