//! `airc run`: an interactive session that stays present on the relay.
//!
//! Heartbeat and poll run in the background; inbound events are printed as
//! they arrive and stdin lines drive sends and consent decisions.

use super::{fail, fix_for, open_client, runtime};
use crate::cmd::presence::print_event;
use crate::ui;
use airc_client::client::normalize_name;
use airc_client::{Client, SendOutcome};
use airc_types::config::ClientConfig;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const HELP: &str = "@peer <text> | /send <peer> <text> | /grant /deny /block /unblock /reset <peer> \
| /trust <peer> <key> | /peers | /status <text> | /quit";

/// One line of input in `run` mode.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Send { to: String, text: String },
    Grant(String),
    Deny(String),
    Block(String),
    Unblock(String),
    Reset(String),
    Trust { peer: String, key: String },
    Peers,
    Status(String),
    Help,
    Quit,
    Empty,
    Invalid(String),
}

fn parse_line(input: &str) -> Line {
    let input = input.trim();
    if input.is_empty() {
        return Line::Empty;
    }
    if let Some(rest) = input.strip_prefix('@') {
        return match rest.split_once(char::is_whitespace) {
            Some((to, text)) if !text.trim().is_empty() => Line::Send {
                to: normalize_name(to),
                text: text.trim().to_string(),
            },
            _ => Line::Invalid("usage: @peer <text>".into()),
        };
    }

    let (command, rest) = input
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((input, ""));
    let peer = || normalize_name(rest);

    match command {
        "/send" => match rest.split_once(char::is_whitespace) {
            Some((to, text)) if !text.trim().is_empty() => Line::Send {
                to: normalize_name(to),
                text: text.trim().to_string(),
            },
            _ => Line::Invalid("usage: /send <peer> <text>".into()),
        },
        "/grant" | "/deny" | "/block" | "/unblock" | "/reset" if rest.is_empty() => {
            Line::Invalid(format!("usage: {command} <peer>"))
        }
        "/grant" => Line::Grant(peer()),
        "/deny" => Line::Deny(peer()),
        "/block" => Line::Block(peer()),
        "/unblock" => Line::Unblock(peer()),
        "/reset" => Line::Reset(peer()),
        "/trust" => match rest.split_once(char::is_whitespace) {
            Some((who, key)) if !key.trim().is_empty() => Line::Trust {
                peer: normalize_name(who),
                key: key.trim().to_string(),
            },
            _ => Line::Invalid("usage: /trust <peer> <public_key>".into()),
        },
        "/peers" => Line::Peers,
        "/status" if !rest.is_empty() => Line::Status(rest.to_string()),
        "/status" => Line::Invalid("usage: /status <text>".into()),
        "/help" | "/?" => Line::Help,
        "/quit" | "/exit" => Line::Quit,
        other => Line::Invalid(format!("unknown command: {other}")),
    }
}

pub fn cmd_run(config: ClientConfig, status: Option<String>) {
    let client = Arc::new(open_client(config));
    if let Some(status) = status {
        client.set_presence_status(status);
    }

    let rt = runtime();
    rt.block_on(async move {
        match client.register().await {
            Ok(_) => ui::success(&format!("@{} is online", client.agent_name())),
            Err(e) if e.is_fatal() => fail(&e),
            Err(e) => ui::warn_with_fix(&e.to_string(), "will keep retrying in the background"),
        }
        ui::kv("Fingerprint", &client.identity().fingerprint());
        ui::hint(HELP);
        ui::blank();

        let (tx, mut rx) = mpsc::channel(64);
        let handle = client.spawn_maintenance(tx);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = rx.recv() => match event {
                    Some(event) => print_event(&event),
                    None => {
                        ui::error("Maintenance loop stopped");
                        break;
                    }
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if !handle_line(&client, parse_line(&line)).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        ui::error(&format!("stdin: {e}"));
                        break;
                    }
                },
            }
        }

        handle.stop().await;
        ui::success("Goodbye");
    });
}

/// Returns `false` when the session should end.
async fn handle_line(client: &Client, line: Line) -> bool {
    let result = match line {
        Line::Empty => Ok(()),
        Line::Quit => return false,
        Line::Help => {
            ui::hint(HELP);
            Ok(())
        }
        Line::Invalid(msg) => {
            ui::error(&msg);
            Ok(())
        }
        Line::Send { to, text } => client
            .send(&to, text.into_bytes())
            .await
            .map(|outcome| report_send(&to, &outcome)),
        Line::Grant(peer) => client.grant(&peer).await.map(|()| ui::success(&format!("Granted @{peer}"))),
        Line::Deny(peer) => client.deny(&peer).await.map(|()| ui::success(&format!("Denied @{peer}"))),
        Line::Block(peer) => client.block(&peer).await.map(|()| ui::success(&format!("Blocked @{peer}"))),
        Line::Unblock(peer) => client
            .unblock(&peer)
            .await
            .map(|()| ui::success(&format!("Unblocked @{peer}"))),
        Line::Reset(peer) => client.reset(&peer).await.map(|()| ui::success(&format!("Reset @{peer}"))),
        Line::Trust { peer, key } => client
            .trust_peer(&peer, &key)
            .map(|()| ui::success(&format!("Pinned key for @{peer}"))),
        Line::Peers => {
            print_peers(client);
            Ok(())
        }
        Line::Status(status) => {
            client.set_presence_status(status.clone());
            ui::success(&format!("Status: {status}"));
            Ok(())
        }
    };

    match result {
        Ok(()) => true,
        Err(e) if e.is_fatal() => fail(&e),
        Err(e) => {
            ui::error_with_fix(&e.to_string(), fix_for(&e));
            true
        }
    }
}

fn report_send(to: &str, outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Delivered { .. } => {}
        SendOutcome::ConsentRequested { .. } => {
            ui::kv_warn("Pending", &format!("asked @{to} for consent; message queued"))
        }
        SendOutcome::Queued => ui::kv_warn("Pending", &format!("still waiting on @{to}; message queued")),
        SendOutcome::AwaitingLocalDecision => {
            ui::warn_with_fix(&format!("@{to} asked first"), &format!("/grant {to}"))
        }
        SendOutcome::Denied => ui::error(&format!("@{to} denied consent")),
        SendOutcome::Blocked => ui::error(&format!("@{to} is blocked")),
    }
}

fn print_peers(client: &Client) {
    let records = client.consent_records();
    if records.is_empty() {
        ui::hint("No peers yet.");
        return;
    }
    ui::section("Peers");
    for record in records {
        let state = record.state.to_string();
        let label = format!("@{}", record.peer);
        if record.state.permits_data() {
            ui::kv_ok(&label, &state);
        } else if record.state.is_pending() {
            ui::kv_warn(&label, &state);
        } else {
            ui::kv(&label, &state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_at_send() {
        assert_eq!(
            parse_line("@scout  hello there "),
            Line::Send {
                to: "scout".into(),
                text: "hello there".into()
            }
        );
        assert!(matches!(parse_line("@scout"), Line::Invalid(_)));
    }

    #[test]
    fn test_parse_slash_commands() {
        assert_eq!(
            parse_line("/send @relay-bot ping"),
            Line::Send {
                to: "relay-bot".into(),
                text: "ping".into()
            }
        );
        assert_eq!(parse_line("/grant @scout"), Line::Grant("scout".into()));
        assert_eq!(parse_line("/block scout"), Line::Block("scout".into()));
        assert_eq!(parse_line("/reset scout"), Line::Reset("scout".into()));
        assert_eq!(
            parse_line("/trust scout AAAA"),
            Line::Trust {
                peer: "scout".into(),
                key: "AAAA".into()
            }
        );
        assert_eq!(parse_line("/status busy"), Line::Status("busy".into()));
        assert_eq!(parse_line("/peers"), Line::Peers);
        assert_eq!(parse_line("/quit"), Line::Quit);
        assert_eq!(parse_line("   "), Line::Empty);
    }

    #[test]
    fn test_parse_rejects_missing_arguments() {
        assert!(matches!(parse_line("/grant"), Line::Invalid(_)));
        assert!(matches!(parse_line("/trust scout"), Line::Invalid(_)));
        assert!(matches!(parse_line("/status"), Line::Invalid(_)));
        assert!(matches!(parse_line("/frobnicate"), Line::Invalid(_)));
    }
}
