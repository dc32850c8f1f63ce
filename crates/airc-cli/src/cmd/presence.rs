//! One-shot relay commands: register, heartbeat, poll.

use super::{fail, open_client, runtime};
use crate::ui;
use airc_client::PollEvent;
use airc_types::config::ClientConfig;
use airc_types::Session;

fn print_session(session: &Session) {
    ui::kv("Token", &format!("{}...", session.token.chars().take(8).collect::<String>()));
    let expires = session
        .expires_at()
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    ui::kv("Expires", &expires);
    ui::kv("TTL", &format!("{}s", session.ttl_secs));
}

pub fn cmd_register(config: ClientConfig) {
    let registry = config.registry_url.clone();
    let client = open_client(config);
    let rt = runtime();
    match rt.block_on(client.register()) {
        Ok(session) => {
            ui::success(&format!("Registered @{} with {registry}", client.agent_name()));
            print_session(&session);
        }
        Err(e) => fail(&e),
    }
}

pub fn cmd_heartbeat(config: ClientConfig) {
    let client = open_client(config);
    let rt = runtime();
    match rt.block_on(client.heartbeat()) {
        Ok(session) => {
            ui::success(&format!("@{} is present", client.agent_name()));
            print_session(&session);
        }
        Err(e) => fail(&e),
    }
}

pub fn cmd_poll(config: ClientConfig, json: bool) {
    let client = open_client(config);
    let rt = runtime();
    let events = match rt.block_on(client.poll()) {
        Ok(events) => events,
        Err(e) => fail(&e),
    };

    if json {
        for event in &events {
            println!("{}", event_json(event));
        }
        return;
    }
    if events.is_empty() {
        ui::hint("Nothing new.");
        return;
    }
    for event in &events {
        print_event(event);
    }
}

pub(crate) fn event_json(event: &PollEvent) -> serde_json::Value {
    match event {
        PollEvent::Message {
            from,
            payload,
            nonce,
            timestamp,
        } => serde_json::json!({
            "type": "message",
            "from": from,
            "payload": String::from_utf8_lossy(payload),
            "nonce": nonce,
            "timestamp": timestamp,
        }),
        PollEvent::ConsentRequested { from } => {
            serde_json::json!({ "type": "consent_requested", "from": from })
        }
        PollEvent::ConsentGranted { from } => {
            serde_json::json!({ "type": "consent_granted", "from": from })
        }
        PollEvent::ConsentDenied { from } => {
            serde_json::json!({ "type": "consent_denied", "from": from })
        }
    }
}

pub(crate) fn print_event(event: &PollEvent) {
    match event {
        PollEvent::Message { from, payload, .. } => {
            ui::incoming(from, &String::from_utf8_lossy(payload));
        }
        PollEvent::ConsentRequested { from } => {
            ui::warn_with_fix(
                &format!("@{from} asks to talk"),
                &format!("/grant {from}  or  /deny {from}"),
            );
        }
        PollEvent::ConsentGranted { from } => ui::success(&format!("@{from} granted consent")),
        PollEvent::ConsentDenied { from } => ui::error(&format!("@{from} denied consent")),
    }
}
