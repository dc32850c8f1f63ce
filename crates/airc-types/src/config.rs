//! Client configuration types.
//!
//! Loaded from `~/.airc/config.toml` (or an explicit path) by the client's
//! config loader. Every field has a default so a missing file is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default relay/registry base URL.
pub const DEFAULT_REGISTRY: &str = "https://slashvibe.dev";

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Agent name claimed at the relay.
    pub agent_name: String,
    /// Relay base URL.
    pub registry_url: String,
    /// Directory holding the signing keypair.
    pub key_dir: PathBuf,
    /// Directory holding the recovery keypair.
    pub recovery_dir: PathBuf,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// Accepted clock skew for inbound envelope timestamps.
    pub clock_skew_secs: u64,
    /// Heartbeat cadence for the maintenance loop.
    pub heartbeat_interval_secs: u64,
    /// Poll cadence for the maintenance loop.
    pub poll_interval_secs: u64,
    /// Minimum age of an unanswered consent request before a send re-emits it.
    pub consent_retry_secs: u64,
    /// Inbound data buffered per pending peer before the oldest is dropped.
    pub max_withheld_per_peer: usize,
    /// Status string carried by heartbeats.
    pub presence_status: String,
    /// Attach `X-AIRC-Identity`/`X-AIRC-Signature` headers to relay POSTs.
    pub sign_requests: bool,
    /// Retry policy for idempotent relay calls.
    pub retry: RetrySettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let home = airc_home();
        Self {
            agent_name: String::new(),
            registry_url: DEFAULT_REGISTRY.to_string(),
            key_dir: home.join("keys"),
            recovery_dir: home.join("recovery"),
            request_timeout_secs: 30,
            clock_skew_secs: 300,
            heartbeat_interval_secs: 5,
            poll_interval_secs: 3,
            consent_retry_secs: 300,
            max_withheld_per_peer: 64,
            presence_status: "available".to_string(),
            sign_requests: false,
            retry: RetrySettings::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults for a named agent.
    pub fn for_agent(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            ..Self::default()
        }
    }

    /// Check values that would make the client unusable.
    pub fn validate(&self) -> Result<(), String> {
        let name = self.agent_name.trim_start_matches('@');
        if name.is_empty() {
            return Err("agent_name must be set".into());
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!(
                "agent_name '{name}' may only contain ASCII letters, digits, '_' and '-'"
            ));
        }
        if !(self.registry_url.starts_with("http://") || self.registry_url.starts_with("https://"))
        {
            return Err(format!(
                "registry_url '{}' must be an http(s) URL",
                self.registry_url
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be > 0".into());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".into());
        }
        Ok(())
    }
}

/// Retry policy knobs (exponential backoff with jitter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts including the first try.
    pub max_attempts: u32,
    /// First backoff delay.
    pub min_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_ms: u64,
    /// Jitter factor in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.1,
        }
    }
}

/// Default AIRC home directory (`~/.airc`).
pub fn airc_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".airc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.registry_url, DEFAULT_REGISTRY);
        assert_eq!(config.clock_skew_secs, 300);
        assert!(config.key_dir.ends_with("keys"));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            agent_name = "scout"
            [retry]
            max_attempts = 5
        "#,
        )
        .unwrap();
        assert_eq!(config.agent_name, "scout");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.min_delay_ms, 500);
        assert_eq!(config.poll_interval_secs, 3);
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::default().validate().is_err());
        assert!(ClientConfig::for_agent("scout").validate().is_ok());
        assert!(ClientConfig::for_agent("@scout").validate().is_ok());
        assert!(ClientConfig::for_agent("sc out").validate().is_err());

        let mut config = ClientConfig::for_agent("scout");
        config.registry_url = "ftp://relay".into();
        assert!(config.validate().is_err());
    }
}
