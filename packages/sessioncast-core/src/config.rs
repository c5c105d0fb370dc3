//! Configuration (ambient stack addition): the keys the dependency-injection
//! wrapper would otherwise supply, loaded here from a TOML file layered with
//! environment variables and (by the CLI layer) flags.

use std::time::Duration;

use serde::Deserialize;

use crate::capture::CaptureConfig;
use crate::compressor::DEFAULT_THRESHOLD;
use crate::error::{AgentError, Result};
use crate::transport::TransportConfig;

fn default_relay_url() -> String {
    "wss://relay.sessioncast.io/ws".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_relay_url")]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_true")]
    pub auto_stream_on_create: bool,
}

fn default_initial_delay_ms() -> u64 {
    2000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_circuit_breaker_ms() -> u64 {
    120_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_circuit_breaker_ms")]
    pub circuit_breaker_duration_ms: u64,
}

fn default_active_interval_ms() -> u64 {
    50
}
fn default_idle_interval_ms() -> u64 {
    200
}
fn default_idle_threshold_ms() -> u64 {
    2000
}
fn default_force_send_interval_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    #[serde(default = "default_active_interval_ms")]
    pub active_interval_ms: u64,
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    #[serde(default = "default_idle_threshold_ms")]
    pub idle_threshold_ms: u64,
    #[serde(default = "default_force_send_interval_ms")]
    pub force_send_interval_ms: u64,
}

fn default_compression_threshold() -> usize {
    DEFAULT_THRESHOLD
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompressionSection {
    #[serde(default = "default_compression_threshold")]
    pub threshold: usize,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self { url: default_relay_url(), token: String::new() }
    }
}
impl Default for AgentSection {
    fn default() -> Self {
        Self {
            machine_id: String::new(),
            label: String::new(),
            auto_connect: true,
            auto_stream_on_create: true,
        }
    }
}
impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            circuit_breaker_duration_ms: default_circuit_breaker_ms(),
        }
    }
}
impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            active_interval_ms: default_active_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            idle_threshold_ms: default_idle_threshold_ms(),
            force_send_interval_ms: default_force_send_interval_ms(),
        }
    }
}
impl Default for CompressionSection {
    fn default() -> Self {
        Self { threshold: default_compression_threshold() }
    }
}

/// Top-level configuration. Deserializes from TOML; environment variables
/// prefixed `SESSIONCAST_` and CLI flags are layered on top by the binary
/// (see `sessioncast-agent`), in increasing precedence.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub compression: CompressionSection,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AgentError::ConfigInvalid(e.to_string()))
    }

    /// Apply `SESSIONCAST_`-prefixed environment variable overrides. Called
    /// after loading the TOML file and before CLI flags, per the precedence
    /// order in the specification.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SESSIONCAST_RELAY_URL") {
            self.relay.url = v;
        }
        if let Ok(v) = std::env::var("SESSIONCAST_RELAY_TOKEN") {
            self.relay.token = v;
        }
        if let Ok(v) = std::env::var("SESSIONCAST_AGENT_MACHINE_ID") {
            self.agent.machine_id = v;
        }
        if let Ok(v) = std::env::var("SESSIONCAST_AGENT_LABEL") {
            self.agent.label = v;
        }
    }

    /// Validate the lifecycle contract: `token` and `machine_id` must be
    /// non-empty, or construction fails rather than panicking later.
    pub fn validate(&self) -> Result<()> {
        if self.relay.token.trim().is_empty() {
            return Err(AgentError::ConfigInvalid("relay.token is required".to_string()));
        }
        if self.agent.machine_id.trim().is_empty() {
            return Err(AgentError::ConfigInvalid("agent.machine_id is required".to_string()));
        }
        url::Url::parse(&self.relay.url)
            .map_err(|e| AgentError::ConfigInvalid(format!("relay.url invalid: {e}")))?;
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            relay_url: self.relay.url.clone(),
            token: self.relay.token.clone(),
            machine_id: self.agent.machine_id.clone(),
            label: self.agent.label.clone(),
            reconnect_enabled: self.reconnect.enabled,
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
            circuit_breaker_duration: Duration::from_millis(self.reconnect.circuit_breaker_duration_ms),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            active_interval: Duration::from_millis(self.capture.active_interval_ms),
            idle_interval: Duration::from_millis(self.capture.idle_interval_ms),
            idle_threshold: Duration::from_millis(self.capture.idle_threshold_ms),
            force_send_interval: Duration::from_millis(self.capture.force_send_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_fails_validation() {
        let cfg = Config {
            agent: AgentSection { machine_id: "m1".into(), ..Default::default() },
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(AgentError::ConfigInvalid(_))));
    }

    #[test]
    fn missing_machine_id_fails_validation() {
        let cfg = Config {
            relay: RelaySection { token: "t".into(), ..Default::default() },
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(AgentError::ConfigInvalid(_))));
    }

    #[test]
    fn fully_populated_config_validates() {
        let cfg = Config {
            relay: RelaySection { token: "t".into(), url: default_relay_url() },
            agent: AgentSection { machine_id: "m1".into(), ..Default::default() },
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [relay]
            token = "abc"

            [agent]
            machine_id = "m1"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.relay.url, default_relay_url());
        assert_eq!(cfg.capture.active_interval_ms, default_active_interval_ms());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_override_wins_over_toml() {
        let mut cfg = Config::from_toml_str(
            r#"
            [relay]
            token = "file-token"
            [agent]
            machine_id = "m1"
            "#,
        )
        .unwrap();
        std::env::set_var("SESSIONCAST_RELAY_TOKEN", "env-token");
        cfg.apply_env_overrides();
        std::env::remove_var("SESSIONCAST_RELAY_TOKEN");
        assert_eq!(cfg.relay.token, "env-token");
    }
}
