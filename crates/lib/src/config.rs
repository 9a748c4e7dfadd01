//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.agentchat/config.json`) and environment.
//! Every section is optional; a missing file yields the defaults.

use crate::agents::AgentKey;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend messaging endpoint settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Widget server (HTTP + WebSocket) settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-agent profile overrides.
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Where agent messages are posted and how long to wait for a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Full URL of the generic messaging endpoint. Overridden by AGENTCHAT_ENDPOINT env.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds (default 30). A timeout counts as a connectivity failure.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8000/api/agent/message".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Widget server bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for HTTP and WebSocket (default 15152).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_port() -> u16 {
    15152
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
        }
    }
}

/// Optional overrides per agent. Absent agents keep their compiled-in profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support: Option<AgentOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sales: Option<AgentOverride>,
}

impl AgentsConfig {
    pub fn get(&self, key: AgentKey) -> Option<&AgentOverride> {
        match key {
            AgentKey::Support => self.support.as_ref(),
            AgentKey::Sales => self.sales.as_ref(),
        }
    }
}

/// Profile fields that may be overridden. Empty strings are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOverride {
    /// Id sent to the backend as `agent_id`.
    pub remote_id: Option<String>,
    pub display_title: Option<String>,
    pub welcome_text: Option<String>,
    pub initial_suggestions: Option<Vec<String>>,
}

/// Resolve the messaging endpoint: env AGENTCHAT_ENDPOINT overrides config.
pub fn resolve_endpoint(config: &Config) -> String {
    std::env::var("AGENTCHAT_ENDPOINT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.transport.endpoint.trim().to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("AGENTCHAT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".agentchat").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or AGENTCHAT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Create the config directory and write a default config file if none exists.
/// Returns true when a file was written.
pub fn init_config_file(path: &Path) -> Result<bool> {
    if path.exists() {
        log::debug!("config already exists at {}, skipping", path.display());
        return Ok(false);
    }
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating config directory {}", dir.display()))?;
    let body = serde_json::to_string_pretty(&Config::default())
        .context("serializing default config")?;
    std::fs::write(path, body)
        .with_context(|| format!("writing default config to {}", path.display()))?;
    log::info!("created default config at {}", path.display());
    Ok(true)
}
