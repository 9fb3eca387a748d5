// ──────────────────────────────────────────────────────────────
//  adbridge — Configuration File System
//  Loads settings from ~/.adbridge/config.toml with sensible defaults.
//  Secrets can also come from the environment so they never touch disk.
// ──────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::simulator::Policy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("invalid {key} value {value:?}")]
    Env { key: &'static str, value: String },
}

// ── Top-Level Config ───────────────────────────────────────────

/// Root configuration structure. Maps 1:1 to config.toml sections.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdbridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ── Section: Server ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to bind the gateway
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

fn default_listen_addr() -> String { "127.0.0.1".into() }
fn default_listen_port() -> u16 { 8787 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }
}

// ── Section: Graph ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphConfig {
    /// Remote Graph API origin, without version
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Long-lived access token. Prefer META_ACCESS_TOKEN.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Ad account id, with or without the `act_` prefix
    #[serde(default)]
    pub ad_account_id: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Connection pool idle timeout in seconds
    #[serde(default = "default_pool_idle")]
    pub pool_idle_timeout_secs: u64,
    /// Max idle connections per host
    #[serde(default = "default_pool_max")]
    pub pool_max_idle_per_host: usize,
}

fn default_base_url() -> String { "https://graph.facebook.com".into() }
fn default_api_version() -> String { "v19.0".into() }
fn default_timeout() -> u64 { 30 }
fn default_pool_idle() -> u64 { 90 }
fn default_pool_max() -> usize { 10 }

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_version: default_api_version(),
            access_token: None,
            ad_account_id: None,
            timeout_secs: default_timeout(),
            pool_idle_timeout_secs: default_pool_idle(),
            pool_max_idle_per_host: default_pool_max(),
        }
    }
}

// ── Section: Auth ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared secret expected in the X-API-Key header. Prefer ADBRIDGE_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,
}

// ── Section: Logging ───────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error. RUST_LOG wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String { "info".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

// ── Loader ─────────────────────────────────────────────────────

impl AdbridgeConfig {
    /// Load configuration from `~/.adbridge/config.toml`, then apply
    /// environment overrides. A missing file means compiled defaults; a file
    /// that exists but can't be read or parsed is an error, never a silent
    /// fallback.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?.unwrap_or_default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(config))
    }

    /// Overlay environment variables. Takes a lookup function so tests
    /// don't have to mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("ADBRIDGE_API_KEY") {
            self.auth.api_key = Some(v);
        }
        if let Some(v) = non_empty("META_ACCESS_TOKEN") {
            self.graph.access_token = Some(v);
        }
        if let Some(v) = non_empty("META_AD_ACCOUNT_ID") {
            self.graph.ad_account_id = Some(v);
        }
        if let Some(v) = non_empty("META_API_VERSION") {
            self.graph.api_version = v;
        }
        if let Some(v) = non_empty("ADBRIDGE_PORT") {
            self.server.listen_port = v.trim().parse::<u16>().map_err(|_| ConfigError::Env {
                key: "ADBRIDGE_PORT",
                value: v,
            })?;
        }
        Ok(())
    }

    /// Path to config file: ~/.adbridge/config.toml
    pub fn config_path() -> PathBuf {
        let home = dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."));
        home.join(".adbridge").join("config.toml")
    }

    /// Write the default config to disk (for `adbridge init`).
    pub fn write_defaults(path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let default_content = include_str!("../config/adbridge.toml");
        std::fs::write(path, default_content)?;
        info!("Default configuration written to {}", path.display());
        Ok(())
    }

    /// Copy of the config safe to print: secrets replaced by a marker.
    pub fn redacted(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "********".to_string());
        let mut copy = self.clone();
        copy.auth.api_key = mask(&self.auth.api_key);
        copy.graph.access_token = mask(&self.graph.access_token);
        copy
    }
}

// ── Tests ──────────────────────────────────────────────────────
