use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.ringmaster/config.toml`.
///
/// Sections correspond to the ambient concerns the engine's components
/// need at startup (worker pool sizing, scheduler cadence, enrichment
/// budgets) rather than to the components themselves — `Store`, `Event
/// Bus`, and the rest take their constructor arguments from whatever
/// wires them together (`Daemon::new`), not from this struct directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub enrichment: crate::enrichment::EnrichmentConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            store: StoreConfig::default(),
            agents: AgentsConfig::default(),
            scheduler: SchedulerSettings::default(),
            enrichment: crate::enrichment::EnrichmentConfig::default(),
            security: SecurityConfig::default(),
            daemon: DaemonConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.ringmaster/config.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            let text =
                std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let cfg: Config =
                toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
            cfg.validate()?;
            Ok(cfg)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject settings that would otherwise fail confusingly deep inside
    /// the scheduler or enrichment pipeline (e.g. a zero concurrency cap
    /// would silently starve every bead).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "agents.max_concurrent must be at least 1".into(),
            ));
        }
        if self.scheduler.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.poll_interval_secs must be at least 1".into(),
            ));
        }
        if self.enrichment.max_context_tokens == 0 {
            return Err(ConfigError::Invalid(
                "enrichment.max_context_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ringmaster")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub workspace_root: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
            workspace_root: None,
        }
    }
}

fn default_project_name() -> String {
    "ringmaster".into()
}
fn default_log_level() -> String {
    "info".into()
}

/// C1 Store backend selection. The engine ships one in-memory backend
/// (SPEC_FULL.md §4.1); `db_path` is read by a future persistent backend
/// and otherwise ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            db_path: default_store_db_path(),
        }
    }
}

fn default_store_backend() -> String {
    "memory".into()
}
fn default_store_db_path() -> String {
    "~/.ringmaster/ringmaster.db".into()
}

/// Worker-pool sizing (C8/C10's concurrency cap source when not overridden
/// by `[scheduler]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_max_agents")]
    pub max_concurrent: u32,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub auto_restart: bool,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_agents(),
            heartbeat_interval_secs: default_heartbeat(),
            auto_restart: false,
        }
    }
}

fn default_max_agents() -> u32 {
    8
}
fn default_heartbeat() -> u64 {
    30
}

/// C10 Scheduler poll-loop cadence (SPEC_FULL.md §4.10). Plain seconds
/// rather than `Duration` so this section round-trips through TOML; the
/// daemon converts these into `ringmaster_daemon::scheduler::SchedulerConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            poll_interval_secs: default_poll_interval_secs(),
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

fn default_max_concurrent_tasks() -> usize {
    4
}
fn default_poll_interval_secs() -> u64 {
    2
}
fn default_grace_period_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub allow_shell_exec: bool,
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_shell_exec: false,
            sandbox: default_sandbox(),
            allowed_paths: Vec::new(),
        }
    }
}

fn default_sandbox() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    #[serde(default = "default_daemon_host")]
    pub host: String,
    #[serde(default)]
    pub tls: bool,
    /// Enables the optional hot-reload subsystem (§4.13): watches
    /// `general.config_watch_dir` and re-reads config on change. Off by
    /// default — most deployments restart the daemon to pick up config.
    #[serde(default)]
    pub hot_reload: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_daemon_port(),
            host: default_daemon_host(),
            tls: false,
            hot_reload: false,
        }
    }
}

fn default_daemon_port() -> u16 {
    9876
}
fn default_daemon_host() -> String {
    "127.0.0.1".into()
}

/// HTTP/WebSocket bridge (§6). `api_key_env` names an environment variable
/// holding the key `AuthLayer` enforces; unset means development mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_bridge_buffer")]
    pub output_stream_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_key_env: None,
            allowed_origins: Vec::new(),
            output_stream_buffer: default_bridge_buffer(),
        }
    }
}

fn default_bridge_buffer() -> usize {
    256
}
