// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Swarm Configuration
//
// Defines the runtime configuration of one swarm:
// - Identity and on-disk locations (project root, state directory)
// - Dispatch limits (concurrency, cascade depth, cooldown)
// - Turn limits (history window, kernel turns, deadline)
// - Node types that must resolve to a bundle before the scheduler starts
// - Logging settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::events::SwarmId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default = "default_swarm_id")]
    pub swarm_id: SwarmId,

    /// Root of the source tree agents are bound to.
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Directory holding the event log, stores and agent state logs.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Maximum number of turns executing at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Triggers deeper than this are dropped
    #[serde(default = "default_max_trigger_depth")]
    pub max_trigger_depth: u32,

    /// Minimum time between two dispatches of the same agent
    #[serde(default = "default_trigger_cooldown_ms")]
    pub trigger_cooldown_ms: u64,

    #[serde(default = "default_chat_history_limit")]
    pub chat_history_limit: usize,

    /// Previous turns replayed into the kernel input
    #[serde(default = "default_context_history_turns")]
    pub context_history_turns: usize,

    #[serde(default = "default_max_kernel_turns")]
    pub max_kernel_turns: u32,

    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    /// Time in-flight turns get to finish after stop() before being cancelled
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_event_broadcast_capacity")]
    pub event_broadcast_capacity: usize,

    /// Node types that must resolve to a bundle at startup
    #[serde(default)]
    pub node_types: Vec<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            swarm_id: default_swarm_id(),
            project_root: default_project_root(),
            state_dir: default_state_dir(),
            max_concurrency: default_max_concurrency(),
            max_trigger_depth: default_max_trigger_depth(),
            trigger_cooldown_ms: default_trigger_cooldown_ms(),
            chat_history_limit: default_chat_history_limit(),
            context_history_turns: default_context_history_turns(),
            max_kernel_turns: default_max_kernel_turns(),
            turn_timeout_secs: default_turn_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            event_broadcast_capacity: default_event_broadcast_capacity(),
            node_types: Vec::new(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl SwarmConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: SwarmConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Discover configuration file using standard precedence:
    /// 1. TREESWARM_CONFIG_PATH environment variable
    /// 2. ./treeswarm.yaml (working directory)
    /// 3. ~/.treeswarm/config.yaml (user home)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TREESWARM_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./treeswarm.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".treeswarm").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("TREESWARM_MAX_CONCURRENCY") {
            override_parsed("TREESWARM_MAX_CONCURRENCY", &val, &mut self.max_concurrency);
        }
        if let Some(val) = lookup("TREESWARM_MAX_TRIGGER_DEPTH") {
            override_parsed("TREESWARM_MAX_TRIGGER_DEPTH", &val, &mut self.max_trigger_depth);
        }
        if let Some(val) = lookup("TREESWARM_TRIGGER_COOLDOWN_MS") {
            override_parsed("TREESWARM_TRIGGER_COOLDOWN_MS", &val, &mut self.trigger_cooldown_ms);
        }
        if let Some(val) = lookup("TREESWARM_STATE_DIR") {
            tracing::info!("Environment override: TREESWARM_STATE_DIR={}", val);
            self.state_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("TREESWARM_LOG_LEVEL") {
            tracing::info!("Environment override: TREESWARM_LOG_LEVEL={}", val);
            self.log_level = val;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.swarm_id.as_str().is_empty() {
            anyhow::bail!("swarm_id cannot be empty");
        }

        if self.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }

        if self.chat_history_limit == 0 {
            anyhow::bail!("chat_history_limit must be at least 1");
        }

        if self.context_history_turns > self.chat_history_limit {
            anyhow::bail!(
                "context_history_turns ({}) cannot exceed chat_history_limit ({})",
                self.context_history_turns,
                self.chat_history_limit
            );
        }

        if self.max_kernel_turns == 0 {
            anyhow::bail!("max_kernel_turns must be at least 1");
        }

        if self.turn_timeout_secs == 0 {
            anyhow::bail!("turn_timeout_secs must be at least 1");
        }

        if self.event_broadcast_capacity == 0 {
            anyhow::bail!("event_broadcast_capacity must be at least 1");
        }

        if !matches!(self.log_format.as_str(), "compact" | "json") {
            anyhow::bail!("Invalid log_format: '{}'. Must be 'compact' or 'json'", self.log_format);
        }

        if let Some(blank) = self.node_types.iter().find(|t| t.trim().is_empty()) {
            anyhow::bail!("node_types cannot contain blank entries: {:?}", blank);
        }

        Ok(())
    }

    pub fn trigger_cooldown(&self) -> Duration {
        Duration::from_millis(self.trigger_cooldown_ms)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn override_parsed<T: std::str::FromStr + std::fmt::Display>(key: &str, val: &str, target: &mut T) {
    match val.trim().parse::<T>() {
        Ok(parsed) => {
            tracing::info!("Environment override: {}={}", key, parsed);
            *target = parsed;
        }
        Err(_) => {
            tracing::warn!("Invalid value for {}: '{}'. Ignoring.", key, val);
        }
    }
}

// Default value functions
fn default_swarm_id() -> SwarmId {
    SwarmId::new("default")
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".treeswarm")
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_trigger_depth() -> u32 {
    5
}

fn default_trigger_cooldown_ms() -> u64 {
    1000
}

fn default_chat_history_limit() -> usize {
    50
}

fn default_context_history_turns() -> usize {
    5
}

fn default_max_kernel_turns() -> u32 {
    10
}

fn default_turn_timeout_secs() -> u64 {
    300
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_event_broadcast_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}
