use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub mission: MissionConfig,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    /// Customized agent profiles; override built-ins by `agent_type`.
    #[serde(default)]
    pub agents: Vec<AgentProfileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. `~/` is expanded.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String { "~/.weft/weft.db".to_string() }

/// Mission execution settings shared by both runners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Try the streaming endpoint before falling back to simulation.
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    /// Base URL of the execution service, e.g. `http://127.0.0.1:18790/api`.
    #[serde(default)]
    pub stream_url: Option<String>,
    /// Bearer token for the execution service.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Simulated runner tick interval.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Lower bound of synthesized step durations.
    #[serde(default = "default_sim_min_duration_ms")]
    pub sim_min_duration_ms: u64,
    /// Upper bound of synthesized step durations.
    #[serde(default = "default_sim_max_duration_ms")]
    pub sim_max_duration_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            streaming: default_streaming(),
            stream_url: None,
            api_key: None,
            tick_interval_ms: default_tick_interval_ms(),
            sim_min_duration_ms: default_sim_min_duration_ms(),
            sim_max_duration_ms: default_sim_max_duration_ms(),
        }
    }
}

fn default_streaming() -> bool { true }
fn default_tick_interval_ms() -> u64 { 1500 }
fn default_sim_min_duration_ms() -> u64 { 1500 }
fn default_sim_max_duration_ms() -> u64 { 4500 }

/// Canvas editing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    #[serde(default = "default_min_zoom")]
    pub min_zoom: f64,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: f64,
    #[serde(default = "default_zoom_step")]
    pub zoom_step: f64,
    /// Node box size, used to locate node centers for connection drafts.
    #[serde(default = "default_node_width")]
    pub node_width: f64,
    #[serde(default = "default_node_height")]
    pub node_height: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            zoom_step: default_zoom_step(),
            node_width: default_node_width(),
            node_height: default_node_height(),
        }
    }
}

fn default_min_zoom() -> f64 { 0.25 }
fn default_max_zoom() -> f64 { 2.0 }
fn default_zoom_step() -> f64 { 0.1 }
fn default_node_width() -> f64 { 200.0 }
fn default_node_height() -> f64 { 80.0 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionConfig {
    /// Agent type that leads missions when none is given.
    #[serde(default = "default_leader")]
    pub default_leader: String,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            default_leader: default_leader(),
        }
    }
}

fn default_leader() -> String { "coordinator".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Delay between server-side step events.
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            step_delay_ms: default_step_delay_ms(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:18790".to_string() }
fn default_step_delay_ms() -> u64 { 1000 }

/// A user-customized agent profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfileConfig {
    pub agent_type: String,
    pub display_name: String,
    #[serde(default)]
    pub display_name_cn: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        let exec = &self.execution;
        if exec.sim_min_duration_ms > exec.sim_max_duration_ms {
            return Err(WeftError::Config(format!(
                "execution.sim_min_duration_ms ({}) exceeds sim_max_duration_ms ({})",
                exec.sim_min_duration_ms, exec.sim_max_duration_ms
            )));
        }
        if exec.tick_interval_ms == 0 {
            return Err(WeftError::Config("execution.tick_interval_ms must be > 0".into()));
        }
        let ed = &self.editor;
        if ed.min_zoom <= 0.0 || ed.min_zoom > ed.max_zoom {
            return Err(WeftError::Config(format!(
                "editor zoom range [{}, {}] is invalid",
                ed.min_zoom, ed.max_zoom
            )));
        }
        Ok(())
    }

    /// Resolve the SQLite path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store.path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
