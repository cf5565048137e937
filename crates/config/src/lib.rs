//! Configuration loading, validation, and management for Conclave.
//!
//! Loads configuration from `~/.conclave/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use conclave_core::AgentDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.conclave/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible chat completions base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Execution mode router settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Session memory settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// A2A bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Agents registered at startup
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentDescriptor>,
}

fn default_api_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_model() -> String {
    "llama-3.3-70b-versatile".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

fn default_agents() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new("concierge_001", "AI Concierge", default_model())
            .with_instruction(
                "You are a helpful AI concierge. Help users with travel planning, \
                 recommendations, and general assistance. Be warm and professional.",
            )
            .with_tool("google_search"),
        AgentDescriptor::new("assistant_001", "AI Assistant", default_model())
            .with_instruction(
                "You are a knowledgeable AI assistant. Provide accurate, helpful \
                 information and solve problems efficiently.",
            )
            .with_tool("google_search")
            .with_tool("code_execution"),
    ]
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("orchestrator", &self.orchestrator)
            .field("memory", &self.memory)
            .field("bus", &self.bus)
            .field("agents", &self.agents)
            .finish()
    }
}

/// Execution mode router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Registry capacity
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Upper bound on agents in one parallel request
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout applied to each model or tool call
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    /// Maximum primary invocations in loop mode
    #[serde(default = "default_loop_max_iterations")]
    pub loop_max_iterations: usize,

    /// Evaluator score at or above which loop mode stops
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,

    /// Agent used by single mode when none is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,
}

fn default_max_agents() -> usize {
    32
}
fn default_max_parallel() -> usize {
    8
}
fn default_invocation_timeout_secs() -> u64 {
    60
}
fn default_loop_max_iterations() -> usize {
    5
}
fn default_convergence_threshold() -> f64 {
    0.8
}

impl OrchestratorConfig {
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            max_parallel: default_max_parallel(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            loop_max_iterations: default_loop_max_iterations(),
            convergence_threshold: default_convergence_threshold(),
            default_agent: None,
        }
    }
}

/// Session memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Episodic entries above which compaction runs (T)
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,

    /// Most recent entries never summarized (K)
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Size budget of the context view, in estimated tokens
    #[serde(default = "default_context_budget_tokens")]
    pub context_budget_tokens: usize,

    /// Long-term facts kept per session
    #[serde(default = "default_max_facts")]
    pub max_facts: usize,

    /// Inactivity after which a session is archived
    #[serde(default = "default_archive_after_secs")]
    pub archive_after_secs: u64,

    /// Model used for compaction summaries (defaults to `default_model`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_model: Option<String>,
}

fn default_compaction_threshold() -> usize {
    40
}
fn default_keep_recent() -> usize {
    10
}
fn default_context_budget_tokens() -> usize {
    2048
}
fn default_max_facts() -> usize {
    256
}
fn default_archive_after_secs() -> u64 {
    3600
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: default_compaction_threshold(),
            keep_recent: default_keep_recent(),
            context_budget_tokens: default_context_budget_tokens(),
            max_facts: default_max_facts(),
            archive_after_secs: default_archive_after_secs(),
            summary_model: None,
        }
    }
}

/// A2A bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bounded capacity of each agent's inbox
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

fn default_inbox_capacity() -> usize {
    64
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.conclave/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `CONCLAVE_API_KEY` (highest priority)
    /// - `GROQ_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("CONCLAVE_API_KEY")
                .ok()
                .or_else(|| std::env::var("GROQ_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CONCLAVE_MODEL") {
            config.default_model = model;
        }

        if let Ok(url) = std::env::var("CONCLAVE_API_URL") {
            config.api_url = url;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".conclave")
    }

    /// Where session snapshots are written between runs.
    pub fn sessions_path() -> PathBuf {
        Self::config_dir().join("sessions.json")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let o = &self.orchestrator;
        if o.max_agents == 0 {
            return Err(ConfigError::ValidationError("orchestrator.max_agents must be > 0".into()));
        }
        if o.max_parallel == 0 {
            return Err(ConfigError::ValidationError("orchestrator.max_parallel must be > 0".into()));
        }
        if o.loop_max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.loop_max_iterations must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&o.convergence_threshold) {
            return Err(ConfigError::ValidationError(
                "orchestrator.convergence_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if self.memory.keep_recent >= self.memory.compaction_threshold {
            return Err(ConfigError::ValidationError(
                "memory.keep_recent must be smaller than memory.compaction_threshold".into(),
            ));
        }

        if self.bus.inbox_capacity == 0 {
            return Err(ConfigError::ValidationError("bus.inbox_capacity must be > 0".into()));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate agent id in [[agents]]: {}",
                    agent.id
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Model used for compaction summaries.
    pub fn summary_model(&self) -> &str {
        self.memory.summary_model.as_deref().unwrap_or(&self.default_model)
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            orchestrator: OrchestratorConfig::default(),
            memory: MemoryConfig::default(),
            bus: BusConfig::default(),
            agents: default_agents(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for conclave_core::Error {
    fn from(e: ConfigError) -> Self {
        conclave_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_model, "llama-3.3-70b-versatile");
        assert_eq!(config.default_max_tokens, 1024);
        assert_eq!(config.orchestrator.max_parallel, 8);
        assert_eq!(config.memory.compaction_threshold, 40);
        assert_eq!(config.memory.keep_recent, 10);
    }

    #[test]
    fn default_agents_are_seeded() {
        let config = AppConfig::default();
        let ids: Vec<&str> = config.agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["concierge_001", "assistant_001"]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.agents, config.agents);
        assert_eq!(parsed.orchestrator.max_agents, config.orchestrator.max_agents);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn keep_recent_must_be_below_threshold() {
        let mut config = AppConfig::default();
        config.memory.keep_recent = config.memory.compaction_threshold;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("keep_recent"));
    }

    #[test]
    fn zero_limits_rejected() {
        let mut config = AppConfig::default();
        config.orchestrator.max_parallel = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.orchestrator.loop_max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.orchestrator.convergence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_agent_ids_rejected() {
        let mut config = AppConfig::default();
        let dup = config.agents[0].clone();
        config.agents.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("concierge_001"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn load_from_file_applies_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
default_model = "mixtral"

[orchestrator]
max_parallel = 2
default_agent = "writer"

[memory]
compaction_threshold = 6
keep_recent = 2

[[agents]]
id = "writer"
name = "Writer"
model = "mixtral"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "mixtral");
        assert_eq!(config.orchestrator.max_parallel, 2);
        assert_eq!(config.orchestrator.max_agents, 32);
        assert_eq!(config.orchestrator.default_agent.as_deref(), Some("writer"));
        assert_eq!(config.memory.keep_recent, 2);
        assert_eq!(config.agents.len(), 1);
        assert!(config.agents[0].tools.is_empty());
    }

    #[test]
    fn invalid_file_is_rejected_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[memory]\ncompaction_threshold = 2\nkeep_recent = 5\n").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not = [valid").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("gsk_secret".into()),
            ..AppConfig::default()
        };
        let text = format!("{config:?}");
        assert!(!text.contains("gsk_secret"));
        assert!(text.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("llama-3.3-70b-versatile"));
        assert!(toml_str.contains("concierge_001"));
        assert!(toml_str.contains("[orchestrator]"));
    }

    #[test]
    fn summary_model_falls_back_to_default() {
        let mut config = AppConfig::default();
        assert_eq!(config.summary_model(), "llama-3.3-70b-versatile");
        config.memory.summary_model = Some("llama-3.1-8b-instant".into());
        assert_eq!(config.summary_model(), "llama-3.1-8b-instant");
    }
}
