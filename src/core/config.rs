//! Configuration types and management for handover-rs.
//!
//! Configuration is layered: command-line flags override environment
//! variables, which override the YAML file, which overrides built-in
//! defaults. The structures here hold the merged result.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{HandoverError, Result};

/// Environment variable prefix recognized by the overlay step.
const ENV_PREFIX: &str = "HANDOVER_";

/// Main configuration for the handover documentation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandoverConfig {
    /// Provider implementation to use ("anthropic", "openai", "ollama")
    pub provider: String,

    /// Model identifier passed on each request
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Endpoint override for custom or self-hosted providers
    pub base_url: Option<String>,

    /// Per-request timeout in milliseconds
    pub timeout: u64,

    /// Directory for rendered documents
    pub output: PathBuf,

    /// Rendering audience ("human" or "ai"); passed through to renderers
    pub audience: Audience,

    /// Glob patterns for files to include in analysis
    pub include: Vec<String>,

    /// Glob patterns for files to exclude from analysis
    pub exclude: Vec<String>,

    /// Analysis behavior settings
    pub analysis: AnalysisSettings,

    /// Context window and packing settings
    pub context_window: ContextWindowSettings,

    /// Surface a warning when the estimated run cost exceeds this value
    pub cost_warning_threshold: Option<f64>,
}

/// Target audience for rendered documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    /// Prose-first documents for developers
    Human,
    /// Terse, structured documents for coding agents
    Ai,
}

/// Settings controlling analysis and round execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisSettings {
    /// Width of the provider rate limiter
    pub concurrency: Option<usize>,

    /// Skip all AI rounds and render with empty round data
    pub static_only: bool,
}

/// Settings controlling the context packer budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextWindowSettings {
    /// Override for the packer token budget
    pub max_tokens: Option<usize>,

    /// Files always emitted with full content (oversize rule still applies)
    pub pin: Vec<String>,

    /// Files whose importance is raised before tier selection
    pub boost: Vec<String>,
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            timeout: 120_000,
            output: PathBuf::from("handover-docs"),
            audience: Audience::Human,
            include: Vec::new(),
            exclude: Vec::new(),
            analysis: AnalysisSettings::default(),
            context_window: ContextWindowSettings::default(),
            cost_warning_threshold: None,
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            concurrency: None,
            static_only: false,
        }
    }
}

impl Default for ContextWindowSettings {
    fn default() -> Self {
        Self {
            max_tokens: None,
            pin: Vec::new(),
            boost: Vec::new(),
        }
    }
}

impl HandoverConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            HandoverError::io(format!("Failed to read config file: {}", path.display()), e)
        })?;

        serde_yaml::from_str(&content).map_err(Into::into)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(|e| {
            HandoverError::io(
                format!("Failed to write config file: {}", path.display()),
                e,
            )
        })
    }

    /// Load the layered configuration for a repository.
    ///
    /// Starts from defaults, overlays a user-level file under the platform
    /// config directory, then `handover.yml` at the repository root, then
    /// recognized environment variables. Flag overrides are applied
    /// afterwards by the command layer.
    pub fn load(repo_root: &std::path::Path) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_dir) = dirs::config_dir() {
            let user_path = user_dir.join("handover").join("handover.yml");
            if user_path.exists() {
                config = Self::from_yaml_file(&user_path)?;
            }
        }

        let yaml_path = repo_root.join("handover.yml");
        if yaml_path.exists() {
            config = Self::from_yaml_file(&yaml_path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Overlay `HANDOVER_*` environment variables onto this configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}PROVIDER")) {
            self.provider = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}MODEL")) {
            self.model = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}BASE_URL")) {
            self.base_url = Some(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}TIMEOUT")) {
            if let Ok(ms) = v.parse() {
                self.timeout = ms;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}OUTPUT")) {
            self.output = PathBuf::from(v);
        }
    }

    /// Width of the provider rate limiter for the configured provider.
    ///
    /// Local endpoints run one request at a time; cloud providers default
    /// to four concurrent slots.
    pub fn effective_concurrency(&self) -> usize {
        if let Some(n) = self.analysis.concurrency {
            return n.max(1);
        }
        if self.is_local_provider() {
            1
        } else {
            4
        }
    }

    /// Whether the configured provider is a local endpoint.
    pub fn is_local_provider(&self) -> bool {
        self.provider.eq_ignore_ascii_case("ollama")
            || self
                .base_url
                .as_deref()
                .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
                .unwrap_or(false)
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(HandoverError::config_field("model must not be empty", "model"));
        }
        if self.timeout == 0 {
            return Err(HandoverError::config_field(
                "timeout must be a positive number of milliseconds",
                "timeout",
            ));
        }
        if let Some(n) = self.analysis.concurrency {
            if n == 0 {
                return Err(HandoverError::config_field(
                    "analysis.concurrency must be at least 1",
                    "analysis.concurrency",
                ));
            }
        }
        if let Some(max) = self.context_window.max_tokens {
            if max < 1_000 {
                return Err(HandoverError::config_field(
                    "contextWindow.maxTokens below 1000 leaves no room for file content",
                    "contextWindow.maxTokens",
                ));
            }
        }
        match self.provider.to_ascii_lowercase().as_str() {
            "anthropic" | "openai" | "ollama" => Ok(()),
            other => Err(HandoverError::config_field(
                format!("unknown provider '{other}' (expected anthropic, openai, or ollama)"),
                "provider",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(HandoverConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = HandoverConfig::default();
        config.provider = "mystery".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_concurrency_defaults() {
        let mut config = HandoverConfig::default();
        assert_eq!(config.effective_concurrency(), 4);

        config.provider = "ollama".to_string();
        assert_eq!(config.effective_concurrency(), 1);

        config.analysis.concurrency = Some(8);
        assert_eq!(config.effective_concurrency(), 8);
    }

    #[test]
    fn test_local_detection_by_base_url() {
        let mut config = HandoverConfig::default();
        config.base_url = Some("http://localhost:11434/v1".to_string());
        assert!(config.is_local_provider());
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handover.yml");

        let mut config = HandoverConfig::default();
        config.model = "gpt-4o".to_string();
        config.context_window.pin = vec!["src/lib.rs".to_string()];
        config.to_yaml_file(&path).unwrap();

        let loaded = HandoverConfig::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.model, "gpt-4o");
        assert_eq!(loaded.context_window.pin, vec!["src/lib.rs".to_string()]);
    }
}
