//! Error types for the handover-rs library.
//!
//! This module provides structured error handling for all handover operations.
//! Every surfaceable error carries enough context to print a message, a likely
//! reason, and a suggested fix on the terminal.

use std::io;

use thiserror::Error;

/// Main result type for handover operations.
pub type Result<T> = std::result::Result<T, HandoverError>;

/// Comprehensive error type for all handover operations.
#[derive(Error, Debug)]
pub enum HandoverError {
    /// I/O related errors (file operations, network, etc.)
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// No API key could be resolved for the selected provider
    #[error("No API key found in environment variable '{env_var}'")]
    NoApiKey {
        /// Environment variable that was consulted
        env_var: String,
        /// Provider that required the key
        provider: String,
    },

    /// Transient provider failure that exhausted its retries
    #[error("Provider rate limited after {attempts} attempts: {message}")]
    RateLimited {
        /// Error description from the final attempt
        message: String,
        /// Number of attempts made before giving up
        attempts: u32,
        /// Underlying provider error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transient provider failure (HTTP 429/529 or network)
    #[error("Provider error ({status:?}): {message}")]
    ProviderTransient {
        /// Error description
        message: String,
        /// HTTP status when one was received
        status: Option<u16>,
    },

    /// Provider response did not conform to the requested schema
    #[error("Provider response failed schema validation: {message}")]
    ProviderSchema {
        /// Error description
        message: String,
        /// Round whose schema was violated, when known
        round: Option<u8>,
    },

    /// A step id was registered twice with the orchestrator
    #[error("Step '{step_id}' is already registered")]
    DuplicateStep {
        /// The offending step id
        step_id: String,
    },

    /// A step depends on an id that was never registered
    #[error("Step '{step_id}' depends on unknown step '{missing}'")]
    MissingDependency {
        /// The step declaring the dependency
        step_id: String,
        /// The dependency that does not exist
        missing: String,
    },

    /// The step graph contains a cycle
    #[error("Dependency cycle between steps: {participants:?}")]
    CyclicDependency {
        /// Step ids participating in the cycle
        participants: Vec<String>,
    },

    /// Cache and storage errors
    #[error("Cache error: {message}")]
    Cache {
        /// Error description
        message: String,
        /// Cache key or file that caused the issue
        key: Option<String>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Data type being serialized
        data_type: Option<String>,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors for input data
    #[error("Validation error: {message}")]
    Validation {
        /// Error description
        message: String,
        /// Field or input that failed validation
        field: Option<String>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

impl HandoverError {
    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a missing-API-key error
    pub fn no_api_key(env_var: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::NoApiKey {
            env_var: env_var.into(),
            provider: provider.into(),
        }
    }

    /// Create a transient provider error
    pub fn provider_transient(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::ProviderTransient {
            message: message.into(),
            status,
        }
    }

    /// Create a provider schema-validation error
    pub fn provider_schema(message: impl Into<String>) -> Self {
        Self::ProviderSchema {
            message: message.into(),
            round: None,
        }
    }

    /// Create a new cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            key: None,
        }
    }

    /// Create a new cache error with key context
    pub fn cache_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        if let Self::Internal { context: ctx, .. } = &mut self {
            *ctx = Some(context.into());
        }
        self
    }

    /// Whether the error represents a transient condition worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderTransient {
                status: Some(429) | Some(529) | None,
                ..
            }
        )
    }

    /// Likely reason for the error, suitable for terminal display.
    pub fn reason(&self) -> String {
        match self {
            Self::Io { .. } => "A file or network operation failed".to_string(),
            Self::Config { field: Some(f), .. } => {
                format!("The configuration field '{f}' is invalid or missing")
            }
            Self::Config { .. } => {
                "The configuration file could not be parsed or validated".to_string()
            }
            Self::NoApiKey { provider, .. } => {
                format!("The '{provider}' provider requires an API key and none was found")
            }
            Self::RateLimited { attempts, .. } => {
                format!("The provider kept rejecting requests across {attempts} attempts")
            }
            Self::ProviderTransient {
                status: Some(s), ..
            } => format!("The provider returned HTTP {s}"),
            Self::ProviderTransient { .. } => "The provider endpoint was unreachable".to_string(),
            Self::ProviderSchema { .. } => {
                "The model response did not match the requested JSON schema".to_string()
            }
            Self::DuplicateStep { .. } => {
                "Two pipeline steps were registered with the same id".to_string()
            }
            Self::MissingDependency { .. } => {
                "A pipeline step references a dependency that was never registered".to_string()
            }
            Self::CyclicDependency { .. } => {
                "The pipeline step graph contains a circular dependency".to_string()
            }
            Self::Cache { .. } => "A cache file was unreadable or could not be written".to_string(),
            Self::Serialization { .. } => "Data could not be encoded or decoded".to_string(),
            Self::Validation { .. } => "Input data failed a consistency check".to_string(),
            Self::Internal { .. } => "An unexpected internal condition occurred".to_string(),
        }
    }

    /// Suggested fix for the error, suitable for terminal display.
    pub fn fix(&self) -> String {
        match self {
            Self::Io { .. } => "Check file permissions and that the path exists".to_string(),
            Self::Config { .. } => {
                "Run 'handover validate-config' to see the offending keys".to_string()
            }
            Self::NoApiKey { env_var, .. } => {
                format!("Export {env_var}=<your key> or set apiKeyEnv in handover.yml")
            }
            Self::RateLimited { .. } => {
                "Wait a few minutes, or lower analysis.concurrency in handover.yml".to_string()
            }
            Self::ProviderTransient { .. } => {
                "Verify the baseUrl and that the endpoint is running".to_string()
            }
            Self::ProviderSchema { .. } => {
                "Retry the run; persistent failures usually mean the model cannot hold structured output".to_string()
            }
            Self::DuplicateStep { .. }
            | Self::MissingDependency { .. }
            | Self::CyclicDependency { .. } => {
                "This is a pipeline wiring bug; please report it".to_string()
            }
            Self::Cache { .. } => "Delete the .handover/cache directory and re-run".to_string(),
            Self::Serialization { .. } => "Delete stale cache files and re-run".to_string(),
            Self::Validation { .. } => "Check the inputs named in the message".to_string(),
            Self::Internal { .. } => "Re-run with --verbose and report the log".to_string(),
        }
    }
}

// Implement From traits for common error types
impl From<io::Error> for HandoverError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for HandoverError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            data_type: Some("JSON".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for HandoverError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            data_type: Some("YAML".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for HandoverError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        Self::ProviderTransient {
            message: format!("HTTP request failed: {err}"),
            status,
        }
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<HandoverError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = HandoverError::config("Invalid configuration");
        assert!(matches!(err, HandoverError::Config { .. }));

        let err = HandoverError::no_api_key("ANTHROPIC_API_KEY", "anthropic");
        assert!(matches!(err, HandoverError::NoApiKey { .. }));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(HandoverError::provider_transient("slow down", Some(429)).is_retryable());
        assert!(HandoverError::provider_transient("overloaded", Some(529)).is_retryable());
        assert!(HandoverError::provider_transient("connection reset", None).is_retryable());
        assert!(!HandoverError::provider_transient("bad request", Some(400)).is_retryable());
        assert!(!HandoverError::provider_schema("not json").is_retryable());
    }

    #[test]
    fn test_triplet_is_populated() {
        let err = HandoverError::no_api_key("OPENAI_API_KEY", "openai");
        assert!(err.reason().contains("openai"));
        assert!(err.fix().contains("OPENAI_API_KEY"));
    }
}
