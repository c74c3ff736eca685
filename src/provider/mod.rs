//! Provider abstraction over structured-output completion endpoints.
//!
//! A provider takes a system prompt, a user prompt, and a JSON schema, and
//! returns a parsed JSON object plus token usage. Streaming providers
//! report a running token count through an optional callback; the final
//! callback invocation always carries the authoritative total from the
//! provider's own usage report.

pub mod anthropic;
pub mod limiter;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::config::HandoverConfig;
use crate::core::errors::{HandoverError, Result};
use crate::core::tokens::Usage;

pub use limiter::{backoff_delay, retry_with_backoff, RateLimiter, RetryPolicy};

/// Callback invoked with the running token count of a streaming response.
pub type TokenCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// One structured-output completion request.
#[derive(Clone)]
pub struct CompletionRequest {
    /// System prompt
    pub system_prompt: String,
    /// User prompt
    pub user_prompt: String,
    /// JSON schema the response must conform to
    pub response_schema: serde_json::Value,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Response token cap
    pub max_tokens: Option<u32>,
    /// Streaming token-count callback; absent means non-streaming transport
    pub on_token: Option<TokenCallback>,
}

impl std::fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("system_prompt_len", &self.system_prompt.len())
            .field("user_prompt_len", &self.user_prompt.len())
            .field("streaming", &self.on_token.is_some())
            .finish()
    }
}

/// Parsed completion plus usage accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Response JSON, already validated against the request schema
    pub data: serde_json::Value,
    /// Token usage for the request
    pub usage: Usage,
}

/// A structured-output completion endpoint.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logs and display.
    fn name(&self) -> &str;

    /// Model identifier this provider sends requests to.
    fn model(&self) -> &str;

    /// Run one completion request.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}

/// Build the provider selected by the configuration.
///
/// API-key resolution happens here so a missing key fails at pipeline
/// start rather than inside round 1.
pub fn provider_for_config(config: &HandoverConfig) -> Result<Arc<dyn Provider>> {
    match config.provider.to_ascii_lowercase().as_str() {
        "anthropic" => {
            let api_key = std::env::var(&config.api_key_env)
                .map_err(|_| HandoverError::no_api_key(&config.api_key_env, "anthropic"))?;
            Ok(Arc::new(anthropic::AnthropicProvider::new(
                api_key,
                config.model.clone(),
                config.base_url.clone(),
                config.timeout,
            )))
        }
        "openai" => {
            let api_key = std::env::var(&config.api_key_env)
                .map_err(|_| HandoverError::no_api_key(&config.api_key_env, "openai"))?;
            Ok(Arc::new(openai::OpenAiCompatProvider::new(
                Some(api_key),
                config.model.clone(),
                config.base_url.clone(),
                config.timeout,
            )))
        }
        "ollama" => Ok(Arc::new(openai::OpenAiCompatProvider::new(
            None,
            config.model.clone(),
            config
                .base_url
                .clone()
                .or_else(|| Some("http://localhost:11434/v1".to_string())),
            config.timeout,
        ))),
        other => Err(HandoverError::config_field(
            format!("unknown provider '{other}'"),
            "provider",
        )),
    }
}

/// Check a response value against the shallow shape of a JSON schema.
///
/// Verifies the declared top-level type and the presence of required
/// properties. Full structural validation happens when the round layer
/// deserializes into its typed output.
pub fn validate_against_schema(
    value: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<()> {
    if let Some(expected) = schema.get("type").and_then(|t| t.as_str()) {
        let matches = match expected {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            _ => true,
        };
        if !matches {
            return Err(HandoverError::provider_schema(format!(
                "expected top-level {expected}, got {value_kind}",
                value_kind = json_kind(value)
            )));
        }
    }

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if value.get(key).is_none() {
                return Err(HandoverError::provider_schema(format!(
                    "missing required property '{key}'"
                )));
            }
        }
    }

    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Extract the first JSON object from a model response that may be wrapped
/// in markdown fences or prose.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(HandoverError::provider_schema(
        "response contained no parseable JSON object",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_required_keys() {
        let schema = json!({"type": "object", "required": ["summary"]});
        assert!(validate_against_schema(&json!({"summary": "ok"}), &schema).is_ok());
        assert!(validate_against_schema(&json!({"other": 1}), &schema).is_err());
        assert!(validate_against_schema(&json!([1, 2]), &schema).is_err());
    }

    #[test]
    fn test_extract_json_from_fenced_response() {
        let text = "Here you go:\n```json\n{\"summary\": \"fine\"}\n```";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["summary"], "fine");
    }

    #[test]
    fn test_extract_json_rejects_prose() {
        assert!(extract_json_object("no json here").is_err());
    }
}
