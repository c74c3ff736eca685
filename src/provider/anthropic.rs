//! Anthropic Messages API provider.
//!
//! Supports both buffered and streaming transports. Streaming is selected
//! when the request carries a token callback; the running count reported
//! during the stream is a character-based estimate, and the final callback
//! carries the authoritative output-token total from the usage report.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{HandoverError, Result};
use crate::core::tokens::{Usage, DEFAULT_CHARS_PER_TOKEN};
use crate::provider::{
    extract_json_object, validate_against_schema, Completion, CompletionRequest, Provider,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8_192;

/// Provider backed by the Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default, Clone)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct StreamMessage {
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicProvider {
    /// Create a provider for the given key, model, endpoint, and timeout.
    pub fn new(api_key: String, model: String, base_url: Option<String>, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    /// Append the schema instruction the model must follow.
    fn prompt_with_schema(request: &CompletionRequest) -> String {
        format!(
            "{}\n\n## JSON schema\nEmit a single JSON object conforming to:\n{}",
            request.user_prompt,
            serde_json::to_string_pretty(&request.response_schema).unwrap_or_default()
        )
    }

    async fn complete_buffered(&self, request: &CompletionRequest) -> Result<(String, ApiUsage)> {
        let prompt = Self::prompt_with_schema(request);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: &request.system_prompt,
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
            temperature: request.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HandoverError::provider_transient(
                format!("Anthropic API error: {text}"),
                Some(status.as_u16()),
            ));
        }

        let parsed: MessagesResponse = response.json().await?;
        let text = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<String>();
        Ok((text, parsed.usage))
    }

    async fn complete_streaming(&self, request: &CompletionRequest) -> Result<(String, ApiUsage)> {
        let prompt = Self::prompt_with_schema(request);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: &request.system_prompt,
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
            temperature: request.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HandoverError::provider_transient(
                format!("Anthropic API error: {text}"),
                Some(status.as_u16()),
            ));
        }

        let on_token = request.on_token.clone();
        let mut usage = ApiUsage::default();
        let mut text = String::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE frames are newline-delimited; keep any partial tail.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };
                if payload == "[DONE]" {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<StreamEvent>(payload) else {
                    continue;
                };

                match event.event_type.as_str() {
                    "message_start" => {
                        if let Some(u) = event.message.and_then(|m| m.usage) {
                            usage.input_tokens = u.input_tokens;
                            usage.cache_read_input_tokens = u.cache_read_input_tokens;
                            usage.cache_creation_input_tokens = u.cache_creation_input_tokens;
                        }
                    }
                    "content_block_delta" => {
                        if let Some(delta_text) = event.delta.and_then(|d| d.text) {
                            text.push_str(&delta_text);
                            if let Some(on_token) = &on_token {
                                on_token((text.len() / DEFAULT_CHARS_PER_TOKEN) as u64);
                            }
                        }
                    }
                    "message_delta" => {
                        if let Some(u) = event.usage {
                            usage.output_tokens = u.output_tokens;
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(on_token) = &on_token {
            on_token(usage.output_tokens);
        }

        Ok((text, usage))
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let start = Instant::now();
        let (text, api_usage) = if request.on_token.is_some() {
            self.complete_streaming(&request).await?
        } else {
            self.complete_buffered(&request).await?
        };

        debug!(
            "anthropic completion: {} input tokens, {} output tokens",
            api_usage.input_tokens, api_usage.output_tokens
        );

        let data = extract_json_object(&text)?;
        validate_against_schema(&data, &request.response_schema)?;

        Ok(Completion {
            data,
            usage: Usage {
                input_tokens: api_usage.input_tokens,
                output_tokens: api_usage.output_tokens,
                cache_read_tokens: api_usage.cache_read_input_tokens,
                cache_creation_tokens: api_usage.cache_creation_input_tokens,
                model: self.model.clone(),
                duration_ms: start.elapsed().as_millis() as u64,
            },
        })
    }
}
