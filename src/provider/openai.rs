//! OpenAI-compatible chat-completions provider.
//!
//! Covers the OpenAI API itself plus any endpoint speaking the same wire
//! format, including local Ollama servers. Structured output rides on a
//! JSON response-format flag plus a schema block in the prompt; usage comes
//! back in the standard `usage` object, with prompt-cache detail when the
//! endpoint reports it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::core::errors::{HandoverError, Result};
use crate::core::tokens::{Usage, DEFAULT_CHARS_PER_TOKEN};
use crate::provider::{
    extract_json_object, validate_against_schema, Completion, CompletionRequest, Provider,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize, Default, Clone)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Deserialize, Default, Clone)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl OpenAiCompatProvider {
    /// Create a provider; `api_key` is `None` for keyless local endpoints.
    pub fn new(
        api_key: Option<String>,
        model: String,
        base_url: Option<String>,
        timeout_ms: u64,
    ) -> Self {
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
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let prompt = format!(
            "{}\n\n## JSON schema\nEmit a single JSON object conforming to:\n{}",
            request.user_prompt,
            serde_json::to_string_pretty(&request.response_schema).unwrap_or_default()
        );

        let mut body = json!({
            "model": self.model,
            "messages": [
                ChatMessage { role: "system", content: &request.system_prompt },
                ChatMessage { role: "user", content: &prompt },
            ],
            "response_format": {"type": "json_object"},
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let mut builder = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HandoverError::provider_transient(
                format!("chat-completions error: {text}"),
                Some(status.as_u16()),
            ));
        }
        Ok(response)
    }

    async fn complete_buffered(&self, request: &CompletionRequest) -> Result<(String, ChatUsage)> {
        let response = self.send(&self.request_body(request, false)).await?;
        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| HandoverError::provider_schema("response contained no choices"))?;
        Ok((text, parsed.usage.unwrap_or_default()))
    }

    async fn complete_streaming(&self, request: &CompletionRequest) -> Result<(String, ChatUsage)> {
        let response = self.send(&self.request_body(request, true)).await?;

        let on_token = request.on_token.clone();
        let mut usage = ChatUsage::default();
        let mut text = String::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };
                if payload == "[DONE]" {
                    continue;
                }
                let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) else {
                    continue;
                };

                if let Some(delta) = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                {
                    text.push_str(&delta);
                    if let Some(on_token) = &on_token {
                        on_token((text.len() / DEFAULT_CHARS_PER_TOKEN) as u64);
                    }
                }
                if let Some(u) = chunk.usage {
                    usage = u;
                }
            }
        }

        if let Some(on_token) = &on_token {
            on_token(usage.completion_tokens);
        }

        Ok((text, usage))
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
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
            "chat completion: {} prompt tokens, {} completion tokens",
            api_usage.prompt_tokens, api_usage.completion_tokens
        );

        let data = extract_json_object(&text)?;
        validate_against_schema(&data, &request.response_schema)?;

        Ok(Completion {
            data,
            usage: Usage {
                input_tokens: api_usage.prompt_tokens,
                output_tokens: api_usage.completion_tokens,
                cache_read_tokens: api_usage
                    .prompt_tokens_details
                    .and_then(|d| d.cached_tokens),
                cache_creation_tokens: None,
                model: self.model.clone(),
                duration_ms: start.elapsed().as_millis() as u64,
            },
        })
    }
}
