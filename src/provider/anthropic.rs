//! Hosted Messages API over server-sent events.

use super::{error_for_status, http_client, line_stream, ChunkStream, GenerationProvider};
use crate::error::{FlashdeckError, ProviderError};
use async_trait::async_trait;
use futures::{future, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: usize,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: &str, base_url: &str, max_tokens: usize) -> Result<Self, FlashdeckError> {
        Ok(Self {
            client: http_client()?,
            api_key,
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens: max_tokens.max(1),
        })
    }

    fn request(&self, prompt: &str, temperature: f32) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "temperature": temperature.min(1.0),
                "stream": true,
                "messages": [{ "role": "user", "content": prompt }],
            }))
    }
}

/// Decode one SSE line. Only `content_block_delta` events carry text.
fn parse_sse_line(line: Result<String, ProviderError>) -> Result<Option<String>, ProviderError> {
    let line = line?;
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    let v: Value =
        serde_json::from_str(data).map_err(|e| ProviderError::MalformedResponse(format!("{e}: {data}")))?;
    match v.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => Ok(v
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)),
        Some("error") => {
            let msg = v
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown stream error");
            Err(ProviderError::Api(msg.to_string()))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl GenerationProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "claude"
    }

    fn model(&self) -> &str {
        &self.model
    }

    /// A hosted API is assumed reachable once a key is present; only an
    /// unresolvable host fails the probe.
    async fn check_availability(&self) -> bool {
        if self.api_key.trim().is_empty() {
            return false;
        }
        match self
            .client
            .head(&self.base_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) if e.is_connect() => {
                warn!("Cannot reach {}: {}", self.base_url, e);
                false
            }
            Err(_) => true,
        }
    }

    async fn stream_generate(&self, prompt: &str, temperature: f32) -> Result<ChunkStream, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::MissingCredentials("API key is empty".into()));
        }
        let resp = self.request(prompt, temperature).send().await?;
        let resp = match error_for_status(resp).await {
            Err(ProviderError::Http { status: 401, body }) => {
                return Err(ProviderError::MissingCredentials(format!("rejected API key: {body}")))
            }
            other => other?,
        };
        let chunks = line_stream(Box::pin(resp.bytes_stream()))
            .map(parse_sse_line)
            .try_filter_map(|x| future::ready(Ok(x)));
        Ok(Box::pin(chunks))
    }

    async fn context_length(&self) -> Option<usize> {
        self.model.starts_with("claude").then_some(200_000)
    }
}
