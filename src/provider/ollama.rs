//! Local Ollama server: streaming generation and image description.

use super::{error_for_status, http_client, line_stream, ChunkStream, GenerationProvider};
use crate::describe::ImageDescriber;
use crate::error::{FlashdeckError, ProviderError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::{future, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for one model on one Ollama server.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    /// Bound on non-streaming calls (image description).
    request_timeout: Duration,
    context: OnceCell<Option<usize>>,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str) -> Result<Self, FlashdeckError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            request_timeout: Duration::from_secs(120),
            context: OnceCell::new(),
        })
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(secs.max(1));
        self
    }

    async fn fetch_context_length(&self) -> Option<usize> {
        let resp = self
            .client
            .post(format!("{}/api/show", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .json(&json!({ "model": self.model }))
            .send()
            .await
            .ok()?;
        let body: Value = error_for_status(resp).await.ok()?.json().await.ok()?;
        let found = context_length_from_show(&body);
        match found {
            Some(n) => debug!("Ollama model {} reports context length {}", self.model, n),
            None => debug!("Ollama model {} reports no context length", self.model),
        }
        found
    }
}

/// Find `*.context_length` in an `/api/show` response's `model_info`.
fn context_length_from_show(body: &Value) -> Option<usize> {
    body.get("model_info")?
        .as_object()?
        .iter()
        .find(|(k, _)| k.contains("context_length"))
        .and_then(|(_, v)| v.as_u64())
        .map(|n| n as usize)
}

/// Decode one NDJSON line of `/api/generate` output.
fn parse_ollama_line(line: Result<String, ProviderError>) -> Result<Option<String>, ProviderError> {
    let line = line?;
    if line.trim().is_empty() {
        return Ok(None);
    }
    let v: Value = serde_json::from_str(&line)
        .map_err(|e| ProviderError::MalformedResponse(format!("{e}: {line}")))?;
    if let Some(err) = v.get("error").and_then(Value::as_str) {
        return Err(ProviderError::Api(err.to_string()));
    }
    Ok(v.get("response")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

#[async_trait]
impl GenerationProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn check_availability(&self) -> bool {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                warn!("Ollama at {} answered {}", self.base_url, r.status());
                false
            }
            Err(e) => {
                warn!("Ollama at {} is unreachable: {}", self.base_url, e);
                false
            }
        }
    }

    async fn stream_generate(&self, prompt: &str, temperature: f32) -> Result<ChunkStream, ProviderError> {
        let mut options = json!({ "temperature": temperature });
        if let Some(ctx) = self.context_length().await {
            options["num_ctx"] = json!(ctx);
        }
        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": true,
                "options": options,
            }))
            .send()
            .await?;
        let resp = error_for_status(resp).await?;

        let chunks = line_stream(Box::pin(resp.bytes_stream()))
            .map(parse_ollama_line)
            .try_filter_map(|x| future::ready(Ok(x)));
        Ok(Box::pin(chunks))
    }

    async fn context_length(&self) -> Option<usize> {
        *self
            .context
            .get_or_init(|| self.fetch_context_length())
            .await
    }
}

#[async_trait]
impl ImageDescriber for OllamaProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn check_availability(&self) -> bool {
        GenerationProvider::check_availability(self).await
    }

    async fn describe(&self, image_path: &Path, prompt: &str) -> Result<String, ProviderError> {
        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| ProviderError::Transport(format!("{}: {e}", image_path.display())))?;
        let encoded = STANDARD.encode(bytes);

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.request_timeout)
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "images": [encoded],
                "stream": false,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        secs: self.request_timeout.as_secs(),
                    }
                } else {
                    e.into()
                }
            })?;
        let body: Value = error_for_status(resp).await?.json().await?;
        if let Some(err) = body.get("error").and_then(Value::as_str) {
            return Err(ProviderError::Api(err.to_string()));
        }
        body.get("response")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::MalformedResponse("missing 'response' field".into()))
    }
}
