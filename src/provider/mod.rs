//! Text-generation providers.
//!
//! Every backend implements [`GenerationProvider`]. The generation
//! controller only ever sees this trait, so retry, early stop, and
//! interruption behave the same for every backend.
//!
//! | Provider | Transport | Streaming |
//! |----------|-----------|-----------|
//! | [`AnthropicProvider`] | Messages API, SSE | token deltas |
//! | [`OllamaProvider`] | `/api/generate`, NDJSON | token deltas |
//! | [`EdgequakeProvider`] | any `edgequake-llm` backend | one chunk |
//!
//! A [`ChunkStream`] is finite and not restartable. Dropping it drops the
//! underlying HTTP response, which closes the connection; that is how early
//! stop and interruption release the request.

mod anthropic;
mod bridge;
mod ollama;

pub use anthropic::AnthropicProvider;
pub use bridge::EdgequakeProvider;
pub use ollama::OllamaProvider;

use crate::config::ProjectConfig;
use crate::error::{FlashdeckError, ProviderError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Lazy sequence of generated text chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// A text-generation backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Short provider name, e.g. `ollama`.
    fn name(&self) -> &str;

    /// Model identifier sent to the backend.
    fn model(&self) -> &str;

    /// Cheap probe run before any expensive call.
    async fn check_availability(&self) -> bool;

    /// Start a streaming generation.
    async fn stream_generate(&self, prompt: &str, temperature: f32) -> Result<ChunkStream, ProviderError>;

    /// Generate the complete text in one call.
    ///
    /// The default drains [`Self::stream_generate`].
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, ProviderError> {
        let mut stream = self.stream_generate(prompt, temperature).await?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            out.push_str(&chunk?);
        }
        Ok(out)
    }

    /// The model's input+output window, when the backend can tell.
    async fn context_length(&self) -> Option<usize>;
}

/// Build a provider from the project configuration.
///
/// `name_override` and `model_override` come from the command line.
/// `claude`/`anthropic` and `ollama` use the native streaming clients;
/// any other name goes through `edgequake-llm`'s provider factory.
pub fn resolve_provider(
    project: &ProjectConfig,
    name_override: Option<&str>,
    model_override: Option<&str>,
    max_output_tokens: usize,
) -> Result<Arc<dyn GenerationProvider>, FlashdeckError> {
    let name = name_override
        .map(str::to_string)
        .unwrap_or_else(|| project.generation.provider.clone());
    debug!("Resolving generation provider '{}'", name);

    match name.to_ascii_lowercase().as_str() {
        "claude" | "anthropic" => {
            let c = &project.generation.claude;
            let api_key = std::env::var(&c.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| FlashdeckError::ProviderNotConfigured {
                    provider: name.clone(),
                    hint: format!("Set {} in the environment.", c.api_key_env),
                })?;
            let model = model_override.unwrap_or(&c.model);
            Ok(Arc::new(AnthropicProvider::new(
                api_key,
                model,
                &c.base_url,
                max_output_tokens.min(c.max_tokens),
            )?))
        }
        "ollama" => {
            let o = &project.generation.ollama;
            let model = model_override.unwrap_or(&o.model);
            Ok(Arc::new(OllamaProvider::new(&o.base_url, model)?))
        }
        other => {
            let model = model_override.ok_or_else(|| FlashdeckError::ProviderNotConfigured {
                provider: other.to_string(),
                hint: "Pass --model for providers other than claude and ollama.".into(),
            })?;
            Ok(Arc::new(
                EdgequakeProvider::from_factory(other, model)?.with_max_tokens(max_output_tokens),
            ))
        }
    }
}

/// Shared HTTP client settings. No total timeout: a generation can stream
/// for minutes; the controller bounds each wait instead.
pub(crate) fn http_client() -> Result<reqwest::Client, FlashdeckError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| FlashdeckError::Internal(format!("HTTP client: {e}")))
}

/// Map a non-2xx response to [`ProviderError::Http`], keeping a body excerpt.
pub(crate) async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        status: status.as_u16(),
        body: body.chars().take(500).collect(),
    })
}

struct LineState<S> {
    inner: S,
    buf: Vec<u8>,
    done: bool,
}

/// Split a byte stream into lines (without the terminator). A trailing
/// unterminated line is emitted at the end. A transport error ends the
/// stream after being yielded.
pub(crate) fn line_stream<S, B, E>(inner: S) -> impl Stream<Item = Result<String, ProviderError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + Unpin,
    B: AsRef<[u8]>,
    E: Into<ProviderError>,
{
    let state = LineState {
        inner,
        buf: Vec::new(),
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = st.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw[..pos]).trim_end_matches('\r').to_string();
                return Some((Ok(line), st));
            }
            if st.done {
                if st.buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut st.buf);
                let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
                return Some((Ok(line), st));
            }
            match st.inner.next().await {
                Some(Ok(bytes)) => st.buf.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(e.into()), st));
                }
                None => st.done = true,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, ProviderError>> + Send + Unpin {
        let owned: Vec<Result<Vec<u8>, ProviderError>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn lines_split_across_chunks() {
        let lines: Vec<String> = line_stream(bytes(&["{\"a\":", "1}\n{\"b\"", ":2}\r\n", "tail"]))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}", "tail"]);
    }

    #[tokio::test]
    async fn multibyte_split_across_chunks() {
        let s = "é\n";
        let b = s.as_bytes();
        let chunks: Vec<Result<Vec<u8>, ProviderError>> = vec![Ok(b[..1].to_vec()), Ok(b[1..].to_vec())];
        let lines: Vec<String> = line_stream(stream::iter(chunks))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["é"]);
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let chunks: Vec<Result<Vec<u8>, ProviderError>> = vec![
            Ok(b"one\ntw".to_vec()),
            Err(ProviderError::Transport("reset".into())),
            Ok(b"never\n".to_vec()),
        ];
        let items: Vec<Result<String, ProviderError>> = line_stream(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "one");
        assert!(items[1].is_err());
    }

    #[test]
    fn unknown_provider_requires_model() {
        let project = ProjectConfig::default();
        let err = match resolve_provider(&project, Some("mistral"), None, 4096) {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, FlashdeckError::ProviderNotConfigured { .. }));
    }

    #[test]
    fn ollama_resolves_without_credentials() {
        let project = ProjectConfig::default();
        let provider = resolve_provider(&project, Some("ollama"), Some("qwen3:8b"), 4096).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "qwen3:8b");
    }
}
