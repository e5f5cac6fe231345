//! Any `edgequake-llm` chat backend as a [`GenerationProvider`].
//!
//! The chat API returns the whole completion at once, so the stream carries
//! a single chunk and early stop only trims output after the fact.

use super::{ChunkStream, GenerationProvider};
use crate::error::{FlashdeckError, ProviderError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::stream;
use std::sync::Arc;
use tracing::debug;

pub struct EdgequakeProvider {
    inner: Arc<dyn LLMProvider>,
    name: String,
    model: String,
    max_tokens: usize,
}

impl EdgequakeProvider {
    /// Wrap an already-constructed provider.
    pub fn new(inner: Arc<dyn LLMProvider>, name: &str, model: &str) -> Self {
        Self {
            inner,
            name: name.to_string(),
            model: model.to_string(),
            max_tokens: 16_000,
        }
    }

    /// Build through [`ProviderFactory::create_llm_provider`], which reads
    /// the provider's API key from its usual environment variable.
    pub fn from_factory(name: &str, model: &str) -> Result<Self, FlashdeckError> {
        let inner = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            FlashdeckError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::new(inner, name, model))
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }
}

#[async_trait]
impl GenerationProvider for EdgequakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    /// Construction already validated credentials; there is no cheaper probe.
    async fn check_availability(&self) -> bool {
        true
    }

    async fn stream_generate(&self, prompt: &str, temperature: f32) -> Result<ChunkStream, ProviderError> {
        let text = self.generate(prompt, temperature).await?;
        Ok(Box::pin(stream::iter([Ok(text)])))
    }

    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, ProviderError> {
        let options = CompletionOptions {
            temperature: Some(temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };
        let messages = [ChatMessage::user(prompt)];
        let response = self
            .inner
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ProviderError::Api(format!("{e}")))?;
        debug!(
            "{}/{}: {} input tokens, {} output tokens",
            self.name, self.model, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }

    async fn context_length(&self) -> Option<usize> {
        None
    }
}
