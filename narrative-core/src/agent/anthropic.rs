//! Anthropic-backed generation.

use super::{Generation, GenerationBackend, GenerationRequest, TokenUsage};
use crate::error::{GenerationError, GenerationResult};
use async_trait::async_trait;
use claude::{Claude, Request};
use std::time::Instant;

/// Generation backend powered by the Claude Messages API.
#[derive(Clone)]
pub struct AnthropicBackend {
    client: Claude,
}

impl AnthropicBackend {
    /// Wrap an existing client.
    pub fn new(client: Claude) -> Self {
        Self { client }
    }

    /// Build a backend from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> GenerationResult<Self> {
        Ok(Self {
            client: Claude::from_env()?,
        })
    }

    /// Use a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.client = self.client.with_model(model);
        self
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    async fn generate(&self, request: GenerationRequest) -> GenerationResult<Generation> {
        let started = Instant::now();

        let api_request = Request::user(request.user)
            .with_system(request.system)
            .with_max_tokens(request.params.max_tokens);
        let api_request = match request.params.temperature {
            Some(temperature) => api_request.with_temperature(temperature),
            None => api_request,
        };

        let response = self.client.complete(api_request).await?;
        if response.text.trim().is_empty() {
            return Err(GenerationError::EmptyCompletion);
        }

        Ok(Generation {
            text: response.text,
            usage: TokenUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            },
            duration: started.elapsed(),
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_without_key() {
        if std::env::var("ANTHROPIC_API_KEY").is_err() {
            assert!(matches!(
                AnthropicBackend::from_env(),
                Err(GenerationError::NoApiKey)
            ));
        }
    }
}
