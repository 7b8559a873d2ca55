//! Generation backends.
//!
//! The pipeline treats text generation as a substitutable strategy:
//! [`GenerationBackend`] is the single seam a provider has to fill. The live
//! Anthropic-backed implementation lives in [`anthropic`]; the deterministic
//! scripted double used by tests lives in [`crate::testing`].

pub mod anthropic;

use crate::error::GenerationResult;
use crate::prompt::{AgentPrompt, AgentRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sampling parameters for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Temperature, if the backend supports it
    pub temperature: Option<f32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: Some(0.8),
        }
    }
}

/// One request into the generation capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The role this request serves
    pub role: AgentRole,
    /// Standing instructions
    pub system: String,
    /// The concrete ask
    pub user: String,
    /// Sampling parameters
    pub params: GenerationParams,
}

impl GenerationRequest {
    /// Build a request from a compiled prompt.
    pub fn from_prompt(prompt: &AgentPrompt, params: GenerationParams) -> Self {
        Self {
            role: prompt.role,
            system: prompt.system.clone(),
            user: prompt.user.clone(),
            params,
        }
    }
}

/// A successful generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    /// The produced text
    pub text: String,
    /// Token accounting, as reported by the backend
    pub usage: TokenUsage,
    /// Wall-clock time the invocation took
    pub duration: Duration,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens
    pub input_tokens: usize,
    /// Output tokens
    pub output_tokens: usize,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// The pluggable generation capability.
///
/// Implementations enforce their own per-invocation timeout and surface it
/// as a [`GenerationError`](crate::error::GenerationError); the executor
/// turns any `Err` into a failed response rather than propagating it.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Produce text for one request.
    async fn generate(&self, request: GenerationRequest) -> GenerationResult<Generation>;

    /// Backend name, for logs and audit entries.
    fn name(&self) -> &str;
}
