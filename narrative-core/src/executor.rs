//! Agent execution.
//!
//! The [`AgentExecutor`] runs a compiled [`PromptSet`] against the pluggable
//! generation backend under the set's declared execution order, and drives
//! the rewrite pass after a failed validation. Backend failure is data, not
//! an error: every attempted prompt yields exactly one [`AgentResponse`]
//! inside a still-returned [`RawOutput`], and a cancellation mid-invocation
//! resolves as a failure for that specific prompt rather than aborting the
//! run.

use crate::agent::{GenerationBackend, GenerationParams, GenerationRequest};
use crate::audit::{AuditEntry, AuditTrail};
use crate::context::NarrativeContext;
use crate::error::GenerationError;
use crate::id::PipelineId;
use crate::prompt::{AgentPrompt, AgentRole, ExecutionOrder, PromptPriority, PromptSet};
use crate::validate::ValidationVerdict;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of one attempted prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// The role that was invoked
    pub role: AgentRole,
    /// Produced text; empty on failure
    pub text: String,
    /// Whether the invocation succeeded
    pub success: bool,
    /// Failure description, when it did not
    pub error: Option<String>,
    /// Wall-clock time of the attempt
    pub duration: Duration,
    /// Free-form metadata (token counts, backend name, ...)
    pub metadata: BTreeMap<String, String>,
}

impl AgentResponse {
    /// A successful response.
    pub fn succeeded(role: AgentRole, text: impl Into<String>, duration: Duration) -> Self {
        Self {
            role,
            text: text.into(),
            success: true,
            error: None,
            duration,
            metadata: BTreeMap::new(),
        }
    }

    /// A failed response.
    pub fn failed(role: AgentRole, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            role,
            text: String::new(),
            success: false,
            error: Some(error.into()),
            duration,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Every response from one executor invocation plus the total duration.
///
/// Keyed by role: consumers must never depend on response order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOutput {
    responses: Vec<AgentResponse>,
    total_duration: Duration,
}

impl RawOutput {
    /// Bundle responses with the invocation's total duration.
    pub fn new(responses: Vec<AgentResponse>, total_duration: Duration) -> Self {
        Self {
            responses,
            total_duration,
        }
    }

    /// All responses.
    pub fn responses(&self) -> &[AgentResponse] {
        &self.responses
    }

    /// The response for a role, if that role was attempted.
    pub fn response_for_role(&self, role: &AgentRole) -> Option<&AgentResponse> {
        self.responses.iter().find(|r| &r.role == role)
    }

    /// The text a role produced, if it was attempted.
    pub fn content_for_role(&self, role: &AgentRole) -> Option<&str> {
        self.response_for_role(role).map(|r| r.text.as_str())
    }

    /// Whether a role was attempted and succeeded.
    pub fn succeeded(&self, role: &AgentRole) -> bool {
        self.response_for_role(role).is_some_and(|r| r.success)
    }

    /// Whether every attempted role succeeded.
    pub fn all_successful(&self) -> bool {
        self.responses.iter().all(|r| r.success)
    }

    /// The successful responses.
    pub fn successful(&self) -> impl Iterator<Item = &AgentResponse> {
        self.responses.iter().filter(|r| r.success)
    }

    /// Number of attempted roles.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Whether nothing was attempted.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Total wall-clock duration of the invocation.
    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }
}

/// Runs prompt sets against the generation backend.
pub struct AgentExecutor {
    backend: Arc<dyn GenerationBackend>,
    audit: Arc<AuditTrail>,
    params: GenerationParams,
}

impl AgentExecutor {
    /// Create an executor over a backend, recording into the given trail.
    pub fn new(backend: Arc<dyn GenerationBackend>, audit: Arc<AuditTrail>) -> Self {
        Self {
            backend,
            audit,
            params: GenerationParams::default(),
        }
    }

    /// Override the sampling parameters used for every invocation.
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Execute a prompt set per its declared order.
    pub async fn execute(
        &self,
        pipeline: PipelineId,
        set: &PromptSet,
        context: &NarrativeContext,
        cancel: &CancellationToken,
    ) -> RawOutput {
        let started = Instant::now();
        debug!(
            pipeline = %pipeline.short(),
            order = set.order().name(),
            prompts = set.len(),
            cast = context.participants().len(),
            "executing prompt set"
        );

        let responses = match set.order() {
            ExecutionOrder::Sequential => self.run_sequential(pipeline, set, cancel).await,
            ExecutionOrder::Parallel => self.run_parallel(pipeline, set, cancel).await,
            ExecutionOrder::Conditional => self.run_conditional(pipeline, set, cancel).await,
        };

        RawOutput::new(responses, started.elapsed())
    }

    /// Re-invoke the roles whose previous response succeeded, feeding each
    /// its prior text plus the verdict's findings as revision instructions.
    /// Failed responses are carried over unchanged, so the returned output
    /// spans the same roles as the input.
    pub async fn rewrite(
        &self,
        pipeline: PipelineId,
        previous: &RawOutput,
        verdict: &ValidationVerdict,
        context: &NarrativeContext,
        cancel: &CancellationToken,
    ) -> RawOutput {
        let started = Instant::now();
        let feedback = verdict.feedback();
        let mut responses = Vec::with_capacity(previous.len());

        for prior in previous.responses() {
            if !prior.success {
                // A failed call is not rewritten.
                responses.push(prior.clone());
                continue;
            }
            let request = GenerationRequest {
                role: prior.role,
                system: revision_system(&prior.role, context),
                user: revision_user(&prior.text, &feedback),
                params: self.params.clone(),
            };
            responses.push(self.attempt(pipeline, "rewrite", request, cancel).await);
        }

        RawOutput::new(responses, started.elapsed())
    }

    async fn run_sequential(
        &self,
        pipeline: PipelineId,
        set: &PromptSet,
        cancel: &CancellationToken,
    ) -> Vec<AgentResponse> {
        let mut responses = Vec::with_capacity(set.len());
        for prompt in set.prompts() {
            let response = self.attempt_prompt(pipeline, prompt, cancel).await;
            let halt = !response.success && prompt.priority == PromptPriority::Required;
            responses.push(response);
            if halt {
                self.audit.record(AuditEntry::decision(
                    pipeline,
                    "sequential_halt",
                    format!(
                        "Required prompt for {} failed; later prompts not attempted",
                        prompt.role
                    ),
                ));
                warn!(pipeline = %pipeline.short(), role = %prompt.role, "sequential run halted");
                break;
            }
        }
        responses
    }

    async fn run_parallel(
        &self,
        pipeline: PipelineId,
        set: &PromptSet,
        cancel: &CancellationToken,
    ) -> Vec<AgentResponse> {
        let attempts = set
            .prompts()
            .iter()
            .map(|prompt| self.attempt_prompt(pipeline, prompt, cancel));
        // Every declared prompt runs to completion; no early abort.
        futures::future::join_all(attempts).await
    }

    async fn run_conditional(
        &self,
        pipeline: PipelineId,
        set: &PromptSet,
        cancel: &CancellationToken,
    ) -> Vec<AgentResponse> {
        let mut responses = Vec::with_capacity(set.len());
        for prompt in set.prompts() {
            if prompt.priority == PromptPriority::Fallback {
                continue;
            }
            responses.push(self.attempt_prompt(pipeline, prompt, cancel).await);
        }

        let any_success = responses.iter().any(|r| r.success);
        if any_success {
            for prompt in set.prompts() {
                if prompt.priority == PromptPriority::Fallback {
                    responses.push(self.attempt_prompt(pipeline, prompt, cancel).await);
                }
            }
        } else if set
            .prompts()
            .iter()
            .any(|p| p.priority == PromptPriority::Fallback)
        {
            self.audit.record(AuditEntry::decision(
                pipeline,
                "fallback_skipped",
                "Every Required and Optional prompt failed; nothing to fall back from",
            ));
        }
        responses
    }

    async fn attempt_prompt(
        &self,
        pipeline: PipelineId,
        prompt: &AgentPrompt,
        cancel: &CancellationToken,
    ) -> AgentResponse {
        let request = GenerationRequest::from_prompt(prompt, self.params.clone());
        self.attempt(pipeline, "invoke", request, cancel).await
    }

    async fn attempt(
        &self,
        pipeline: PipelineId,
        action: &str,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> AgentResponse {
        let role = request.role;
        let started = Instant::now();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            result = self.backend.generate(request) => result,
        };

        let response = match outcome {
            Ok(generation) => AgentResponse::succeeded(role, generation.text, generation.duration)
                .with_metadata("backend", self.backend.name())
                .with_metadata("input_tokens", generation.usage.input_tokens.to_string())
                .with_metadata("output_tokens", generation.usage.output_tokens.to_string()),
            Err(error) => AgentResponse::failed(role, error.to_string(), started.elapsed()),
        };

        self.audit.record(AuditEntry::agent_action(
            pipeline,
            role.label(),
            action,
            match &response.error {
                Some(error) => format!("{action} failed: {error}"),
                None => format!("{action} produced {} characters", response.text.len()),
            },
            response.success,
        ));

        response
    }
}

fn revision_system(role: &AgentRole, context: &NarrativeContext) -> String {
    match role {
        AgentRole::Narrator => "You are the narrator of an ongoing interactive story, revising \
                               your own draft. Keep what works, fix what is flagged."
            .to_string(),
        AgentRole::Character(id) => {
            let name = context
                .participant(*id)
                .map(|p| p.name.as_str())
                .unwrap_or("your character");
            format!(
                "You are revising dialogue you wrote as {name}. Stay in character; fix only \
                 what is flagged."
            )
        }
        AgentRole::Summarizer => "You are revising a story summary you wrote. Keep it compact; \
                                  fix only what is flagged."
            .to_string(),
    }
}

fn revision_user(prior_text: &str, feedback: &str) -> String {
    format!(
        "Here is your previous draft:\n\n{prior_text}\n\n\
         Revise it to address the following findings:\n{feedback}\n\
         Return only the revised text."
    )
}
