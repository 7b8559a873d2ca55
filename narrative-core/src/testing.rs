//! Testing utilities for the narrative pipeline.
//!
//! This module provides tools for integration testing:
//! - `ScriptedBackend` for deterministic runs without API calls
//! - `PipelineHarness` for scripted pipeline scenarios
//! - Assertion helpers for verifying outputs and verdicts

use crate::agent::{Generation, GenerationBackend, GenerationRequest, TokenUsage};
use crate::audit::AuditTrail;
use crate::error::{GenerationError, GenerationResult, PipelineResult};
use crate::executor::RawOutput;
use crate::id::ParticipantId;
use crate::integrate::NarrativeDelta;
use crate::intent::Intent;
use crate::pipeline::NarrativePipeline;
use crate::prompt::AgentRole;
use crate::state::{Location, MemoryState, Participant};
use crate::validate::{IssueSeverity, ValidationVerdict};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A scripted reply for one backend invocation.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    outcome: Result<String, String>,
    delay: Option<Duration>,
}

impl ScriptedReply {
    /// Reply with the given text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            outcome: Ok(text.into()),
            delay: None,
        }
    }

    /// Fail with the given message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            delay: None,
        }
    }

    /// Delay the reply, for ordering and cancellation tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A generation backend that returns scripted replies.
///
/// Replies are queued per role and consumed in order; a role with no queued
/// reply gets the fallback. Every invocation is recorded for assertions.
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<AgentRole, VecDeque<ScriptedReply>>>,
    fallback: Mutex<ScriptedReply>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    /// Create a backend with no scripts queued.
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(ScriptedReply::text(
                "The scripted backend has no reply for this role.",
            )),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply for a role.
    pub fn script(&self, role: AgentRole, reply: ScriptedReply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(reply);
    }

    /// Replace the reply used when a role's queue is empty.
    pub fn set_fallback(&self, reply: ScriptedReply) {
        *self.fallback.lock().unwrap() = reply;
    }

    /// Roles invoked so far, in invocation order.
    pub fn calls(&self) -> Vec<AgentRole> {
        self.requests.lock().unwrap().iter().map(|r| r.role).collect()
    }

    /// Full requests received so far, in invocation order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: GenerationRequest) -> GenerationResult<Generation> {
        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&request.role).and_then(VecDeque::pop_front) {
                Some(reply) => reply,
                None => self.fallback.lock().unwrap().clone(),
            }
        };
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }

        match reply.outcome {
            Ok(text) => Ok(Generation {
                usage: TokenUsage {
                    input_tokens: 0,
                    output_tokens: text.split_whitespace().count(),
                },
                duration: reply.delay.unwrap_or(Duration::from_millis(1)),
                text,
            }),
            Err(message) => Err(GenerationError::Failed(message)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Harness wiring a scripted backend, an audit trail, and a sample world
/// into a ready-to-run pipeline.
pub struct PipelineHarness {
    /// The scripted backend.
    pub backend: Arc<ScriptedBackend>,
    /// The in-memory world.
    pub state: MemoryState,
    /// The pipeline under test.
    pub pipeline: NarrativePipeline,
}

impl PipelineHarness {
    /// Create a harness with a small sample world: two active participants
    /// at one location, one recorded event.
    pub fn new() -> Self {
        let mut state = MemoryState::new();
        let waystation =
            state.add_location(Location::new("The Waystation", "A lantern-lit rest stop"));
        state.add_participant(
            Participant::new("Aria")
                .with_fact("Carries a sealed letter")
                .with_location(waystation),
        );
        state.add_participant(Participant::new("Bren").with_location(waystation));
        state.record_event("A rider arrived after dark");

        Self::with_state(state)
    }

    /// Create a harness over a custom world.
    pub fn with_state(state: MemoryState) -> Self {
        let backend = Arc::new(ScriptedBackend::new());
        let audit = Arc::new(AuditTrail::default());
        let pipeline = NarrativePipeline::new(
            Arc::clone(&backend) as Arc<dyn GenerationBackend>,
            audit,
        );

        Self {
            backend,
            state,
            pipeline,
        }
    }

    /// Queue a reply for a role.
    pub fn script(&self, role: AgentRole, reply: ScriptedReply) -> &Self {
        self.backend.script(role, reply);
        self
    }

    /// Look up a participant id by name. Panics if absent (test-only).
    pub fn participant(&self, name: &str) -> ParticipantId {
        self.state
            .find_participant(name)
            .unwrap_or_else(|| panic!("no participant named '{name}' in harness state"))
            .id
    }

    /// Submit one beat with a fresh cancellation token.
    pub async fn submit(
        &self,
        intent: &Intent,
        max_rewrite_attempts: u32,
    ) -> PipelineResult<NarrativeDelta> {
        self.pipeline
            .submit(&self.state, intent, max_rewrite_attempts, &CancellationToken::new())
            .await
    }

    /// The audit trail the pipeline records into.
    pub fn audit(&self) -> &Arc<AuditTrail> {
        self.pipeline.audit()
    }
}

impl Default for PipelineHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that a verdict accepts the output.
#[track_caller]
pub fn assert_valid(verdict: &ValidationVerdict) {
    assert!(
        verdict.is_valid(),
        "Expected a valid verdict, got issues: {:?}",
        verdict.issues
    );
}

/// Assert that a verdict blocks the output.
#[track_caller]
pub fn assert_invalid(verdict: &ValidationVerdict) {
    assert!(
        !verdict.is_valid(),
        "Expected an invalid verdict, got issues: {:?}",
        verdict.issues
    );
}

/// Assert that a verdict carries a Critical finding mentioning `needle`.
#[track_caller]
pub fn assert_critical_mentions(verdict: &ValidationVerdict, needle: &str) {
    assert!(
        verdict
            .issues_at(IssueSeverity::Critical)
            .any(|i| i.message.contains(needle)),
        "Expected a Critical finding mentioning '{needle}', got: {:?}",
        verdict.issues
    );
}

/// Assert that a role was attempted in the output.
#[track_caller]
pub fn assert_role_attempted(output: &RawOutput, role: &AgentRole) {
    assert!(
        output.response_for_role(role).is_some(),
        "Expected role {role} to have been attempted"
    );
}

/// Assert that a role was never attempted in the output.
#[track_caller]
pub fn assert_role_absent(output: &RawOutput, role: &AgentRole) {
    assert!(
        output.response_for_role(role).is_none(),
        "Expected role {role} to be absent from the output"
    );
}
