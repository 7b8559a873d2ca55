//! The pipeline entry point.
//!
//! [`NarrativePipeline`] wires the stages together: assemble a context,
//! compile prompts, execute them, validate the output, loop through bounded
//! rewrites while validation blocks acceptance, then integrate the accepted
//! output into a [`NarrativeDelta`]. Every decision lands in the injected
//! audit trail.

use crate::agent::{GenerationBackend, GenerationParams};
use crate::audit::{AuditCategory, AuditEntry, AuditSeverity, AuditTrail};
use crate::context::ContextAssembler;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::AgentExecutor;
use crate::id::PipelineId;
use crate::integrate::{NarrativeDelta, PacingPolicy, StateIntegrator};
use crate::intent::Intent;
use crate::prompt::PromptCompiler;
use crate::state::StateProvider;
use crate::validate::{OutputValidator, ValidationVerdict, ValidatorConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pipeline-level knobs.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Spend rewrite attempts on Major findings too, not just Critical ones
    pub rewrite_on_major: bool,
}

impl PipelineConfig {
    /// Also rewrite on Major findings.
    pub fn with_rewrite_on_major(mut self, rewrite_on_major: bool) -> Self {
        self.rewrite_on_major = rewrite_on_major;
        self
    }
}

/// The narrative generation pipeline.
pub struct NarrativePipeline {
    assembler: ContextAssembler,
    compiler: PromptCompiler,
    executor: AgentExecutor,
    validator: OutputValidator,
    integrator: StateIntegrator,
    audit: Arc<AuditTrail>,
    config: PipelineConfig,
}

impl NarrativePipeline {
    /// Build a pipeline over a backend, recording into the given trail.
    pub fn new(backend: Arc<dyn GenerationBackend>, audit: Arc<AuditTrail>) -> Self {
        Self {
            assembler: ContextAssembler::new(),
            compiler: PromptCompiler::new(),
            executor: AgentExecutor::new(backend, Arc::clone(&audit)),
            validator: OutputValidator::new(),
            integrator: StateIntegrator::new(),
            audit,
            config: PipelineConfig::default(),
        }
    }

    /// Cap the context assembler's recent-event window.
    pub fn with_event_window(mut self, window: usize) -> Self {
        self.assembler = self.assembler.with_event_window(window);
        self
    }

    /// Replace the validator thresholds.
    pub fn with_validator_config(mut self, config: ValidatorConfig) -> Self {
        self.validator = OutputValidator::with_config(config);
        self
    }

    /// Replace the sampling parameters used per invocation.
    pub fn with_generation_params(mut self, params: GenerationParams) -> Self {
        self.executor = self.executor.with_params(params);
        self
    }

    /// Replace the pacing policy.
    pub fn with_pacing(mut self, pacing: Box<dyn PacingPolicy>) -> Self {
        self.integrator = self.integrator.with_pacing(pacing);
        self
    }

    /// Set pipeline-level knobs.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// The audit trail this pipeline records into.
    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    /// Run one narrative beat.
    ///
    /// Returns the integrated delta, or a typed failure carrying the last
    /// verdict and the run's audit report once `max_rewrite_attempts` is
    /// exhausted.
    pub async fn submit(
        &self,
        state: &dyn StateProvider,
        intent: &Intent,
        max_rewrite_attempts: u32,
        cancel: &CancellationToken,
    ) -> PipelineResult<NarrativeDelta> {
        let pipeline = PipelineId::new();
        info!(pipeline = %pipeline.short(), beat = intent.kind.name(), "pipeline run started");
        self.audit.record(
            AuditEntry::decision(
                pipeline,
                "run_started",
                format!("Narrative beat requested: {}", intent.kind.name()),
            )
            .with_detail(serde_json::json!({
                "intent": intent.kind.name(),
                "targets": intent.targets.len(),
            })),
        );

        let context = self.reject_on_input_error(pipeline, self.assembler.assemble(state, intent))?;
        let set = self.reject_on_input_error(pipeline, self.compiler.compile(&context, intent))?;
        self.audit.record(AuditEntry::decision(
            pipeline,
            "prompts_compiled",
            format!(
                "{} prompt(s) under {} order",
                set.len(),
                set.order().name()
            ),
        ));

        let mut output = self.executor.execute(pipeline, &set, &context, cancel).await;
        let mut verdict = self.validator.validate(&output, &context);
        self.record_verdict(pipeline, &verdict);

        let mut attempts = 0;
        while self.wants_rewrite(&verdict) && attempts < max_rewrite_attempts {
            attempts += 1;
            debug!(pipeline = %pipeline.short(), attempt = attempts, "rewrite attempt");
            self.audit.record(AuditEntry::decision(
                pipeline,
                "rewrite_started",
                format!("Rewrite attempt {attempts} of {max_rewrite_attempts}"),
            ));

            output = self
                .executor
                .rewrite(pipeline, &output, &verdict, &context, cancel)
                .await;
            verdict = self.validator.validate(&output, &context);
            self.record_verdict(pipeline, &verdict);
        }

        if !verdict.is_valid() {
            warn!(pipeline = %pipeline.short(), attempts, "pipeline run failed validation");
            self.audit.record(AuditEntry::new(
                pipeline,
                "run_failed",
                "pipeline",
                format!("Output still invalid after {attempts} rewrite attempt(s)"),
                AuditSeverity::Critical,
                AuditCategory::Pipeline,
            ));
            return Err(PipelineError::ValidationFailed {
                attempts,
                verdict,
                report: self.audit.report(pipeline),
            });
        }

        let delta = self.integrator.integrate(&output, &context);
        for change in &delta.changes {
            self.audit
                .record(AuditEntry::state_change(pipeline, change.description.clone()));
        }
        self.audit.record(AuditEntry::decision(
            pipeline,
            "run_completed",
            format!(
                "Delta produced: {} characters, {} event(s), {} change(s)",
                delta.text.len(),
                delta.events.len(),
                delta.changes.len()
            ),
        ));
        info!(pipeline = %pipeline.short(), "pipeline run completed");

        Ok(delta)
    }

    fn wants_rewrite(&self, verdict: &ValidationVerdict) -> bool {
        !verdict.is_valid() || (self.config.rewrite_on_major && verdict.has_major())
    }

    fn record_verdict(&self, pipeline: PipelineId, verdict: &ValidationVerdict) {
        if verdict.issues.is_empty() && verdict.warnings.is_empty() {
            self.audit.record(AuditEntry::new(
                pipeline,
                "validation_passed",
                "validator",
                "Output passed validation cleanly",
                AuditSeverity::Info,
                AuditCategory::Validation,
            ));
            return;
        }
        for issue in &verdict.issues {
            self.audit.record(AuditEntry::validation_failure(
                pipeline,
                issue.message.clone(),
                issue.severity == crate::validate::IssueSeverity::Critical,
            ));
        }
        for warning in &verdict.warnings {
            self.audit.record(AuditEntry::new(
                pipeline,
                "validation_warning",
                "validator",
                warning.clone(),
                AuditSeverity::Warning,
                AuditCategory::Validation,
            ));
        }
    }

    fn reject_on_input_error<T>(
        &self,
        pipeline: PipelineId,
        result: PipelineResult<T>,
    ) -> PipelineResult<T> {
        if let Err(error) = &result {
            self.audit.record(AuditEntry::new(
                pipeline,
                "input_rejected",
                "pipeline",
                error.to_string(),
                AuditSeverity::Error,
                AuditCategory::Pipeline,
            ));
        }
        result
    }
}
