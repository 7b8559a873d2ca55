//! Narrative generation pipeline.
//!
//! This crate provides:
//! - Context assembly from a pluggable narrative state provider
//! - Prompt compilation into role-addressed, priority-tagged prompt sets
//! - Agent execution under Sequential / Parallel / Conditional ordering,
//!   with a bounded validation-driven rewrite loop
//! - Severity-tagged output validation
//! - Integration of accepted output into a narrative delta of text,
//!   synthesized events, and state-change proposals
//! - A capacity-bounded, queryable audit trail of every decision
//!
//! # Quick Start
//!
//! ```ignore
//! use narrative_core::{
//!     AnthropicBackend, AuditTrail, Intent, MemoryState, NarrativePipeline, Participant,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut state = MemoryState::new();
//!     state.add_participant(Participant::new("Aria"));
//!
//!     let backend = Arc::new(AnthropicBackend::from_env()?);
//!     let audit = Arc::new(AuditTrail::default());
//!     let pipeline = NarrativePipeline::new(backend, Arc::clone(&audit));
//!
//!     let delta = pipeline
//!         .submit(&state, &Intent::continue_story(), 2, &CancellationToken::new())
//!         .await?;
//!     println!("{}", delta.text);
//!     println!("{}", audit.global_report());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod audit;
pub mod context;
pub mod error;
pub mod executor;
pub mod id;
pub mod integrate;
pub mod intent;
pub mod pipeline;
pub mod prompt;
pub mod state;
pub mod testing;
pub mod validate;

// Primary public API
pub use agent::anthropic::AnthropicBackend;
pub use agent::{GenerationBackend, GenerationParams, GenerationRequest};
pub use audit::{AuditCategory, AuditEntry, AuditReport, AuditSeverity, AuditTrail};
pub use context::{ContextAssembler, NarrativeContext};
pub use error::{GenerationError, PipelineError, PipelineResult};
pub use executor::{AgentExecutor, AgentResponse, RawOutput};
pub use id::{EventId, LocationId, ParticipantId, PipelineId};
pub use integrate::{NarrativeDelta, PacingPolicy, StateChange, StateIntegrator};
pub use intent::{Intent, IntentKind};
pub use pipeline::{NarrativePipeline, PipelineConfig};
pub use prompt::{AgentPrompt, AgentRole, ExecutionOrder, PromptCompiler, PromptPriority, PromptSet};
pub use state::{Location, MemoryState, Participant, ParticipantStatus, StateProvider};
pub use testing::{PipelineHarness, ScriptedBackend, ScriptedReply};
pub use validate::{OutputValidator, ValidationVerdict, ValidatorConfig};
