//! Error types for the narrative pipeline.
//!
//! Uses thiserror for ergonomic error definition. The taxonomy follows the
//! pipeline's propagation policy: input errors are rejected synchronously and
//! are fatal to the call that made them; backend failures are captured as
//! failed responses by the executor and never escape it; validation
//! exhaustion is the one terminal pipeline error, carrying the last verdict
//! and the run's audit report for diagnosis.

use crate::audit::AuditReport;
use crate::id::{LocationId, ParticipantId};
use crate::validate::ValidationVerdict;

/// Errors returned by pipeline entry points.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An intent named a participant the state provider does not know
    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    /// An intent named a location the state provider does not know
    #[error("Unknown location: {0}")]
    UnknownLocation(LocationId),

    /// A dialogue beat was requested but there is nobody to speak
    #[error("No participants available for dialogue")]
    EmptyCast,

    /// A prompt set declared the same role twice
    #[error("Duplicate role in prompt set: {role}")]
    DuplicateRole {
        /// Rendered label of the colliding role
        role: String,
    },

    /// A prompt set with no prompts was built
    #[error("Prompt set contains no prompts")]
    EmptyPromptSet,

    /// The rewrite loop ran out of attempts without producing valid output
    #[error("Validation failed after {attempts} rewrite attempt(s)")]
    ValidationFailed {
        /// Rewrite attempts consumed before giving up
        attempts: u32,
        /// The verdict on the final rejected output
        verdict: ValidationVerdict,
        /// Audit report for the failed run
        report: AuditReport,
    },
}

/// Typed failures from a generation backend.
///
/// These never propagate out of the executor: an `Err` from a backend
/// becomes a failed `AgentResponse` inside a still-returned `RawOutput`.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// API key not configured
    #[error("API key not configured")]
    NoApiKey,

    /// Error response from the provider
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Provider-supplied error body
        message: String,
    },

    /// Network or transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// The invocation exceeded the backend's own timeout
    #[error("Generation timed out after {duration:?}")]
    Timeout {
        /// How long the backend waited
        duration: std::time::Duration,
    },

    /// The backend produced no usable text
    #[error("Backend returned an empty completion")]
    EmptyCompletion,

    /// The invocation was cancelled mid-flight
    #[error("Generation cancelled")]
    Cancelled,

    /// Any other backend-reported failure
    #[error("Generation failed: {0}")]
    Failed(String),
}

impl From<claude::Error> for GenerationError {
    fn from(err: claude::Error) -> Self {
        match err {
            claude::Error::NoApiKey => GenerationError::NoApiKey,
            claude::Error::Api { status, message } => GenerationError::Api { status, message },
            claude::Error::Network(msg) => GenerationError::Network(msg),
            claude::Error::Parse(msg) => GenerationError::Failed(format!("bad response: {msg}")),
            claude::Error::Config(msg) => GenerationError::Failed(msg),
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Result type for backend invocations
pub type GenerationResult<T> = std::result::Result<T, GenerationError>;
