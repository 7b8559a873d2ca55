//! State integration.
//!
//! The [`StateIntegrator`] merges an accepted [`RawOutput`] into a
//! [`NarrativeDelta`]: deterministically ordered text, synthesized events,
//! and state-change proposals. The delta is a proposal; the state provider
//! decides what to apply.

use crate::context::NarrativeContext;
use crate::executor::RawOutput;
use crate::id::{EventId, ParticipantId};
use crate::prompt::AgentRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Text used when every role came back empty. Never the empty string.
pub const FALLBACK_TEXT: &str = "The moment passes quietly, and the story waits.";

/// Kind of synthesized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A narrative beat was generated
    NarrativeGenerated,
    /// The generated text contains spoken dialogue
    DialogueGenerated,
}

impl EventKind {
    /// Short name for rendering.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::NarrativeGenerated => "narrative_generated",
            EventKind::DialogueGenerated => "dialogue_generated",
        }
    }
}

/// An event synthesized from one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedEvent {
    /// Unique identifier
    pub id: EventId,
    /// Kind tag
    pub kind: EventKind,
    /// What happened
    pub description: String,
    /// When it was synthesized
    pub timestamp: DateTime<Utc>,
}

impl GeneratedEvent {
    fn new(kind: EventKind, description: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            kind,
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Kind of proposed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChangeKind {
    /// In-fiction time moved forward
    TimeAdvanced,
    /// A participant's status changed
    StatusChanged,
    /// A participant moved
    LocationChanged,
}

impl StateChangeKind {
    /// Short name for rendering.
    pub fn name(&self) -> &'static str {
        match self {
            StateChangeKind::TimeAdvanced => "time_advanced",
            StateChangeKind::StatusChanged => "status_changed",
            StateChangeKind::LocationChanged => "location_changed",
        }
    }
}

/// One proposed change to narrative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    /// Kind tag
    pub kind: StateChangeKind,
    /// The entity concerned, when one is
    pub entity: Option<ParticipantId>,
    /// Prior value, when known
    pub old_value: Option<String>,
    /// Proposed value
    pub new_value: String,
    /// Human-readable description
    pub description: String,
}

impl StateChange {
    /// Propose advancing in-fiction time by `minutes`.
    pub fn time_advanced(minutes: u64) -> Self {
        Self {
            kind: StateChangeKind::TimeAdvanced,
            entity: None,
            old_value: None,
            new_value: minutes.to_string(),
            description: format!("Time advances by {minutes} minute(s)"),
        }
    }
}

/// Informational metadata about one delta. Never feeds back into pipeline
/// decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaMetadata {
    /// Distinct roles that contributed text
    pub source_roles: Vec<AgentRole>,
    /// Total generation duration
    pub total_duration: Duration,
    /// Number of synthesized events
    pub event_count: usize,
    /// Number of proposed state changes
    pub change_count: usize,
}

/// The merged result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeDelta {
    /// Merged narrative text
    pub text: String,
    /// Synthesized events, in synthesis order
    pub events: Vec<GeneratedEvent>,
    /// Proposed state changes, in synthesis order
    pub changes: Vec<StateChange>,
    /// Informational metadata
    pub metadata: DeltaMetadata,
}

/// Maps generation latency to in-fiction time. Deliberately replaceable:
/// the default couples pacing to wall-clock latency, but nothing downstream
/// depends on that choice.
pub trait PacingPolicy: Send + Sync {
    /// In-fiction minutes to advance for a run that took `generation_time`.
    fn minutes_for(&self, generation_time: Duration) -> u64;
}

/// One in-fiction minute per second of generation latency, clamped.
#[derive(Debug, Clone)]
pub struct LatencyPacing {
    /// Lower clamp
    pub min_minutes: u64,
    /// Upper clamp
    pub max_minutes: u64,
}

impl Default for LatencyPacing {
    fn default() -> Self {
        Self {
            min_minutes: 1,
            max_minutes: 30,
        }
    }
}

impl PacingPolicy for LatencyPacing {
    fn minutes_for(&self, generation_time: Duration) -> u64 {
        generation_time
            .as_secs()
            .clamp(self.min_minutes, self.max_minutes)
    }
}

/// Always advance the same number of minutes, whatever the latency.
#[derive(Debug, Clone)]
pub struct FixedPacing(pub u64);

impl PacingPolicy for FixedPacing {
    fn minutes_for(&self, _generation_time: Duration) -> u64 {
        self.0
    }
}

/// Merges validated outputs into narrative deltas.
pub struct StateIntegrator {
    pacing: Box<dyn PacingPolicy>,
}

impl StateIntegrator {
    /// Create an integrator with the default latency-based pacing.
    pub fn new() -> Self {
        Self {
            pacing: Box::new(LatencyPacing::default()),
        }
    }

    /// Replace the pacing policy.
    pub fn with_pacing(mut self, pacing: Box<dyn PacingPolicy>) -> Self {
        self.pacing = pacing;
        self
    }

    /// Merge one output into a delta.
    ///
    /// Concatenation is deterministic and role-ordered: narrator first, then
    /// character responses in declaration order, then the summarizer. Roles
    /// with empty text are skipped; an all-empty output yields
    /// [`FALLBACK_TEXT`].
    pub fn integrate(&self, output: &RawOutput, context: &NarrativeContext) -> NarrativeDelta {
        let nonempty = output
            .successful()
            .filter(|r| !r.text.trim().is_empty())
            .collect::<Vec<_>>();

        let mut sections: Vec<(AgentRole, &str)> = Vec::new();
        for response in nonempty.iter().filter(|r| r.role == AgentRole::Narrator) {
            sections.push((response.role, response.text.trim()));
        }
        for response in nonempty.iter().filter(|r| r.role.is_character()) {
            sections.push((response.role, response.text.trim()));
        }
        for response in nonempty.iter().filter(|r| r.role == AgentRole::Summarizer) {
            sections.push((response.role, response.text.trim()));
        }

        let text = if sections.is_empty() {
            FALLBACK_TEXT.to_string()
        } else {
            sections
                .iter()
                .map(|(_, text)| *text)
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let mut source_roles: Vec<AgentRole> = Vec::new();
        for (role, _) in &sections {
            if !source_roles.contains(role) {
                source_roles.push(*role);
            }
        }

        let mut events = vec![GeneratedEvent::new(
            EventKind::NarrativeGenerated,
            format!(
                "Narrative generated from {} agent response(s) for a cast of {}",
                output.len(),
                context.participants().len()
            ),
        )];
        if nonempty.iter().any(|r| contains_quoted_utterance(&r.text)) {
            events.push(GeneratedEvent::new(
                EventKind::DialogueGenerated,
                "Generated text contains spoken dialogue",
            ));
        }

        let minutes = self.pacing.minutes_for(output.total_duration());
        let changes = vec![StateChange::time_advanced(minutes)];

        let metadata = DeltaMetadata {
            source_roles,
            total_duration: output.total_duration(),
            event_count: events.len(),
            change_count: changes.len(),
        };

        NarrativeDelta {
            text,
            events,
            changes,
            metadata,
        }
    }
}

impl Default for StateIntegrator {
    fn default() -> Self {
        Self::new()
    }
}

/// True when the text contains a non-empty quoted utterance.
fn contains_quoted_utterance(text: &str) -> bool {
    for (open, close) in [('"', '"'), ('\u{201C}', '\u{201D}')] {
        let mut rest = text;
        while let Some(start) = rest.find(open) {
            let after = &rest[start + open.len_utf8()..];
            match after.find(close) {
                Some(end) => {
                    if !after[..end].trim().is_empty() {
                        return true;
                    }
                    rest = &after[end + close.len_utf8()..];
                }
                None => break,
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextAssembler;
    use crate::executor::AgentResponse;
    use crate::intent::Intent;
    use crate::state::{MemoryState, Participant};

    fn empty_context() -> NarrativeContext {
        ContextAssembler::new()
            .assemble(&MemoryState::new(), &Intent::continue_story())
            .unwrap()
    }

    fn context_with_cast() -> (NarrativeContext, ParticipantId) {
        let mut state = MemoryState::new();
        let aria = state.add_participant(Participant::new("Aria"));
        let context = ContextAssembler::new()
            .assemble(&state, &Intent::continue_story())
            .unwrap();
        (context, aria)
    }

    #[test]
    fn test_role_ordered_concatenation() {
        let (context, aria) = context_with_cast();
        let output = RawOutput::new(
            vec![
                AgentResponse::succeeded(
                    AgentRole::Summarizer,
                    "In short, a quiet night.",
                    Duration::from_millis(5),
                ),
                AgentResponse::succeeded(
                    AgentRole::Character(aria),
                    "\"Keep your voice down,\" Aria murmurs.",
                    Duration::from_millis(5),
                ),
                AgentResponse::succeeded(
                    AgentRole::Narrator,
                    "The common room empties out.",
                    Duration::from_millis(5),
                ),
            ],
            Duration::from_millis(15),
        );

        let delta = StateIntegrator::new().integrate(&output, &context);

        let narrator_at = delta.text.find("common room").unwrap();
        let character_at = delta.text.find("Keep your voice down").unwrap();
        let summary_at = delta.text.find("In short").unwrap();
        assert!(narrator_at < character_at);
        assert!(character_at < summary_at);
        assert_eq!(delta.metadata.source_roles.len(), 3);
    }

    #[test]
    fn test_empty_roles_skipped() {
        let (context, _) = context_with_cast();
        let output = RawOutput::new(
            vec![
                AgentResponse::succeeded(
                    AgentRole::Narrator,
                    "The rain keeps falling.",
                    Duration::from_millis(5),
                ),
                AgentResponse::succeeded(AgentRole::Summarizer, "   ", Duration::from_millis(5)),
            ],
            Duration::from_millis(10),
        );

        let delta = StateIntegrator::new().integrate(&output, &context);
        assert_eq!(delta.text, "The rain keeps falling.");
        assert_eq!(delta.metadata.source_roles, vec![AgentRole::Narrator]);
    }

    #[test]
    fn test_all_empty_uses_fallback_text() {
        let output = RawOutput::new(
            vec![AgentResponse::succeeded(
                AgentRole::Narrator,
                "",
                Duration::from_millis(5),
            )],
            Duration::from_millis(5),
        );

        let delta = StateIntegrator::new().integrate(&output, &empty_context());
        assert_eq!(delta.text, FALLBACK_TEXT);
        assert!(!delta.text.is_empty());
    }

    #[test]
    fn test_always_one_narrative_event() {
        let output = RawOutput::new(
            vec![AgentResponse::succeeded(
                AgentRole::Narrator,
                "Dawn breaks over the pass.",
                Duration::from_millis(5),
            )],
            Duration::from_millis(5),
        );

        let delta = StateIntegrator::new().integrate(&output, &empty_context());
        let narrative_events: Vec<_> = delta
            .events
            .iter()
            .filter(|e| e.kind == EventKind::NarrativeGenerated)
            .collect();
        assert_eq!(narrative_events.len(), 1);
    }

    #[test]
    fn test_dialogue_event_on_quoted_utterance() {
        let output = RawOutput::new(
            vec![AgentResponse::succeeded(
                AgentRole::Narrator,
                "\"Who goes there?\" calls the guard.",
                Duration::from_millis(5),
            )],
            Duration::from_millis(5),
        );

        let delta = StateIntegrator::new().integrate(&output, &empty_context());
        assert!(delta
            .events
            .iter()
            .any(|e| e.kind == EventKind::DialogueGenerated));
    }

    #[test]
    fn test_no_dialogue_event_without_quotes() {
        let output = RawOutput::new(
            vec![AgentResponse::succeeded(
                AgentRole::Narrator,
                "The guard waves them through without a word.",
                Duration::from_millis(5),
            )],
            Duration::from_millis(5),
        );

        let delta = StateIntegrator::new().integrate(&output, &empty_context());
        assert!(!delta
            .events
            .iter()
            .any(|e| e.kind == EventKind::DialogueGenerated));
    }

    #[test]
    fn test_exactly_one_time_advanced_proposal() {
        let output = RawOutput::new(
            vec![AgentResponse::succeeded(
                AgentRole::Narrator,
                "Night falls.",
                Duration::from_secs(4),
            )],
            Duration::from_secs(4),
        );

        let delta = StateIntegrator::new().integrate(&output, &empty_context());
        assert_eq!(delta.changes.len(), 1);
        assert_eq!(delta.changes[0].kind, StateChangeKind::TimeAdvanced);
        assert_eq!(delta.changes[0].new_value, "4");
        assert_eq!(delta.metadata.change_count, 1);
    }

    #[test]
    fn test_latency_pacing_clamps() {
        let pacing = LatencyPacing::default();
        assert_eq!(pacing.minutes_for(Duration::from_millis(200)), 1);
        assert_eq!(pacing.minutes_for(Duration::from_secs(12)), 12);
        assert_eq!(pacing.minutes_for(Duration::from_secs(600)), 30);
    }

    #[test]
    fn test_fixed_pacing_replaces_policy() {
        let output = RawOutput::new(
            vec![AgentResponse::succeeded(
                AgentRole::Narrator,
                "Night falls.",
                Duration::from_secs(90),
            )],
            Duration::from_secs(90),
        );

        let integrator = StateIntegrator::new().with_pacing(Box::new(FixedPacing(5)));
        let delta = integrator.integrate(&output, &empty_context());
        assert_eq!(delta.changes[0].new_value, "5");
    }

    #[test]
    fn test_quoted_utterance_detection() {
        assert!(contains_quoted_utterance("\"Hello,\" she said."));
        assert!(contains_quoted_utterance("He whispered \u{201C}run\u{201D} and fled."));
        assert!(!contains_quoted_utterance("No dialogue here."));
        assert!(!contains_quoted_utterance("An empty \"\" pair."));
    }
}
