//! Narrative intents.
//!
//! An [`Intent`] names the kind of beat the caller wants next and optionally
//! pins it to specific participants or a location. Kinds are a closed enum,
//! dispatched exhaustively by the prompt compiler; the [`IntentKind::Freeform`]
//! variant carries arbitrary caller text and compiles to the generic
//! continuation prompt.

use crate::id::{LocationId, ParticipantId};
use serde::{Deserialize, Serialize};

/// The kind of narrative beat being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Continue the story from where it stands
    ContinueStory,
    /// Produce in-character dialogue for the targeted participants
    GenerateDialogue,
    /// Describe the current or targeted location
    DescribeLocation,
    /// Summarize recent events
    Summarize,
    /// Introduce a complication or raise the stakes
    CreateTension,
    /// Bring an open conflict to a resolution
    ResolveConflict,
    /// Caller-supplied beat text, handled as a generic continuation
    Freeform,
}

impl IntentKind {
    /// Short name for logs and audit entries.
    pub fn name(&self) -> &'static str {
        match self {
            IntentKind::ContinueStory => "continue_story",
            IntentKind::GenerateDialogue => "generate_dialogue",
            IntentKind::DescribeLocation => "describe_location",
            IntentKind::Summarize => "summarize",
            IntentKind::CreateTension => "create_tension",
            IntentKind::ResolveConflict => "resolve_conflict",
            IntentKind::Freeform => "freeform",
        }
    }
}

/// A request for one narrative beat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// What kind of beat
    pub kind: IntentKind,
    /// Restrict the cast to these participants (empty = default cast rules)
    pub targets: Vec<ParticipantId>,
    /// Pin the beat to this location
    pub location: Option<LocationId>,
    /// Free-text direction from the caller
    pub detail: Option<String>,
}

impl Intent {
    /// Create an intent of the given kind with no targets.
    pub fn new(kind: IntentKind) -> Self {
        Self {
            kind,
            targets: Vec::new(),
            location: None,
            detail: None,
        }
    }

    /// Continue the story.
    pub fn continue_story() -> Self {
        Self::new(IntentKind::ContinueStory)
    }

    /// Generate dialogue for the given participants.
    pub fn dialogue(targets: Vec<ParticipantId>) -> Self {
        Self::new(IntentKind::GenerateDialogue).with_targets(targets)
    }

    /// Describe a location.
    pub fn describe_location(location: LocationId) -> Self {
        Self::new(IntentKind::DescribeLocation).with_location(location)
    }

    /// Summarize recent events.
    pub fn summarize() -> Self {
        Self::new(IntentKind::Summarize)
    }

    /// A freeform beat with caller-supplied direction.
    pub fn freeform(detail: impl Into<String>) -> Self {
        Self::new(IntentKind::Freeform).with_detail(detail)
    }

    /// Restrict the cast to these participants.
    pub fn with_targets(mut self, targets: Vec<ParticipantId>) -> Self {
        self.targets = targets;
        self
    }

    /// Pin the beat to a location.
    pub fn with_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    /// Attach free-text direction.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_constructors() {
        let intent = Intent::continue_story();
        assert_eq!(intent.kind, IntentKind::ContinueStory);
        assert!(intent.targets.is_empty());
        assert!(intent.location.is_none());

        let id = ParticipantId::new();
        let intent = Intent::dialogue(vec![id]);
        assert_eq!(intent.kind, IntentKind::GenerateDialogue);
        assert_eq!(intent.targets, vec![id]);
    }

    #[test]
    fn test_freeform_detail() {
        let intent = Intent::freeform("A storm rolls in");
        assert_eq!(intent.kind, IntentKind::Freeform);
        assert_eq!(intent.detail.as_deref(), Some("A storm rolls in"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(IntentKind::ContinueStory.name(), "continue_story");
        assert_eq!(IntentKind::GenerateDialogue.name(), "generate_dialogue");
    }
}
