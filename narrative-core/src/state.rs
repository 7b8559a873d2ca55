//! Narrative state collaborator interface.
//!
//! The pipeline never owns persistent state. It reads a roster, a location
//! graph, and an event log through [`StateProvider`], and hands the resulting
//! [`StateChange`](crate::integrate::StateChange) proposals back to the
//! provider to apply against its own store. [`MemoryState`] is the in-memory
//! implementation used by tests, the harness, and embedders without a store
//! of their own.

use crate::id::{EventId, LocationId, ParticipantId};
use crate::integrate::{StateChange, StateChangeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a participant can still act in the story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Present and able to act
    Active,
    /// Out of the story for now (left, captured, lost)
    Departed,
    /// Dead; may be referenced but never acts
    Deceased,
}

impl ParticipantStatus {
    /// True for statuses that may drive the narrative.
    pub fn is_active(&self) -> bool {
        matches!(self, ParticipantStatus::Active)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            ParticipantStatus::Active => "active",
            ParticipantStatus::Departed => "departed",
            ParticipantStatus::Deceased => "deceased",
        }
    }
}

/// A participant in the narrative (character, creature, faction voice).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Unique identifier
    pub id: ParticipantId,
    /// Display name, as it appears in generated text
    pub name: String,
    /// Whether the participant can still act
    pub status: ParticipantStatus,
    /// Facts the story has established about this participant
    pub known_facts: Vec<String>,
    /// Where the participant currently is, if anywhere
    pub location: Option<LocationId>,
}

impl Participant {
    /// Create a new active participant.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(),
            name: name.into(),
            status: ParticipantStatus::Active,
            known_facts: Vec::new(),
            location: None,
        }
    }

    /// Set the status.
    pub fn with_status(mut self, status: ParticipantStatus) -> Self {
        self.status = status;
        self
    }

    /// Add a known fact.
    pub fn with_fact(mut self, fact: impl Into<String>) -> Self {
        self.known_facts.push(fact.into());
        self
    }

    /// Place the participant at a location.
    pub fn with_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }
}

/// A place in the story world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    /// Unique identifier
    pub id: LocationId,
    /// Display name
    pub name: String,
    /// Short scene-setting description
    pub description: String,
}

impl Location {
    /// Create a new location.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: LocationId::new(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// One entry in the provider's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldEvent {
    /// Unique identifier
    pub id: EventId,
    /// What happened
    pub description: String,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
}

impl WorldEvent {
    /// Record a new event at the current time.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Read surface the context assembler needs, plus the apply half of the
/// proposal contract. The pipeline only ever proposes changes; applying them
/// is the provider's business.
pub trait StateProvider: Send + Sync {
    /// Full participant roster, any status.
    fn participants(&self) -> Vec<Participant>;

    /// Look up one participant.
    fn participant(&self, id: ParticipantId) -> Option<Participant>;

    /// Look up one location.
    fn location(&self, id: LocationId) -> Option<Location>;

    /// Ids of participants currently at a location.
    fn participants_at(&self, id: LocationId) -> Vec<ParticipantId> {
        self.participants()
            .into_iter()
            .filter(|p| p.location == Some(id))
            .map(|p| p.id)
            .collect()
    }

    /// Most recent events, oldest first, at most `limit`.
    fn recent_events(&self, limit: usize) -> Vec<WorldEvent>;

    /// Rolling summary of everything older than the event window, if kept.
    fn rolling_summary(&self) -> Option<String>;

    /// Apply accepted state-change proposals from a narrative delta.
    fn apply(&mut self, changes: &[StateChange]);
}

/// In-memory state provider with an in-fiction clock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryState {
    participants: Vec<Participant>,
    locations: Vec<Location>,
    events: Vec<WorldEvent>,
    summary: Option<String>,
    /// Minutes of in-fiction time elapsed since the story began.
    clock_minutes: u64,
}

impl MemoryState {
    /// Create an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant, returning its id.
    pub fn add_participant(&mut self, participant: Participant) -> ParticipantId {
        let id = participant.id;
        self.participants.push(participant);
        id
    }

    /// Add a location, returning its id.
    pub fn add_location(&mut self, location: Location) -> LocationId {
        let id = location.id;
        self.locations.push(location);
        id
    }

    /// Append an event to the log.
    pub fn record_event(&mut self, description: impl Into<String>) -> EventId {
        let event = WorldEvent::new(description);
        let id = event.id;
        self.events.push(event);
        id
    }

    /// Set the rolling summary.
    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = Some(summary.into());
    }

    /// Find a participant by display name.
    pub fn find_participant(&self, name: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.name == name)
    }

    /// Minutes of in-fiction time elapsed.
    pub fn clock_minutes(&self) -> u64 {
        self.clock_minutes
    }

    /// Number of events in the log.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl StateProvider for MemoryState {
    fn participants(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    fn participant(&self, id: ParticipantId) -> Option<Participant> {
        self.participants.iter().find(|p| p.id == id).cloned()
    }

    fn location(&self, id: LocationId) -> Option<Location> {
        self.locations.iter().find(|l| l.id == id).cloned()
    }

    fn recent_events(&self, limit: usize) -> Vec<WorldEvent> {
        let start = self.events.len().saturating_sub(limit);
        self.events[start..].to_vec()
    }

    fn rolling_summary(&self) -> Option<String> {
        self.summary.clone()
    }

    fn apply(&mut self, changes: &[StateChange]) {
        for change in changes {
            match change.kind {
                StateChangeKind::TimeAdvanced => {
                    if let Ok(minutes) = change.new_value.parse::<u64>() {
                        self.clock_minutes += minutes;
                    }
                }
                StateChangeKind::StatusChanged => {
                    if let Some(entity) = change.entity {
                        if let Some(p) = self.participants.iter_mut().find(|p| p.id == entity) {
                            p.status = match change.new_value.as_str() {
                                "departed" => ParticipantStatus::Departed,
                                "deceased" => ParticipantStatus::Deceased,
                                _ => ParticipantStatus::Active,
                            };
                        }
                    }
                }
                StateChangeKind::LocationChanged => {
                    if let (Some(entity), Ok(loc)) =
                        (change.entity, change.new_value.parse::<LocationId>())
                    {
                        if let Some(p) = self.participants.iter_mut().find(|p| p.id == entity) {
                            p.location = Some(loc);
                        }
                    }
                }
            }
            self.events.push(WorldEvent::new(change.description.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrate::StateChange;

    #[test]
    fn test_status_active() {
        assert!(ParticipantStatus::Active.is_active());
        assert!(!ParticipantStatus::Departed.is_active());
        assert!(!ParticipantStatus::Deceased.is_active());
    }

    #[test]
    fn test_participant_builder() {
        let p = Participant::new("Mira")
            .with_status(ParticipantStatus::Departed)
            .with_fact("Knows the mountain pass");

        assert_eq!(p.name, "Mira");
        assert_eq!(p.status, ParticipantStatus::Departed);
        assert_eq!(p.known_facts.len(), 1);
    }

    #[test]
    fn test_memory_state_roster() {
        let mut state = MemoryState::new();
        let loc = state.add_location(Location::new("Tavern", "A dusty common room"));
        let id = state.add_participant(Participant::new("Aria").with_location(loc));
        state.add_participant(Participant::new("Bren"));

        assert_eq!(state.participants().len(), 2);
        assert_eq!(state.participant(id).unwrap().name, "Aria");
        assert_eq!(state.participants_at(loc), vec![id]);
    }

    #[test]
    fn test_recent_events_window() {
        let mut state = MemoryState::new();
        for i in 0..10 {
            state.record_event(format!("Event {i}"));
        }

        let recent = state.recent_events(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].description, "Event 7");
        assert_eq!(recent[2].description, "Event 9");
    }

    #[test]
    fn test_apply_time_advanced() {
        let mut state = MemoryState::new();
        state.apply(&[StateChange::time_advanced(12)]);

        assert_eq!(state.clock_minutes(), 12);
        // Applied proposals land in the event log too.
        assert_eq!(state.event_count(), 1);
    }
}
