//! Context assembly.
//!
//! The [`ContextAssembler`] builds a bounded, immutable [`NarrativeContext`]
//! snapshot from the state provider for one pipeline run: the cast of
//! participants the beat concerns, the location they share (if any), a capped
//! window of recent events, and the rolling summary. The snapshot is built
//! once and discarded at run end; nothing in the pipeline mutates it.

use crate::error::{PipelineError, PipelineResult};
use crate::id::{EventId, LocationId, ParticipantId};
use crate::intent::Intent;
use crate::state::{Participant, ParticipantStatus, StateProvider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default cap on the recent-event window.
pub const DEFAULT_EVENT_WINDOW: usize = 10;

/// Snapshot of one participant as the pipeline sees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    /// Participant id in the provider's roster
    pub id: ParticipantId,
    /// Display name
    pub name: String,
    /// Status at snapshot time
    pub status: ParticipantStatus,
    /// Established facts about this participant
    pub known_facts: Vec<String>,
}

impl From<Participant> for ParticipantSummary {
    fn from(p: Participant) -> Self {
        Self {
            id: p.id,
            name: p.name,
            status: p.status,
            known_facts: p.known_facts,
        }
    }
}

/// Snapshot of the location a beat plays out in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSummary {
    /// Location id in the provider's graph
    pub id: LocationId,
    /// Display name
    pub name: String,
    /// Scene-setting description
    pub description: String,
    /// Participants present at snapshot time
    pub present: Vec<ParticipantId>,
}

/// One recent event, digested for prompting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDigest {
    /// Source event id
    pub id: EventId,
    /// What happened
    pub description: String,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
}

/// Immutable per-run snapshot of the narrative state a beat needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeContext {
    participants: Vec<ParticipantSummary>,
    location: Option<LocationSummary>,
    recent_events: Vec<EventDigest>,
    rolling_summary: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl NarrativeContext {
    /// The cast for this run.
    pub fn participants(&self) -> &[ParticipantSummary] {
        &self.participants
    }

    /// Look up a cast member by id.
    pub fn participant(&self, id: ParticipantId) -> Option<&ParticipantSummary> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Cast members who can still act.
    pub fn active_participants(&self) -> impl Iterator<Item = &ParticipantSummary> {
        self.participants.iter().filter(|p| p.status.is_active())
    }

    /// Cast members flagged as no longer able to act.
    pub fn inactive_participants(&self) -> impl Iterator<Item = &ParticipantSummary> {
        self.participants.iter().filter(|p| !p.status.is_active())
    }

    /// The location this beat plays out in, if one could be determined.
    pub fn location(&self) -> Option<&LocationSummary> {
        self.location.as_ref()
    }

    /// Recent events, oldest first.
    pub fn recent_events(&self) -> &[EventDigest] {
        &self.recent_events
    }

    /// Rolling summary of older story, if kept.
    pub fn rolling_summary(&self) -> Option<&str> {
        self.rolling_summary.as_deref()
    }

    /// Free-form metadata recorded at assembly time.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

/// Builds [`NarrativeContext`] snapshots from a state provider.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    event_window: usize,
}

impl ContextAssembler {
    /// Create an assembler with the default event window.
    pub fn new() -> Self {
        Self {
            event_window: DEFAULT_EVENT_WINDOW,
        }
    }

    /// Cap the recent-event window at `window` entries.
    pub fn with_event_window(mut self, window: usize) -> Self {
        self.event_window = window;
        self
    }

    /// Assemble the snapshot for one run.
    ///
    /// Cast rules: explicit intent targets are taken verbatim (an unknown id
    /// is an input error); otherwise every active participant is included.
    /// Location rules: an explicitly targeted location wins and its present
    /// participants join the cast; otherwise the location is inferred as the
    /// one every cast member shares, or omitted when they are not co-located.
    pub fn assemble(
        &self,
        state: &dyn StateProvider,
        intent: &Intent,
    ) -> PipelineResult<NarrativeContext> {
        let mut cast: Vec<Participant> = if intent.targets.is_empty() {
            state
                .participants()
                .into_iter()
                .filter(|p| p.status.is_active())
                .collect()
        } else {
            let mut cast = Vec::with_capacity(intent.targets.len());
            for &id in &intent.targets {
                cast.push(
                    state
                        .participant(id)
                        .ok_or(PipelineError::UnknownParticipant(id))?,
                );
            }
            cast
        };

        let location = match intent.location {
            Some(id) => {
                let location = state
                    .location(id)
                    .ok_or(PipelineError::UnknownLocation(id))?;
                let present = state.participants_at(id);
                // Bring everyone standing in the targeted location into the
                // cast, skipping anyone no longer able to act.
                for &pid in &present {
                    if cast.iter().any(|p| p.id == pid) {
                        continue;
                    }
                    if let Some(p) = state.participant(pid) {
                        if p.status.is_active() {
                            cast.push(p);
                        }
                    }
                }
                Some(LocationSummary {
                    id: location.id,
                    name: location.name,
                    description: location.description,
                    present,
                })
            }
            None => self.infer_location(state, &cast),
        };

        let recent_events = state
            .recent_events(self.event_window)
            .into_iter()
            .map(|e| EventDigest {
                id: e.id,
                description: e.description,
                timestamp: e.timestamp,
            })
            .collect();

        let mut metadata = BTreeMap::new();
        metadata.insert("intent".to_string(), intent.kind.name().to_string());
        if let Some(detail) = &intent.detail {
            metadata.insert("detail".to_string(), detail.clone());
        }

        Ok(NarrativeContext {
            participants: cast.into_iter().map(ParticipantSummary::from).collect(),
            location,
            recent_events,
            rolling_summary: state.rolling_summary(),
            metadata,
        })
    }

    /// The location every cast member shares, or None.
    fn infer_location(
        &self,
        state: &dyn StateProvider,
        cast: &[Participant],
    ) -> Option<LocationSummary> {
        let first = cast.first()?.location?;
        if !cast.iter().all(|p| p.location == Some(first)) {
            return None;
        }
        let location = state.location(first)?;
        Some(LocationSummary {
            id: location.id,
            name: location.name,
            description: location.description,
            present: state.participants_at(first),
        })
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new()
    }
}
