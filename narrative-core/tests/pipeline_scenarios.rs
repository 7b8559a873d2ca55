//! End-to-end pipeline scenarios.
//!
//! Scripted runs through the full assemble → compile → execute → validate →
//! integrate flow, plus the validator's severity contract and the audit
//! trail's capacity bound.

use narrative_core::executor::{AgentResponse, RawOutput};
use narrative_core::integrate::EventKind;
use narrative_core::prompt::{AgentPrompt, ExecutionOrder, PromptPriority, PromptSet};
use narrative_core::testing::{
    assert_critical_mentions, assert_invalid, assert_valid, PipelineHarness, ScriptedBackend,
    ScriptedReply,
};
use narrative_core::validate::IssueSeverity;
use narrative_core::{
    AgentRole, AuditEntry, AuditTrail, ContextAssembler, Intent, MemoryState, OutputValidator,
    Participant, ParticipantStatus, PipelineError, PipelineId, ValidatorConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// SCENARIOS
// =============================================================================

/// Scenario A: a single Required narrator prompt whose agent succeeds with a
/// healthy chunk of text.
#[tokio::test]
async fn scenario_single_narrator_success() {
    let text = "Aria spreads the map across the table while Bren bars the door behind them.";
    assert!(text.len() > 40 && text.len() < 120); // comfortably inside the configured bounds

    let harness = PipelineHarness::new();
    harness.script(AgentRole::Narrator, ScriptedReply::text(text));

    let delta = harness.submit(&Intent::continue_story(), 1).await.unwrap();

    assert!(delta.text.contains(text));
    let narrative_events: Vec<_> = delta
        .events
        .iter()
        .filter(|e| e.kind == EventKind::NarrativeGenerated)
        .collect();
    assert_eq!(narrative_events.len(), 1);
    // No rewrite was needed.
    assert_eq!(harness.audit().with_action("rewrite_started").len(), 0);
}

/// Scenario B: Sequential {Required summary, Required narrator}; the summary
/// agent fails, so the narrator is never attempted.
#[tokio::test]
async fn scenario_sequential_required_failure() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.script(AgentRole::Summarizer, ScriptedReply::failure("connection reset"));
    backend.script(AgentRole::Narrator, ScriptedReply::text("must never appear"));

    let executor = narrative_core::executor::AgentExecutor::new(
        Arc::clone(&backend) as Arc<dyn narrative_core::GenerationBackend>,
        Arc::new(AuditTrail::default()),
    );
    let set = PromptSet::new(
        vec![
            AgentPrompt::new(AgentRole::Summarizer, "sys", "user", PromptPriority::Required),
            AgentPrompt::new(AgentRole::Narrator, "sys", "user", PromptPriority::Required),
        ],
        ExecutionOrder::Sequential,
    )
    .unwrap();
    let context = ContextAssembler::new()
        .assemble(&MemoryState::new(), &Intent::continue_story())
        .unwrap();

    let output = executor
        .execute(PipelineId::new(), &set, &context, &CancellationToken::new())
        .await;

    assert_eq!(output.len(), 1);
    let only = &output.responses()[0];
    assert_eq!(only.role, AgentRole::Summarizer);
    assert!(!only.success);
    assert_eq!(backend.calls(), vec![AgentRole::Summarizer]);
}

/// Scenario C: 5 characters of content against a minimum of 10 is a Major
/// "too short" finding, and the verdict stays valid.
#[test]
fn scenario_short_text_major_but_valid() {
    let output = single_response_output("Hello");
    let validator =
        OutputValidator::with_config(ValidatorConfig::default().with_min_length(10));
    let context = empty_context();

    let verdict = validator.validate(&output, &context);

    assert_valid(&verdict);
    let majors: Vec<_> = verdict.issues_at(IssueSeverity::Major).collect();
    assert_eq!(majors.len(), 1);
    assert!(majors[0].message.contains("below the minimum"));
}

/// Scenario D: the same check with empty content is Critical and invalid.
#[test]
fn scenario_empty_text_critical() {
    let output = single_response_output("");
    let validator =
        OutputValidator::with_config(ValidatorConfig::default().with_min_length(10));
    let context = empty_context();

    let verdict = validator.validate(&output, &context);

    assert_invalid(&verdict);
    assert_eq!(verdict.issues_at(IssueSeverity::Critical).count(), 1);
}

/// Scenario E: an inactive participant performing an action is Critical; a
/// mere mention is permitted.
#[test]
fn scenario_inactive_entity_acting() {
    let mut state = MemoryState::new();
    let alice = state.add_participant(Participant::new("Alice"));
    let bob = state.add_participant(
        Participant::new("Bob").with_status(ParticipantStatus::Deceased),
    );
    let intent = Intent::continue_story().with_targets(vec![alice, bob]);
    let context = ContextAssembler::new().assemble(&state, &intent).unwrap();
    let validator = OutputValidator::new();

    let acting = single_response_output("Bob walked into the room.");
    let verdict = validator.validate(&acting, &context);
    assert_invalid(&verdict);
    assert_critical_mentions(&verdict, "Bob");

    let mention = single_response_output("Alice remembered Bob fondly.");
    let verdict = validator.validate(&mention, &context);
    assert_valid(&verdict);
}

// =============================================================================
// REWRITE LOOP
// =============================================================================

#[tokio::test]
async fn rewrite_recovers_from_critical_finding() {
    // Draft has the deceased participant acting; the revision fixes it.
    let mut state = MemoryState::new();
    state.add_participant(Participant::new("Aria"));
    state.add_participant(
        Participant::new("Old Tam").with_status(ParticipantStatus::Deceased),
    );
    let harness = PipelineHarness::with_state(state);

    harness.script(
        AgentRole::Narrator,
        ScriptedReply::text("Old Tam walked across the yard to greet Aria warmly."),
    );
    harness.script(
        AgentRole::Narrator,
        ScriptedReply::text("Aria pauses at the yard gate, remembering Old Tam's advice."),
    );

    // The deceased participant only enters the context when targeted.
    let aria = harness.participant("Aria");
    let tam = harness.participant("Old Tam");
    let intent = Intent::continue_story().with_targets(vec![aria, tam]);

    let delta = harness.submit(&intent, 2).await.unwrap();

    assert!(delta.text.contains("remembering Old Tam"));
    assert_eq!(harness.backend.call_count(), 2);
    // The revision request carried the findings forward.
    let requests = harness.backend.requests();
    assert!(requests[1].user.contains("Inactive entity acting"));
}

#[tokio::test]
async fn exhausted_rewrites_surface_last_verdict() {
    let harness = PipelineHarness::new();
    harness.backend.set_fallback(ScriptedReply::text(""));

    let result = harness.submit(&Intent::continue_story(), 3).await;

    match result {
        Err(PipelineError::ValidationFailed {
            attempts,
            verdict,
            report,
        }) => {
            assert_eq!(attempts, 3);
            assert_invalid(&verdict);
            assert!(report.render().contains("entries"));
        }
        other => panic!("expected ValidationFailed, got {other:?}"),
    }
}

// =============================================================================
// DIALOGUE AND INTEGRATION
// =============================================================================

#[tokio::test]
async fn dialogue_beat_runs_one_agent_per_speaker() {
    let harness = PipelineHarness::new();
    let aria = harness.participant("Aria");
    let bren = harness.participant("Bren");
    harness.script(
        AgentRole::Character(aria),
        ScriptedReply::text("\"We leave before first light,\" Aria says."),
    );
    harness.script(
        AgentRole::Character(bren),
        ScriptedReply::text("\"Then I'd best sleep fast,\" Bren answers."),
    );

    let delta = harness
        .submit(&Intent::dialogue(vec![aria, bren]), 1)
        .await
        .unwrap();

    assert!(delta.text.contains("before first light"));
    assert!(delta.text.contains("sleep fast"));
    assert!(delta
        .events
        .iter()
        .any(|e| e.kind == EventKind::DialogueGenerated));
    assert_eq!(delta.metadata.source_roles.len(), 2);
}

#[tokio::test]
async fn delta_proposals_apply_through_the_provider() {
    use narrative_core::StateProvider;

    let harness = PipelineHarness::new();
    harness.script(
        AgentRole::Narrator,
        ScriptedReply::text("The night passes without further trouble at the Waystation."),
    );

    let delta = harness.submit(&Intent::continue_story(), 1).await.unwrap();
    assert_eq!(delta.changes.len(), 1);

    let mut state = harness.state.clone();
    let before = state.clock_minutes();
    state.apply(&delta.changes);
    assert!(state.clock_minutes() > before);
}

// =============================================================================
// AUDIT PROPERTIES
// =============================================================================

#[tokio::test]
async fn audit_trail_never_exceeds_capacity_across_runs() {
    let trail = Arc::new(AuditTrail::new(10));
    let run = PipelineId::new();
    for i in 0..35 {
        trail.record(AuditEntry::decision(run, format!("step_{i}"), "overflow test"));
    }

    assert_eq!(trail.len(), 10);
    let snapshot = trail.snapshot();
    // Only the most recent `capacity` entries remain, oldest evicted first.
    assert_eq!(snapshot.first().unwrap().action, "step_25");
    assert_eq!(snapshot.last().unwrap().action, "step_34");
}

#[tokio::test]
async fn audit_records_full_run_trace() {
    let harness = PipelineHarness::new();
    harness.script(
        AgentRole::Narrator,
        ScriptedReply::text("Lantern light spills across the Waystation's floorboards."),
    );

    harness.submit(&Intent::continue_story(), 1).await.unwrap();

    let audit = harness.audit();
    assert_eq!(audit.with_action("run_started").len(), 1);
    assert_eq!(audit.with_action("prompts_compiled").len(), 1);
    assert_eq!(audit.with_action("invoke").len(), 1);
    assert_eq!(audit.with_action("run_completed").len(), 1);

    let report = audit.global_report();
    assert_eq!(report.total, audit.len());
}

// =============================================================================
// Helpers
// =============================================================================

fn single_response_output(text: &str) -> RawOutput {
    RawOutput::new(
        vec![AgentResponse::succeeded(
            AgentRole::Narrator,
            text,
            Duration::from_millis(5),
        )],
        Duration::from_millis(5),
    )
}

fn empty_context() -> narrative_core::NarrativeContext {
    ContextAssembler::new()
        .assemble(&MemoryState::new(), &Intent::continue_story())
        .unwrap()
}
