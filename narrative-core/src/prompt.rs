//! Prompt compilation.
//!
//! The [`PromptCompiler`] turns a (context, intent) pair into a [`PromptSet`]:
//! one or more [`AgentPrompt`]s, each addressed to a role at a priority tier,
//! under a declared [`ExecutionOrder`]. Roles, priorities, and orders are
//! closed enums; every consumer matches them exhaustively.

use crate::context::{NarrativeContext, ParticipantSummary};
use crate::error::{PipelineError, PipelineResult};
use crate::id::ParticipantId;
use crate::intent::{Intent, IntentKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A named kind of generation responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Primary narration
    Narrator,
    /// In-character dialogue for one participant
    Character(ParticipantId),
    /// Summarization
    Summarizer,
}

impl AgentRole {
    /// Compact label for logs and audit entries.
    pub fn label(&self) -> String {
        match self {
            AgentRole::Narrator => "narrator".to_string(),
            AgentRole::Character(id) => format!("character:{}", id.short()),
            AgentRole::Summarizer => "summarizer".to_string(),
        }
    }

    /// True for dialogue roles.
    pub fn is_character(&self) -> bool {
        matches!(self, AgentRole::Character(_))
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// How much a prompt matters to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptPriority {
    /// The run cannot proceed meaningfully without it
    Required,
    /// Nice to have; failure never halts anything
    Optional,
    /// Only worth attempting if something else succeeded
    Fallback,
}

/// The declared concurrency discipline for a prompt set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrder {
    /// List order; a failed Required prompt halts the rest
    Sequential,
    /// All prompts concurrently; every one runs to completion
    Parallel,
    /// Required and Optional first; Fallback only if any of those succeeded
    Conditional,
}

impl ExecutionOrder {
    /// Short name for logs and audit entries.
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionOrder::Sequential => "sequential",
            ExecutionOrder::Parallel => "parallel",
            ExecutionOrder::Conditional => "conditional",
        }
    }
}

/// One request addressed to a generation agent. Immutable; `with_variable`
/// returns a new value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPrompt {
    /// Who should answer
    pub role: AgentRole,
    /// Standing instructions for the role
    pub system: String,
    /// The concrete ask for this beat
    pub user: String,
    /// Interpolated fields, kept for audit and debugging
    pub variables: BTreeMap<String, String>,
    /// Priority tier
    pub priority: PromptPriority,
}

impl AgentPrompt {
    /// Create a prompt.
    pub fn new(
        role: AgentRole,
        system: impl Into<String>,
        user: impl Into<String>,
        priority: PromptPriority,
    ) -> Self {
        Self {
            role,
            system: system.into(),
            user: user.into(),
            variables: BTreeMap::new(),
            priority,
        }
    }

    /// Return a copy with the variable recorded.
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

/// An ordered list of prompts plus the declared execution order.
///
/// Lookup by role is unambiguous: construction rejects duplicate roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSet {
    prompts: Vec<AgentPrompt>,
    order: ExecutionOrder,
}

impl PromptSet {
    /// Build a set, rejecting empty input and duplicate roles.
    pub fn new(prompts: Vec<AgentPrompt>, order: ExecutionOrder) -> PipelineResult<Self> {
        if prompts.is_empty() {
            return Err(PipelineError::EmptyPromptSet);
        }
        for (i, prompt) in prompts.iter().enumerate() {
            if prompts[..i].iter().any(|p| p.role == prompt.role) {
                return Err(PipelineError::DuplicateRole {
                    role: prompt.role.label(),
                });
            }
        }
        Ok(Self { prompts, order })
    }

    /// The prompts, in declaration order.
    pub fn prompts(&self) -> &[AgentPrompt] {
        &self.prompts
    }

    /// The declared execution order.
    pub fn order(&self) -> ExecutionOrder {
        self.order
    }

    /// Look up the prompt addressed to a role.
    pub fn prompt_for_role(&self, role: &AgentRole) -> Option<&AgentPrompt> {
        self.prompts.iter().find(|p| &p.role == role)
    }

    /// Number of prompts in the set.
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    /// Whether the set is empty (it never is, post-construction).
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// Compiles (context, intent) into a prompt set.
#[derive(Debug, Clone, Default)]
pub struct PromptCompiler;

impl PromptCompiler {
    /// Create a compiler.
    pub fn new() -> Self {
        Self
    }

    /// Compile the prompt set for one beat.
    pub fn compile(
        &self,
        context: &NarrativeContext,
        intent: &Intent,
    ) -> PipelineResult<PromptSet> {
        match intent.kind {
            IntentKind::ContinueStory
            | IntentKind::CreateTension
            | IntentKind::ResolveConflict
            | IntentKind::Freeform => self.narrator_set(context, intent),
            IntentKind::GenerateDialogue => self.dialogue_set(context, intent),
            IntentKind::DescribeLocation => self.location_set(context, intent),
            IntentKind::Summarize => self.summary_set(context, intent),
        }
    }

    fn narrator_set(&self, context: &NarrativeContext, intent: &Intent) -> PipelineResult<PromptSet> {
        let directive = match intent.kind {
            IntentKind::CreateTension => {
                "Introduce a complication that raises the stakes for the characters present. \
                 End before the complication resolves."
            }
            IntentKind::ResolveConflict => {
                "Bring the current conflict to a believable resolution, paying off what the \
                 recent events set up."
            }
            _ => "Continue the story naturally from where it stands.",
        };

        let mut user = scene_block(context);
        user.push_str("\n## Task\n");
        user.push_str(directive);
        if let Some(detail) = &intent.detail {
            user.push_str(&format!("\n\nDirection from the storyteller: {detail}"));
        }

        let prompt = AgentPrompt::new(
            AgentRole::Narrator,
            NARRATOR_SYSTEM,
            user,
            PromptPriority::Required,
        )
        .with_variable("beat", intent.kind.name());

        PromptSet::new(vec![prompt], ExecutionOrder::Sequential)
    }

    fn dialogue_set(&self, context: &NarrativeContext, intent: &Intent) -> PipelineResult<PromptSet> {
        let speakers: Vec<&ParticipantSummary> = if intent.targets.is_empty() {
            context.active_participants().collect()
        } else {
            intent
                .targets
                .iter()
                .filter_map(|&id| context.participant(id))
                .collect()
        };
        if speakers.is_empty() {
            return Err(PipelineError::EmptyCast);
        }

        let prompts = speakers
            .iter()
            .map(|speaker| {
                let mut user = scene_block(context);
                user.push_str("\n## Task\n");
                user.push_str(&format!(
                    "Speak as {} in this scene: a few lines of dialogue, in quotes, true to \
                     what is known about them.",
                    speaker.name
                ));
                if let Some(detail) = &intent.detail {
                    user.push_str(&format!("\n\nDirection from the storyteller: {detail}"));
                }
                AgentPrompt::new(
                    AgentRole::Character(speaker.id),
                    character_system(speaker),
                    user,
                    PromptPriority::Required,
                )
                .with_variable("beat", intent.kind.name())
                .with_variable("speaker", speaker.name.clone())
            })
            .collect();

        PromptSet::new(prompts, ExecutionOrder::Parallel)
    }

    fn location_set(&self, context: &NarrativeContext, intent: &Intent) -> PipelineResult<PromptSet> {
        let mut user = scene_block(context);
        user.push_str("\n## Task\n");
        match context.location() {
            Some(location) => user.push_str(&format!(
                "Describe {} as the characters experience it right now. Ground the description \
                 in the details above and who is present.",
                location.name
            )),
            None => user.push_str(
                "Describe the characters' immediate surroundings as they experience them right now.",
            ),
        }
        if let Some(detail) = &intent.detail {
            user.push_str(&format!("\n\nDirection from the storyteller: {detail}"));
        }

        let mut prompt = AgentPrompt::new(
            AgentRole::Narrator,
            NARRATOR_SYSTEM,
            user,
            PromptPriority::Required,
        )
        .with_variable("beat", intent.kind.name());
        if let Some(location) = context.location() {
            prompt = prompt.with_variable("location", location.name.clone());
        }

        PromptSet::new(vec![prompt], ExecutionOrder::Sequential)
    }

    fn summary_set(&self, context: &NarrativeContext, intent: &Intent) -> PipelineResult<PromptSet> {
        let mut user = scene_block(context);
        user.push_str(
            "\n## Task\nSummarize the story so far in a few sentences, preserving every \
             detail a future storyteller would need.",
        );

        let prompt = AgentPrompt::new(
            AgentRole::Summarizer,
            SUMMARIZER_SYSTEM,
            user,
            PromptPriority::Required,
        )
        .with_variable("beat", intent.kind.name());

        PromptSet::new(vec![prompt], ExecutionOrder::Sequential)
    }
}

const NARRATOR_SYSTEM: &str = "\
You are the narrator of an ongoing interactive story.

## Guidelines
- Write vivid, concrete prose in the present tense
- Stay consistent with every established fact you are given
- Never act for characters marked as departed or deceased
- Keep the story moving; end at a natural beat";

const SUMMARIZER_SYSTEM: &str = "\
You condense story transcripts into compact summaries.

## Guidelines
- Preserve names, places, and established facts exactly
- Note unresolved threads and open conflicts
- No commentary, no embellishment";

fn character_system(speaker: &ParticipantSummary) -> String {
    let mut system = format!(
        "You are roleplaying as {name}, a character in an ongoing story.\n\n## Your Character\n",
        name = speaker.name
    );
    if speaker.known_facts.is_empty() {
        system.push_str("Nothing is established about you yet; stay consistent with the scene.\n");
    } else {
        for fact in &speaker.known_facts {
            system.push_str(&format!("- {fact}\n"));
        }
    }
    system.push_str(&format!(
        "\n## Guidelines\n\
         - Stay in character as {name}\n\
         - React naturally to the scene you are given\n\
         - Don't reveal information {name} wouldn't know\n\n\
         Respond only as {name}. Do not break character.",
        name = speaker.name
    ));
    system
}

/// Render the shared scene preamble every role receives.
fn scene_block(context: &NarrativeContext) -> String {
    let mut block = String::from("## Scene\n");

    if let Some(summary) = context.rolling_summary() {
        block.push_str("\n### The story so far\n");
        block.push_str(summary);
        block.push('\n');
    }

    if !context.participants().is_empty() {
        block.push_str("\n### Characters present\n");
        for p in context.participants() {
            block.push_str(&format!("- {} ({})", p.name, p.status.name()));
            if !p.known_facts.is_empty() {
                block.push_str(&format!(": {}", p.known_facts.join("; ")));
            }
            block.push('\n');
        }
    }

    if let Some(location) = context.location() {
        block.push_str(&format!(
            "\n### Location\n{}: {}\n",
            location.name, location.description
        ));
    }

    if !context.recent_events().is_empty() {
        block.push_str("\n### Recent events\n");
        for event in context.recent_events() {
            block.push_str(&format!("- {}\n", event.description));
        }
    }

    block
}
