//! Output validation.
//!
//! The [`OutputValidator`] inspects a collected [`RawOutput`] against the
//! run's context and produces a severity-tagged [`ValidationVerdict`]. Only
//! Critical findings invalidate the output; Major findings are recorded for
//! the caller to weigh, Warnings are informational.

use crate::context::NarrativeContext;
use crate::executor::RawOutput;
use crate::prompt::AgentRole;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How bad a validation finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// Recorded, but does not by itself invalidate the output
    Major,
    /// Blocks acceptance
    Critical,
}

/// One validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Severity
    pub severity: IssueSeverity,
    /// What is wrong
    pub message: String,
    /// The role whose output is at fault, when attributable
    pub role: Option<AgentRole>,
}

impl ValidationIssue {
    /// A Critical finding.
    pub fn critical(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Critical,
            message: message.into(),
            role: None,
        }
    }

    /// A Major finding.
    pub fn major(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Major,
            message: message.into(),
            role: None,
        }
    }

    /// Attribute the finding to a role.
    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// The validator's verdict on one raw output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Critical and Major findings
    pub issues: Vec<ValidationIssue>,
    /// Informational findings
    pub warnings: Vec<String>,
}

impl ValidationVerdict {
    /// Valid exactly when no Critical finding is present.
    pub fn is_valid(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|issue| issue.severity == IssueSeverity::Critical)
    }

    /// Whether any Major finding is present.
    pub fn has_major(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.severity == IssueSeverity::Major)
    }

    /// Findings at a given severity.
    pub fn issues_at(&self, severity: IssueSeverity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    /// Render every finding as revision feedback for a rewrite pass.
    pub fn feedback(&self) -> String {
        let mut out = String::new();
        for issue in &self.issues {
            out.push_str(&format!("- [{:?}] {}\n", issue.severity, issue.message));
        }
        for warning in &self.warnings {
            out.push_str(&format!("- [Warning] {warning}\n"));
        }
        out
    }
}

/// Tunable validation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Minimum acceptable text length per response (Major below)
    pub min_length: usize,
    /// Maximum text length per response (Warning above, never blocks)
    pub max_length: usize,
    /// Substrings that should not appear (Warning)
    pub forbidden: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_length: 20,
            max_length: 8_000,
            forbidden: Vec::new(),
        }
    }
}

impl ValidatorConfig {
    /// Set the minimum length.
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Set the maximum length.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Add a forbidden substring.
    pub fn with_forbidden(mut self, needle: impl Into<String>) -> Self {
        self.forbidden.push(needle.into());
        self
    }
}

/// Inspects raw outputs for structural and referential problems.
#[derive(Debug, Clone, Default)]
pub struct OutputValidator {
    config: ValidatorConfig,
}

impl OutputValidator {
    /// Create a validator with default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with the given thresholds.
    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate one raw output against its context.
    pub fn validate(&self, output: &RawOutput, context: &NarrativeContext) -> ValidationVerdict {
        let mut verdict = ValidationVerdict::default();

        let successful: Vec<_> = output.successful().collect();
        if successful.is_empty() {
            verdict
                .issues
                .push(ValidationIssue::critical("No agent response succeeded"));
        }

        for response in output.responses() {
            if !response.success {
                let reason = response.error.as_deref().unwrap_or("unknown failure");
                verdict.issues.push(
                    ValidationIssue::major(format!(
                        "Agent for role {} failed: {reason}",
                        response.role
                    ))
                    .with_role(response.role),
                );
            }
        }

        for response in &successful {
            let text = response.text.trim();
            if text.is_empty() {
                verdict.issues.push(
                    ValidationIssue::critical(format!(
                        "Role {} succeeded but produced empty text",
                        response.role
                    ))
                    .with_role(response.role),
                );
                continue;
            }
            if text.len() < self.config.min_length {
                verdict.issues.push(
                    ValidationIssue::major(format!(
                        "Role {} produced {} characters, below the minimum of {}",
                        response.role,
                        text.len(),
                        self.config.min_length
                    ))
                    .with_role(response.role),
                );
            }
            if text.len() > self.config.max_length {
                verdict.warnings.push(format!(
                    "Role {} produced {} characters, above the maximum of {}",
                    response.role,
                    text.len(),
                    self.config.max_length
                ));
            }

            let lowered = text.to_lowercase();
            for needle in &self.config.forbidden {
                if lowered.contains(&needle.to_lowercase()) {
                    verdict.warnings.push(format!(
                        "Role {} output contains forbidden text {needle:?}",
                        response.role
                    ));
                }
            }

            for participant in context.inactive_participants() {
                if entity_acts(text, &participant.name) {
                    verdict.issues.push(
                        ValidationIssue::critical(format!(
                            "Inactive entity acting: {} is {} but performs an action in the text",
                            participant.name,
                            participant.status.name()
                        ))
                        .with_role(response.role),
                    );
                }
            }
        }

        if let Some(location) = context.location() {
            let anywhere = successful
                .iter()
                .any(|r| r.text.to_lowercase().contains(&location.name.to_lowercase()));
            if !successful.is_empty() && !anywhere {
                verdict.warnings.push(format!(
                    "Current location {:?} is never mentioned in the generated text",
                    location.name
                ));
            }
        }

        verdict
    }
}

/// Verbs that count as "acting" when they directly follow an entity's name.
/// Inflected forms are matched by suffix stripping, so only stems and
/// irregular pasts are listed.
static ACTION_VERBS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "walk", "ran", "run", "say", "said", "speak", "spoke", "shout", "whisper", "move",
        "open", "close", "take", "took", "grab", "attack", "strike", "struck", "stand", "stood",
        "sit", "sat", "go", "went", "goes", "enter", "leap", "leapt", "charge", "swing", "swung",
        "throw", "threw", "push", "pull", "draw", "drew", "step", "rise", "rose", "reach",
        "point", "nod", "turn", "look", "smile", "laugh", "scream", "lunge", "stride", "strode",
        "climb", "fight", "fought", "seize", "snatch", "march", "storm",
    ]
    .into_iter()
    .collect()
});

/// True when `name` appears in `text` immediately followed by an action verb
/// within the same sentence. A mere mention without an adjacent action does
/// not count. Multi-word names are matched as a token sequence.
fn entity_acts(text: &str, name: &str) -> bool {
    let name_tokens: Vec<&str> = name.split_whitespace().collect();
    if name_tokens.is_empty() {
        return false;
    }
    for sentence in text.split(['.', '!', '?']) {
        let words: Vec<&str> = sentence
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect();
        if words.len() <= name_tokens.len() {
            continue;
        }
        for start in 0..=words.len() - name_tokens.len() - 1 {
            let matches_name = name_tokens
                .iter()
                .zip(&words[start..])
                .all(|(a, b)| a.eq_ignore_ascii_case(b));
            if matches_name && is_action_verb(words[start + name_tokens.len()]) {
                return true;
            }
        }
    }
    false
}

fn is_action_verb(word: &str) -> bool {
    let lowered = word.to_ascii_lowercase();
    if ACTION_VERBS.contains(lowered.as_str()) {
        return true;
    }
    // Strip common inflections back to a listed stem.
    for suffix in ["ed", "es", "s", "ing"] {
        if let Some(stem) = lowered.strip_suffix(suffix) {
            if ACTION_VERBS.contains(stem) {
                return true;
            }
            // walked -> walk, charging -> charge (dropped final e)
            let mut restored = stem.to_string();
            restored.push('e');
            if ACTION_VERBS.contains(restored.as_str()) {
                return true;
            }
        }
    }
    false
}
