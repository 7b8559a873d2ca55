//! Audit trail.
//!
//! A process-wide, capacity-bounded ledger of every decision, agent action,
//! and validation outcome. The trail is the one mutable object shared across
//! pipeline runs: appends are internally synchronized, recording never
//! panics, and a full ledger evicts its oldest entry. The instance is owned
//! by the caller and injected wherever it is written — never a global.

use crate::id::PipelineId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

/// Default ledger capacity.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// How serious an audit entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    /// Diagnostic detail
    Debug,
    /// Normal operation
    Info,
    /// Something worth a look
    Warning,
    /// Something went wrong
    Error,
    /// Something went badly wrong
    Critical,
}

impl AuditSeverity {
    /// Short name for rendering.
    pub fn name(&self) -> &'static str {
        match self {
            AuditSeverity::Debug => "debug",
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Error => "error",
            AuditSeverity::Critical => "critical",
        }
    }
}

/// Which part of the system an entry concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Agent invocations and their outcomes
    Agent,
    /// Validation verdicts
    Validation,
    /// Pipeline decisions and stage transitions
    Pipeline,
    /// Process-level happenings
    System,
    /// State-change proposals
    StateChange,
}

impl AuditCategory {
    /// Short name for rendering.
    pub fn name(&self) -> &'static str {
        match self {
            AuditCategory::Agent => "agent",
            AuditCategory::Validation => "validation",
            AuditCategory::Pipeline => "pipeline",
            AuditCategory::System => "system",
            AuditCategory::StateChange => "state_change",
        }
    }
}

/// One immutable entry in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// The run this entry belongs to
    pub pipeline: PipelineId,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// Machine-readable action name
    pub action: String,
    /// Who did it (a role label, "pipeline", "validator", ...)
    pub actor: String,
    /// Human-readable description
    pub description: String,
    /// Severity
    pub severity: AuditSeverity,
    /// Category
    pub category: AuditCategory,
    /// Optional structured detail
    pub detail: Option<serde_json::Value>,
}

impl AuditEntry {
    /// Create an entry at the current time.
    pub fn new(
        pipeline: PipelineId,
        action: impl Into<String>,
        actor: impl Into<String>,
        description: impl Into<String>,
        severity: AuditSeverity,
        category: AuditCategory,
    ) -> Self {
        Self {
            pipeline,
            timestamp: Utc::now(),
            action: action.into(),
            actor: actor.into(),
            description: description.into(),
            severity,
            category,
            detail: None,
        }
    }

    /// Attach structured detail.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// A pipeline decision (Info / Pipeline, actor "pipeline").
    pub fn decision(
        pipeline: PipelineId,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::new(
            pipeline,
            action,
            "pipeline",
            description,
            AuditSeverity::Info,
            AuditCategory::Pipeline,
        )
    }

    /// An agent invocation outcome (Agent category; Error severity on failure).
    pub fn agent_action(
        pipeline: PipelineId,
        actor: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
        success: bool,
    ) -> Self {
        Self::new(
            pipeline,
            action,
            actor,
            description,
            if success {
                AuditSeverity::Info
            } else {
                AuditSeverity::Error
            },
            AuditCategory::Agent,
        )
    }

    /// A validation finding (Validation category, actor "validator";
    /// Error severity when the finding blocks acceptance).
    pub fn validation_failure(
        pipeline: PipelineId,
        description: impl Into<String>,
        blocking: bool,
    ) -> Self {
        Self::new(
            pipeline,
            "validation_failure",
            "validator",
            description,
            if blocking {
                AuditSeverity::Error
            } else {
                AuditSeverity::Warning
            },
            AuditCategory::Validation,
        )
    }

    /// A state-change proposal (Info / StateChange, actor "integrator").
    pub fn state_change(pipeline: PipelineId, description: impl Into<String>) -> Self {
        Self::new(
            pipeline,
            "state_change_proposed",
            "integrator",
            description,
            AuditSeverity::Info,
            AuditCategory::StateChange,
        )
    }
}

/// Aggregated counts for a run or for the whole ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    /// The run this report covers, or None for a global report
    pub pipeline: Option<PipelineId>,
    /// Total entries covered
    pub total: usize,
    /// Entry counts by severity
    pub by_severity: BTreeMap<AuditSeverity, usize>,
    /// Entry counts by category
    pub by_category: BTreeMap<AuditCategory, usize>,
    /// Entries at severity Warning or above
    pub problem_count: usize,
}

impl AuditReport {
    fn build(pipeline: Option<PipelineId>, entries: &[AuditEntry]) -> Self {
        let mut by_severity = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        let mut problem_count = 0;
        for entry in entries {
            *by_severity.entry(entry.severity).or_insert(0) += 1;
            *by_category.entry(entry.category).or_insert(0) += 1;
            if entry.severity >= AuditSeverity::Warning {
                problem_count += 1;
            }
        }
        Self {
            pipeline,
            total: entries.len(),
            by_severity,
            by_category,
            problem_count,
        }
    }

    /// Human-readable rendering.
    pub fn render(&self) -> String {
        let mut out = match self.pipeline {
            Some(id) => format!("Audit report for pipeline {}\n", id.short()),
            None => "Global audit report\n".to_string(),
        };
        out.push_str(&format!(
            "  {} entries, {} problem(s)\n",
            self.total, self.problem_count
        ));
        out.push_str("  By severity:\n");
        for (severity, count) in &self.by_severity {
            out.push_str(&format!("    {:<8} {}\n", severity.name(), count));
        }
        out.push_str("  By category:\n");
        for (category, count) in &self.by_category {
            out.push_str(&format!("    {:<12} {}\n", category.name(), count));
        }
        out
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Append-only, capacity-bounded, internally synchronized ledger.
pub struct AuditTrail {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditTrail {
    /// Create a trail holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry, evicting the oldest past capacity. Never panics:
    /// a poisoned lock is recovered and written through.
    pub fn record(&self, entry: AuditEntry) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All entries, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Entries for one run.
    pub fn entries_for(&self, pipeline: PipelineId) -> Vec<AuditEntry> {
        self.filtered(|e| e.pipeline == pipeline)
    }

    /// Entries at or above a severity.
    pub fn at_least(&self, severity: AuditSeverity) -> Vec<AuditEntry> {
        self.filtered(|e| e.severity >= severity)
    }

    /// Entries in one category.
    pub fn with_category(&self, category: AuditCategory) -> Vec<AuditEntry> {
        self.filtered(|e| e.category == category)
    }

    /// Entries with a given action name.
    pub fn with_action(&self, action: &str) -> Vec<AuditEntry> {
        self.filtered(|e| e.action == action)
    }

    /// Entries recorded in [from, to).
    pub fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<AuditEntry> {
        self.filtered(|e| e.timestamp >= from && e.timestamp < to)
    }

    /// Entries at severity Warning or above.
    pub fn problems(&self) -> Vec<AuditEntry> {
        self.at_least(AuditSeverity::Warning)
    }

    /// Aggregate report for one run.
    pub fn report(&self, pipeline: PipelineId) -> AuditReport {
        AuditReport::build(Some(pipeline), &self.entries_for(pipeline))
    }

    /// Aggregate report for the whole ledger.
    pub fn global_report(&self) -> AuditReport {
        AuditReport::build(None, &self.snapshot())
    }

    fn filtered(&self, keep: impl Fn(&AuditEntry) -> bool) -> Vec<AuditEntry> {
        self.lock().iter().filter(|e| keep(e)).cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditTrail")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_severity_ordering() {
        assert!(AuditSeverity::Critical > AuditSeverity::Error);
        assert!(AuditSeverity::Error > AuditSeverity::Warning);
        assert!(AuditSeverity::Warning > AuditSeverity::Info);
        assert!(AuditSeverity::Info > AuditSeverity::Debug);
    }

    #[test]
    fn test_record_and_query() {
        let trail = AuditTrail::new(16);
        let run_a = PipelineId::new();
        let run_b = PipelineId::new();

        trail.record(AuditEntry::decision(run_a, "run_started", "starting"));
        trail.record(AuditEntry::agent_action(
            run_a, "narrator", "invoke", "ok", true,
        ));
        trail.record(AuditEntry::agent_action(
            run_b, "narrator", "invoke", "timed out", false,
        ));

        assert_eq!(trail.len(), 3);
        assert_eq!(trail.entries_for(run_a).len(), 2);
        assert_eq!(trail.with_category(AuditCategory::Agent).len(), 2);
        assert_eq!(trail.with_action("invoke").len(), 2);
        assert_eq!(trail.problems().len(), 1);
    }

    #[test]
    fn test_capacity_eviction_oldest_first() {
        let trail = AuditTrail::new(5);
        let run = PipelineId::new();
        for i in 0..12 {
            trail.record(AuditEntry::decision(run, format!("action_{i}"), "step"));
        }

        // Capacity + k inserts leave exactly the most recent `capacity`.
        assert_eq!(trail.len(), 5);
        let snapshot = trail.snapshot();
        assert_eq!(snapshot[0].action, "action_7");
        assert_eq!(snapshot[4].action, "action_11");
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let trail = AuditTrail::new(0);
        let run = PipelineId::new();
        trail.record(AuditEntry::decision(run, "a", "d"));
        trail.record(AuditEntry::decision(run, "b", "d"));
        assert_eq!(trail.len(), 1);
        assert_eq!(trail.snapshot()[0].action, "b");
    }

    #[test]
    fn test_report_counts() {
        let trail = AuditTrail::new(16);
        let run = PipelineId::new();
        trail.record(AuditEntry::decision(run, "run_started", "starting"));
        trail.record(AuditEntry::validation_failure(run, "too short", false));
        trail.record(AuditEntry::validation_failure(run, "empty text", true));

        let report = trail.report(run);
        assert_eq!(report.total, 3);
        assert_eq!(report.by_severity.get(&AuditSeverity::Info), Some(&1));
        assert_eq!(report.by_severity.get(&AuditSeverity::Warning), Some(&1));
        assert_eq!(report.by_severity.get(&AuditSeverity::Error), Some(&1));
        assert_eq!(report.by_category.get(&AuditCategory::Validation), Some(&2));
        assert_eq!(report.problem_count, 2);

        let rendered = report.render();
        assert!(rendered.contains("3 entries"));
        assert!(rendered.contains("validation"));
    }

    #[test]
    fn test_concurrent_appends() {
        let trail = Arc::new(AuditTrail::new(256));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let trail = Arc::clone(&trail);
            handles.push(std::thread::spawn(move || {
                let run = PipelineId::new();
                for i in 0..32 {
                    trail.record(AuditEntry::decision(run, format!("a{i}"), "d"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(trail.len(), 256);
    }
}
