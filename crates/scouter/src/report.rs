//! Attempt records, per-target outcomes and the run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::DegradationReason;
use crate::document::Strategy;
use crate::error::FetchErrorKind;
use crate::record::CanonicalRecord;

/// How a single fetch attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Usable {
        bytes: usize,
    },
    Degraded {
        bytes: usize,
        reasons: Vec<DegradationReason>,
    },
    Error {
        kind: FetchErrorKind,
        message: String,
    },
}

/// One fetch attempt. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub target_id: String,
    pub strategy: Strategy,
    /// 1-based, counted across both strategies.
    pub attempt: u32,
    /// 1-based, counted within `strategy`.
    pub strategy_attempt: u32,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Why a target produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The last attempt failed to fetch.
    Fetch {
        kind: FetchErrorKind,
        message: String,
    },
    /// The last attempt fetched a degraded document.
    Degraded { reasons: Vec<DegradationReason> },
    /// A usable document did not fit the schema.
    Normalization { message: String },
    /// The record could not be handed to the sink.
    Sink { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Fetch { kind, message } => write!(f, "{kind:?} error: {message}"),
            FailureReason::Degraded { reasons } => {
                let codes: Vec<String> = reasons.iter().map(ToString::to_string).collect();
                write!(f, "degraded: {}", codes.join(", "))
            }
            FailureReason::Normalization { message } => write!(f, "normalization: {message}"),
            FailureReason::Sink { message } => write!(f, "sink: {message}"),
        }
    }
}

/// Terminal result for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded {
        record: CanonicalRecord,
    },
    Failed {
        reason: FailureReason,
        /// True when the retry budget ran out; false for non-retryable failures.
        exhausted: bool,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded { .. })
    }

    pub fn record(&self) -> Option<&CanonicalRecord> {
        match self {
            Outcome::Succeeded { record } => Some(record),
            Outcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target_id: String,
    pub url: String,
    pub outcome: Outcome,
    pub attempts: Vec<FetchAttempt>,
    pub elapsed_ms: u64,
}

impl TargetReport {
    pub fn attempts_with(&self, strategy: Strategy) -> usize {
        self.attempts.iter().filter(|a| a.strategy == strategy).count()
    }
}

/// Why a run stopped before every target was processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltReason {
    Cancelled,
    /// `target` is unset when the final flush failed.
    Sink {
        target: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Failed after spending the whole budget.
    pub exhausted: usize,
    /// Failed for a non-retryable reason.
    pub failed: usize,
    /// Cancelled or skipped targets, absent from `targets`.
    pub not_completed: usize,
    pub lightweight_attempts: usize,
    pub render_attempts: usize,
}

/// Result of one orchestrator run. Targets appear in catalog order and only
/// when they reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub targets: Vec<TargetReport>,
    pub summary: RunSummary,
    pub elapsed_ms: u64,
    pub halt: Option<HaltReason>,
}

impl RunReport {
    pub fn target(&self, id: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.target_id == id)
    }

    pub fn records(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.targets.iter().filter_map(|t| t.outcome.record())
    }

    /// True when nothing stopped the run early. Failed targets still count
    /// as a complete run.
    pub fn is_complete(&self) -> bool {
        self.halt.is_none()
    }
}

/// Collects target reports by catalog slot while workers finish out of order.
#[derive(Debug)]
pub(crate) struct ReportBuilder {
    run_id: Uuid,
    slots: Vec<Option<TargetReport>>,
    halt: Option<HaltReason>,
}

impl ReportBuilder {
    pub(crate) fn new(run_id: Uuid, len: usize) -> Self {
        Self {
            run_id,
            slots: vec![None; len],
            halt: None,
        }
    }

    pub(crate) fn record(&mut self, slot: usize, report: TargetReport) {
        debug_assert!(self.slots[slot].is_none(), "slot {slot} reported twice");
        self.slots[slot] = Some(report);
    }

    /// Keep the first halt reason; later ones are consequences of it.
    pub(crate) fn halt(&mut self, reason: HaltReason) {
        self.halt.get_or_insert(reason);
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halt.is_some()
    }

    pub(crate) fn finish(self, elapsed_ms: u64) -> RunReport {
        let total = self.slots.len();
        let targets: Vec<TargetReport> = self.slots.into_iter().flatten().collect();

        let mut summary = RunSummary {
            total,
            not_completed: total - targets.len(),
            ..RunSummary::default()
        };
        for t in &targets {
            match &t.outcome {
                Outcome::Succeeded { .. } => summary.succeeded += 1,
                Outcome::Failed { exhausted: true, .. } => summary.exhausted += 1,
                Outcome::Failed { exhausted: false, .. } => summary.failed += 1,
            }
            summary.lightweight_attempts += t.attempts_with(Strategy::Lightweight);
            summary.render_attempts += t.attempts_with(Strategy::Render);
        }

        RunReport {
            run_id: self.run_id,
            targets,
            summary,
            elapsed_ms,
            halt: self.halt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(id: &str, exhausted: bool) -> TargetReport {
        TargetReport {
            target_id: id.into(),
            url: format!("https://example.org/wiki/{id}"),
            outcome: Outcome::Failed {
                reason: FailureReason::Degraded {
                    reasons: vec![DegradationReason::EmptyDocument],
                },
                exhausted,
            },
            attempts: vec![FetchAttempt {
                target_id: id.into(),
                strategy: Strategy::Lightweight,
                attempt: 1,
                strategy_attempt: 1,
                outcome: AttemptOutcome::Degraded {
                    bytes: 0,
                    reasons: vec![DegradationReason::EmptyDocument],
                },
                started_at: Utc::now(),
                duration_ms: 3,
            }],
            elapsed_ms: 3,
        }
    }

    #[test]
    fn test_builder_keeps_catalog_order_and_counts() {
        let mut builder = ReportBuilder::new(Uuid::new_v4(), 3);
        builder.record(2, failed("c", false));
        builder.record(0, failed("a", true));

        let report = builder.finish(10);
        let ids: Vec<&str> = report.targets.iter().map(|t| t.target_id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.exhausted, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.not_completed, 1);
        assert_eq!(report.summary.lightweight_attempts, 2);
        assert!(report.is_complete());
    }

    #[test]
    fn test_first_halt_reason_wins() {
        let mut builder = ReportBuilder::new(Uuid::new_v4(), 0);
        builder.halt(HaltReason::Sink {
            target: Some("a".into()),
            message: "disk full".into(),
        });
        builder.halt(HaltReason::Cancelled);
        let report = builder.finish(0);
        assert!(matches!(report.halt, Some(HaltReason::Sink { .. })));
    }

    #[test]
    fn test_failure_reason_display() {
        let reason = FailureReason::Degraded {
            reasons: vec![DegradationReason::MissingRegion {
                selector: "#mw-content-text".into(),
            }],
        };
        assert_eq!(reason.to_string(), "degraded: missing_region(#mw-content-text)");
    }
}
