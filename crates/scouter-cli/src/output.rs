//! Human and JSON rendering of run reports.

use std::fmt::Write as _;

use scouter::report::{Outcome, RunReport};
use scouter::HaltReason;

/// Process exit code for a finished run: 0 for complete or partial success,
/// 1 when a sink error halted the run, 130 when it was cancelled.
pub fn exit_code(report: &RunReport) -> i32 {
    match &report.halt {
        None => 0,
        Some(HaltReason::Sink { .. }) => 1,
        Some(HaltReason::Cancelled) => 130,
    }
}

pub fn render_json(report: &RunReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

pub fn render_human(report: &RunReport) -> String {
    let mut out = String::new();
    let width = report
        .targets
        .iter()
        .map(|t| t.target_id.len())
        .max()
        .unwrap_or(0)
        .max(6);

    let _ = writeln!(
        out,
        "Run {} ({:.1}s)",
        report.run_id,
        report.elapsed_ms as f64 / 1000.0
    );
    for t in &report.targets {
        let n = t.attempts.len();
        let line = match &t.outcome {
            Outcome::Succeeded { record } => format!(
                "  ok         {:width$}  {} in {n} attempt(s)",
                t.target_id, record.provenance.strategy
            ),
            Outcome::Failed {
                reason,
                exhausted: true,
            } => format!("  exhausted  {:width$}  {reason}", t.target_id),
            Outcome::Failed { reason, .. } => {
                format!("  failed     {:width$}  {reason}", t.target_id)
            }
        };
        let _ = writeln!(out, "{line}");
    }

    let s = &report.summary;
    let _ = writeln!(
        out,
        "\n{} of {} succeeded, {} exhausted, {} failed, {} not completed",
        s.succeeded, s.total, s.exhausted, s.failed, s.not_completed
    );
    let _ = writeln!(
        out,
        "attempts: {} lightweight, {} render",
        s.lightweight_attempts, s.render_attempts
    );
    match &report.halt {
        Some(HaltReason::Cancelled) => {
            let _ = writeln!(out, "run cancelled");
        }
        Some(HaltReason::Sink { target, message }) => {
            let _ = match target {
                Some(id) => writeln!(out, "run halted storing {id}: {message}"),
                None => writeln!(out, "run halted: {message}"),
            };
        }
        None => {}
    }
    out
}
