//! Run telemetry over a broadcast channel.
//!
//! The orchestrator emits [`RunEvent`]s while it works. Any number of
//! listeners (CLI progress output, tests) subscribe independently; with no
//! subscriber the events are dropped.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Strategy;
use crate::report::{AttemptOutcome, HaltReason, RunSummary};

/// One event, stamped with the run it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    /// Monotonically increasing within a run.
    pub seq: u64,
    pub event: RunEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEventKind {
    RunStarted {
        targets: usize,
        concurrency: usize,
    },
    AttemptStarted {
        target_id: String,
        strategy: Strategy,
        attempt: u32,
    },
    AttemptFinished {
        target_id: String,
        strategy: Strategy,
        attempt: u32,
        outcome: AttemptOutcome,
        duration_ms: u64,
    },
    /// The lightweight budget ran out and the target moves to rendering.
    Escalated { target_id: String },
    TargetFinished {
        target_id: String,
        succeeded: bool,
        attempts: u32,
        elapsed_ms: u64,
    },
    RunFinished {
        summary: RunSummary,
        halt: Option<HaltReason>,
        elapsed_ms: u64,
    },
}

pub type EventSender = tokio::sync::broadcast::Sender<RunEvent>;
pub type EventReceiver = tokio::sync::broadcast::Receiver<RunEvent>;

/// Create an event channel. The buffer holds a few hundred events; slow
/// receivers lag rather than block the run.
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(512)
}

/// Stamps events with the run id and sequence number.
#[derive(Debug)]
pub(crate) struct Emitter {
    tx: Option<EventSender>,
    run_id: Uuid,
    seq: std::sync::atomic::AtomicU64,
}

impl Emitter {
    pub(crate) fn new(tx: Option<EventSender>, run_id: Uuid) -> Self {
        Self {
            tx,
            run_id,
            seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub(crate) fn emit(&self, event: RunEventKind) {
        if let Some(tx) = &self.tx {
            let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            // No receivers is fine.
            let _ = tx.send(RunEvent {
                run_id: self.run_id,
                seq,
                event,
            });
        }
    }
}
