//! Orchestrator: drive every target of a catalog to a terminal state.
//!
//! Targets run on a bounded `buffer_unordered` pool, one target per slot.
//! Each worker owns its target's escalation policy and attempt log; the
//! single collecting loop appends records to the sink and fills the report
//! builder, so nothing is shared between workers.
//!
//! Cancellation is checked at every suspension point (fetch, backoff). A
//! target cancelled before its record reaches the sink is left out of the
//! report. A sink error halts the run: targets not yet started are skipped
//! and in-flight ones are cancelled.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::acquisition::Fetcher;
use crate::catalog::{Target, TargetCatalog};
use crate::config::PipelineConfig;
use crate::detect::DegradationDetector;
use crate::document::Strategy;
use crate::error::{ConfigError, FetchErrorKind};
use crate::events::{Emitter, EventSender, RunEventKind};
use crate::normalize::Normalizer;
use crate::policy::{
    AttemptResult, BackoffConfig, EscalationPolicy, EscalationState, RetryBudget, Transition,
};
use crate::record::CanonicalRecord;
use crate::report::{
    AttemptOutcome, FailureReason, FetchAttempt, HaltReason, Outcome, ReportBuilder, RunReport,
    TargetReport,
};
use crate::sink::RecordSink;

/// A target whose attempt sequence reached a terminal state.
struct Finished<'a> {
    slot: usize,
    target: &'a Target,
    attempts: Vec<FetchAttempt>,
    /// `Err((reason, exhausted))` when no record was produced.
    result: Result<CanonicalRecord, (FailureReason, bool)>,
    started: Instant,
}

pub struct Orchestrator {
    concurrency: usize,
    budget: RetryBudget,
    backoff: BackoffConfig,
    light: Arc<dyn Fetcher>,
    render: Arc<dyn Fetcher>,
    detector: DegradationDetector,
    normalizer: Normalizer,
    sink: Arc<dyn RecordSink>,
    events: Option<EventSender>,
}

impl Orchestrator {
    /// Validate `config` and assemble a pipeline around the given fetchers
    /// and sink.
    pub fn new(
        config: &PipelineConfig,
        light: Arc<dyn Fetcher>,
        render: Arc<dyn Fetcher>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            concurrency: config.concurrency,
            budget: config.budget,
            backoff: config.backoff,
            light,
            render,
            detector: config.detector()?,
            normalizer: config.normalizer()?,
            sink,
            events: None,
        })
    }

    /// Emit run events on `tx`.
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.events = Some(tx);
        self
    }

    fn fetcher(&self, strategy: Strategy) -> &dyn Fetcher {
        match strategy {
            Strategy::Lightweight => self.light.as_ref(),
            Strategy::Render => self.render.as_ref(),
        }
    }

    /// Run every target in `catalog`. Always returns a report; failed
    /// targets are outcomes, not errors.
    pub async fn run(&self, catalog: &TargetCatalog, cancel: CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let emitter = Emitter::new(self.events.clone(), run_id);
        // Child token: a sink failure stops this run without cancelling the caller.
        let halt = cancel.child_token();
        let mut builder = ReportBuilder::new(run_id, catalog.len());

        info!(
            "run {run_id}: {} targets, concurrency {}",
            catalog.len(),
            self.concurrency
        );
        emitter.emit(RunEventKind::RunStarted {
            targets: catalog.len(),
            concurrency: self.concurrency,
        });

        let mut workers = futures::stream::iter(catalog.iter().enumerate())
            .map(|(slot, target)| self.drive(slot, target, &halt, &emitter))
            .buffer_unordered(self.concurrency);

        while let Some(finished) = workers.next().await {
            let Some(done) = finished else {
                continue;
            };
            let target = done.target;

            let outcome = match done.result {
                Ok(record) => {
                    if halt.is_cancelled() {
                        debug!("{}: finished after cancellation, record dropped", target.id);
                        continue;
                    }
                    match self.sink.append(&record).await {
                        Ok(()) => Outcome::Succeeded { record },
                        Err(e) => {
                            error!("{}: sink rejected record, halting run: {e}", target.id);
                            builder.halt(HaltReason::Sink {
                                target: Some(target.id.clone()),
                                message: e.to_string(),
                            });
                            halt.cancel();
                            Outcome::Failed {
                                reason: FailureReason::Sink {
                                    message: e.to_string(),
                                },
                                exhausted: false,
                            }
                        }
                    }
                }
                Err((reason, exhausted)) => Outcome::Failed { reason, exhausted },
            };

            let elapsed_ms = done.started.elapsed().as_millis() as u64;
            match &outcome {
                Outcome::Succeeded { record } => info!(
                    "{}: ok via {} after {} attempt(s)",
                    target.id,
                    record.provenance.strategy,
                    done.attempts.len()
                ),
                Outcome::Failed { reason, .. } => warn!(
                    "{}: failed after {} attempt(s): {reason}",
                    target.id,
                    done.attempts.len()
                ),
            }
            emitter.emit(RunEventKind::TargetFinished {
                target_id: target.id.clone(),
                succeeded: outcome.is_success(),
                attempts: done.attempts.len() as u32,
                elapsed_ms,
            });
            builder.record(
                done.slot,
                TargetReport {
                    target_id: target.id.clone(),
                    url: target.url.clone(),
                    outcome,
                    attempts: done.attempts,
                    elapsed_ms,
                },
            );
        }
        drop(workers);

        if let Err(e) = self.sink.flush().await {
            error!("sink flush failed: {e}");
            builder.halt(HaltReason::Sink {
                target: None,
                message: e.to_string(),
            });
        }
        if cancel.is_cancelled() && !builder.is_halted() {
            builder.halt(HaltReason::Cancelled);
        }

        let report = builder.finish(started.elapsed().as_millis() as u64);
        let s = &report.summary;
        info!(
            "run {run_id} finished: {} ok, {} exhausted, {} failed, {} not completed \
             ({} lightweight / {} render attempts)",
            s.succeeded,
            s.exhausted,
            s.failed,
            s.not_completed,
            s.lightweight_attempts,
            s.render_attempts
        );
        emitter.emit(RunEventKind::RunFinished {
            summary: report.summary.clone(),
            halt: report.halt.clone(),
            elapsed_ms: report.elapsed_ms,
        });
        report
    }

    /// Run one target's attempt sequence. `None` when cancelled before a
    /// terminal state.
    async fn drive<'a>(
        &self,
        slot: usize,
        target: &'a Target,
        cancel: &CancellationToken,
        emitter: &Emitter,
    ) -> Option<Finished<'a>> {
        if cancel.is_cancelled() {
            return None;
        }
        let started = Instant::now();
        let mut policy = EscalationPolicy::new(self.budget, target.hints);
        let mut state = policy.start();
        let mut attempts = Vec::new();
        let mut record = None;
        let mut last_failure = None;

        loop {
            let (strategy, strategy_attempt) = match state {
                EscalationState::LightAttempt(n) => (Strategy::Lightweight, n),
                EscalationState::RenderAttempt(m) => (Strategy::Render, m),
                _ => break,
            };
            let attempt = policy.attempts();
            emitter.emit(RunEventKind::AttemptStarted {
                target_id: target.id.clone(),
                strategy,
                attempt,
            });

            let started_at = Utc::now();
            let t0 = Instant::now();
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                fetched = self.fetcher(strategy).fetch(target) => fetched,
            };

            let (outcome, result) = match fetched {
                Ok(doc) => {
                    let bytes = doc.len();
                    let verdict = self.detector.inspect(&doc);
                    if verdict.usable {
                        match self.normalizer.normalize(&target.id, &doc, attempt) {
                            Ok(r) => {
                                record = Some(r);
                                (AttemptOutcome::Usable { bytes }, AttemptResult::Usable)
                            }
                            Err(e) => {
                                warn!("{}: usable page did not normalize: {e}", target.id);
                                last_failure = Some(FailureReason::Normalization {
                                    message: e.to_string(),
                                });
                                (AttemptOutcome::Usable { bytes }, AttemptResult::Rejected)
                            }
                        }
                    } else {
                        debug!(
                            "{}: {strategy} attempt {strategy_attempt} degraded ({} reasons)",
                            target.id,
                            verdict.reasons.len()
                        );
                        last_failure = Some(FailureReason::Degraded {
                            reasons: verdict.reasons.clone(),
                        });
                        (
                            AttemptOutcome::Degraded {
                                bytes,
                                reasons: verdict.reasons,
                            },
                            AttemptResult::Unusable,
                        )
                    }
                }
                Err(e) => {
                    debug!("{}: {strategy} attempt {strategy_attempt} failed: {e}", target.id);
                    let kind = e.kind();
                    last_failure = Some(FailureReason::Fetch {
                        kind,
                        message: e.to_string(),
                    });
                    (
                        AttemptOutcome::Error {
                            kind,
                            message: e.to_string(),
                        },
                        AttemptResult::Unusable,
                    )
                }
            };

            let duration_ms = t0.elapsed().as_millis() as u64;
            emitter.emit(RunEventKind::AttemptFinished {
                target_id: target.id.clone(),
                strategy,
                attempt,
                outcome: outcome.clone(),
                duration_ms,
            });
            attempts.push(FetchAttempt {
                target_id: target.id.clone(),
                strategy,
                attempt,
                strategy_attempt,
                outcome,
                started_at,
                duration_ms,
            });

            match policy.advance(result) {
                Transition::Retry { next, retry } => {
                    let delay = self.backoff.delay(retry);
                    debug!("{}: retrying {strategy} in {}ms", target.id, delay.as_millis());
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    state = next;
                }
                Transition::Escalate { next } => {
                    info!("{}: lightweight budget spent, escalating to render", target.id);
                    emitter.emit(RunEventKind::Escalated {
                        target_id: target.id.clone(),
                    });
                    state = next;
                }
                Transition::Terminal(terminal) => {
                    state = terminal;
                    break;
                }
            }
        }

        let result = match (state, record) {
            (EscalationState::Succeeded, Some(record)) => Ok(record),
            (EscalationState::Failed, _) => Err((
                last_failure.unwrap_or(FailureReason::Normalization {
                    message: "record rejected".into(),
                }),
                false,
            )),
            _ => Err((
                last_failure.unwrap_or(FailureReason::Fetch {
                    kind: FetchErrorKind::Render,
                    message: "no attempts budgeted for this target".into(),
                }),
                true,
            )),
        };

        Some(Finished {
            slot,
            target,
            attempts,
            result,
            started,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, UrlResolver};
    use crate::document::Document;
    use crate::error::FetchError;
    use crate::sink::MemorySink;
    use async_trait::async_trait;

    const GOKU: &str = include_str!("../tests/fixtures/goku_static.html");

    struct Always(Strategy, Option<&'static str>);

    #[async_trait]
    impl Fetcher for Always {
        fn strategy(&self) -> Strategy {
            self.0
        }
        async fn fetch(&self, target: &Target) -> Result<Document, FetchError> {
            match self.1 {
                Some(html) => Ok(Document::new(html, self.0, target.url.clone())),
                None => Err(FetchError::Http {
                    url: target.url.clone(),
                    status: 503,
                }),
            }
        }
    }

    fn catalog(ids: &[&str]) -> TargetCatalog {
        let resolver = UrlResolver::new("https://example.org/", "wiki/{id}").unwrap();
        let entries = ids.iter().map(|id| CatalogEntry::new(*id, None));
        TargetCatalog::resolve(entries, &resolver).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_errors_exhaust_with_fetch_reason() {
        let sink = Arc::new(MemorySink::new());
        let orch = Orchestrator::new(
            &PipelineConfig::default(),
            Arc::new(Always(Strategy::Lightweight, None)),
            Arc::new(Always(Strategy::Render, None)),
            sink.clone(),
        )
        .unwrap();

        let report = orch.run(&catalog(&["nobody"]), CancellationToken::new()).await;
        let t = report.target("nobody").unwrap();
        assert_eq!(t.attempts.len(), 4);
        match &t.outcome {
            Outcome::Failed {
                reason: FailureReason::Fetch { kind, .. },
                exhausted,
            } => {
                assert_eq!(*kind, FetchErrorKind::Http);
                assert!(*exhausted);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let (tx, mut rx) = crate::events::channel();
        let orch = Orchestrator::new(
            &PipelineConfig::default(),
            Arc::new(Always(Strategy::Lightweight, Some(GOKU))),
            Arc::new(Always(Strategy::Render, None)),
            Arc::new(MemorySink::new()),
        )
        .unwrap()
        .with_events(tx);

        orch.run(&catalog(&["goku"]), CancellationToken::new()).await;

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(match ev.event {
                RunEventKind::RunStarted { .. } => "run_started",
                RunEventKind::AttemptStarted { .. } => "attempt_started",
                RunEventKind::AttemptFinished { .. } => "attempt_finished",
                RunEventKind::Escalated { .. } => "escalated",
                RunEventKind::TargetFinished { .. } => "target_finished",
                RunEventKind::RunFinished { .. } => "run_finished",
            });
        }
        assert_eq!(
            kinds,
            [
                "run_started",
                "attempt_started",
                "attempt_finished",
                "target_finished",
                "run_finished"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dynamic_hint_without_render_budget_fetches_lightweight() {
        let config = PipelineConfig {
            budget: RetryBudget {
                max_light_attempts: 2,
                max_render_attempts: 0,
            },
            ..PipelineConfig::default()
        };
        let orch = Orchestrator::new(
            &config,
            Arc::new(Always(Strategy::Lightweight, Some(GOKU))),
            Arc::new(Always(Strategy::Render, None)),
            Arc::new(MemorySink::new()),
        )
        .unwrap();

        let resolver = UrlResolver::new("https://example.org/", "wiki/{id}").unwrap();
        let entry = CatalogEntry {
            dynamic: true,
            ..CatalogEntry::new("goku", None)
        };
        let catalog = TargetCatalog::resolve([entry], &resolver).unwrap();

        let report = orch.run(&catalog, CancellationToken::new()).await;
        let t = report.target("goku").unwrap();
        assert!(t.outcome.is_success());
        assert_eq!(t.attempts.len(), 1);
        assert_eq!(t.attempts[0].strategy, Strategy::Lightweight);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PipelineConfig {
            concurrency: 0,
            ..PipelineConfig::default()
        };
        let result = Orchestrator::new(
            &config,
            Arc::new(Always(Strategy::Lightweight, None)),
            Arc::new(Always(Strategy::Render, None)),
            Arc::new(MemorySink::new()),
        );
        assert!(result.is_err());
    }
}
