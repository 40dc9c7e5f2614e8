//! `scouter run`: fetch a catalog and store the records.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use scouter::renderer::chromium::ChromiumRenderer;
use scouter::renderer::{NoopRenderer, Renderer, SessionPool};
use scouter::{
    CanonicalRecord, JsonLinesSink, LightweightFetcher, Orchestrator, PipelineConfig, RecordSink,
    RenderFetcher, RunReport, SinkError,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::sqlite::SqliteSink;
use crate::targets;

pub struct RunArgs {
    pub ids: Vec<String>,
    pub catalog: Option<PathBuf>,
    pub out: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub http_only: bool,
    pub events: bool,
}

/// Fans one record out to several sinks, in order. The first failure wins.
struct TeeSink(Vec<Arc<dyn RecordSink>>);

#[async_trait]
impl RecordSink for TeeSink {
    async fn append(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        for sink in &self.0 {
            sink.append(record).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        for sink in &self.0 {
            sink.flush().await?;
        }
        Ok(())
    }
}

async fn open_sinks(args: &RunArgs) -> Result<Arc<dyn RecordSink>> {
    let mut sinks: Vec<Arc<dyn RecordSink>> = Vec::new();
    if let Some(db) = &args.db {
        sinks.push(Arc::new(SqliteSink::open(db)?));
        info!("storing records in {}", db.display());
    }
    if let Some(out) = &args.out {
        let sink = JsonLinesSink::open(out)
            .await
            .with_context(|| format!("failed to open {}", out.display()))?;
        sinks.push(Arc::new(sink));
        info!("appending records to {}", out.display());
    }
    Ok(match sinks.len() {
        1 => sinks.remove(0),
        _ => Arc::new(TeeSink(sinks)),
    })
}

/// Launch Chromium unless disabled; fall back to HTTP-only when it cannot start.
pub async fn launch_renderer(config: &PipelineConfig, http_only: bool) -> Arc<dyn Renderer> {
    if http_only {
        info!("HTTP-only mode: render attempts will fail");
        return Arc::new(NoopRenderer::new("disabled by --http-only"));
    }
    let executable = config.render.chromium_path.as_deref();
    match ChromiumRenderer::launch(config.render.headless, executable).await {
        Ok(renderer) => Arc::new(renderer),
        Err(e) => {
            warn!("{e:#}; continuing without a browser");
            Arc::new(NoopRenderer::new(format!("{e:#}")))
        }
    }
}

pub async fn run(config: PipelineConfig, args: RunArgs) -> Result<RunReport> {
    config.validate()?;
    let catalog = targets::build_catalog(&config, args.catalog.as_deref(), &args.ids)?;
    let sink = open_sinks(&args).await?;

    let light = Arc::new(LightweightFetcher::new(
        config.request_timeout_ms,
        &config.user_agent,
    )?);
    let renderer = launch_renderer(&config, args.http_only).await;
    let pool = SessionPool::new(renderer, config.render.max_idle_sessions);
    let render = Arc::new(RenderFetcher::new(pool.clone(), config.render.clone()));

    let mut orchestrator = Orchestrator::new(&config, light, render, sink)?;
    if args.events {
        let (tx, mut rx) = scouter::events::channel();
        orchestrator = orchestrator.with_events(tx);
        tokio::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{line}");
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("event stream lagged, {n} events dropped"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let report = orchestrator.run(&catalog, cancel).await;

    if let Err(e) = pool.shutdown().await {
        warn!("browser shutdown failed: {e:#}");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scouter::MemorySink;

    #[tokio::test]
    async fn test_tee_sink_writes_everywhere() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let tee = TeeSink(vec![a.clone(), b.clone()]);

        let record: CanonicalRecord = serde_json::from_str(
            r#"{"target_id": "Goku", "fields": {"name": "Goku"},
                "provenance": {"strategy": "render", "attempts": 3, "source_url": "https://example.org/Goku"}}"#,
        )
        .unwrap();
        tee.append(&record).await.unwrap();
        tee.flush().await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.records(), vec![record]);
    }

    #[tokio::test]
    async fn test_out_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let args = RunArgs {
            ids: vec![],
            catalog: None,
            out: Some(dir.path().join("records.jsonl")),
            db: None,
            http_only: true,
            events: false,
        };
        open_sinks(&args).await.unwrap();
        assert!(dir.path().join("records.jsonl").exists());
    }
}
