//! `scouter inspect`: fetch one page once and show what the pipeline sees.
//!
//! Useful for tuning detector markers and schema selectors against a live
//! page without storing anything.

use anyhow::Result;
use scouter::renderer::SessionPool;
use scouter::{
    CanonicalRecord, CatalogEntry, DegradationVerdict, Document, Fetcher, LightweightFetcher,
    PipelineConfig, RenderFetcher, TargetCatalog,
};
use serde_json::json;

use crate::run_cmd::launch_renderer;

pub struct InspectArgs {
    pub id: String,
    /// Explicit path or absolute URL instead of the URL template.
    pub path: Option<String>,
    pub render: bool,
}

pub async fn run(config: PipelineConfig, args: InspectArgs, json_output: bool) -> Result<()> {
    config.validate()?;
    let resolver = config.resolver()?;
    let entry = CatalogEntry::new(args.id.as_str(), args.path.as_deref());
    let catalog = TargetCatalog::resolve([entry], &resolver)?;
    let target = catalog
        .iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no target"))?;

    let doc = if args.render {
        let pool = SessionPool::new(launch_renderer(&config, false).await, 1);
        let fetcher = RenderFetcher::new(pool.clone(), config.render.clone());
        let fetched = fetcher.fetch(target).await;
        if let Err(e) = pool.shutdown().await {
            tracing::warn!("browser shutdown failed: {e:#}");
        }
        fetched?
    } else {
        LightweightFetcher::new(config.request_timeout_ms, &config.user_agent)?
            .fetch(target)
            .await?
    };

    let inspection = inspect_document(&config, &target.id, &doc)?;
    let Inspection {
        verdict,
        record,
        normalization,
    } = &inspection;

    if json_output {
        let value = json!({
            "target": target,
            "strategy": doc.strategy,
            "final_url": doc.final_url,
            "bytes": doc.len(),
            "verdict": verdict,
            "record": record,
            "normalization": normalization,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{} via {} ({} bytes)", doc.final_url, doc.strategy, doc.len());
    if verdict.usable {
        println!("verdict: usable");
    } else {
        println!("verdict: degraded");
        for reason in &verdict.reasons {
            println!("  - {reason}");
        }
    }
    if let Some(record) = record {
        for (key, value) in &record.fields {
            println!("  {key}: {}", serde_json::to_string(value)?);
        }
    }
    if let Some(note) = normalization {
        println!("normalization: {note}");
    }
    Ok(())
}

/// What the pipeline would make of one fetched document.
struct Inspection {
    verdict: DegradationVerdict,
    record: Option<CanonicalRecord>,
    /// Why no record was produced.
    normalization: Option<String>,
}

/// Degraded documents are never normalized, matching a pipeline run.
fn inspect_document(
    config: &PipelineConfig,
    target_id: &str,
    doc: &Document,
) -> Result<Inspection> {
    let verdict = config.detector()?.inspect(doc);
    if !verdict.usable {
        return Ok(Inspection {
            verdict,
            record: None,
            normalization: Some("skipped: document is degraded".to_string()),
        });
    }
    let (record, normalization) = match config.normalizer()?.normalize(target_id, doc, 1) {
        Ok(record) => (Some(record), None),
        Err(e) => (None, Some(e.to_string())),
    };
    Ok(Inspection {
        verdict,
        record,
        normalization,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scouter::{DegradationReason, Strategy};

    #[test]
    fn test_degraded_document_is_not_normalized() {
        // A heading alone would normalize, but the page has no content region.
        let doc = Document::new(
            "<html><body><h1>Goku</h1><div id=\"app\"></div></body></html>",
            Strategy::Lightweight,
            "https://dragonball.fandom.com/wiki/Goku",
        );
        let inspection = inspect_document(&PipelineConfig::default(), "Goku", &doc).unwrap();

        assert!(!inspection.verdict.usable);
        assert!(inspection
            .verdict
            .reasons
            .contains(&DegradationReason::MissingRegion {
                selector: "#mw-content-text".into()
            }));
        assert!(inspection.record.is_none());
        assert_eq!(
            inspection.normalization.as_deref(),
            Some("skipped: document is degraded")
        );
    }

    #[test]
    fn test_usable_document_is_normalized() {
        let doc = Document::new(
            include_str!("../../scouter/tests/fixtures/goku_static.html"),
            Strategy::Lightweight,
            "https://dragonball.fandom.com/wiki/Goku",
        );
        let inspection = inspect_document(&PipelineConfig::default(), "Goku", &doc).unwrap();

        assert!(inspection.verdict.usable);
        let record = inspection.record.unwrap();
        assert_eq!(record.integer("power_level"), Some(9001));
        assert!(inspection.normalization.is_none());
    }
}
