//! Catalog files and command-line target lists.
//!
//! Two file formats are accepted:
//!
//! ```text
//! [{"id": "Goku", "path": "/wiki/Goku", "dynamic": false}]
//! ```
//!
//! or plain text, one `id [path]` per line, `#` starting a comment. A
//! trailing `!` on the id marks the page as known to need rendering.

use std::path::Path;

use anyhow::{Context, Result};
use scouter::{CatalogEntry, PipelineConfig, TargetCatalog};

pub fn parse_entries(text: &str) -> Result<Vec<CatalogEntry>> {
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(text).context("invalid JSON catalog");
    }

    Ok(text
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut parts = line.split_whitespace();
            let mut entry = id_entry(parts.next().unwrap_or_default());
            entry.path = parts.next().map(str::to_string);
            entry
        })
        .collect())
}

/// An id as typed by the user; a trailing `!` marks it known-dynamic.
fn id_entry(raw: &str) -> CatalogEntry {
    let raw = raw.trim();
    let (id, dynamic) = match raw.strip_suffix('!') {
        Some(id) => (id, true),
        None => (raw, false),
    };
    CatalogEntry {
        id: id.to_string(),
        path: None,
        dynamic,
    }
}

pub fn load_entries(path: &Path) -> Result<Vec<CatalogEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    parse_entries(&text).with_context(|| format!("in catalog {}", path.display()))
}

/// Build the run catalog from an optional file plus ids given on the
/// command line, file entries first.
pub fn build_catalog(
    config: &PipelineConfig,
    file: Option<&Path>,
    ids: &[String],
) -> Result<TargetCatalog> {
    let mut entries = match file {
        Some(path) => load_entries(path)?,
        None => Vec::new(),
    };
    // Command-line ids may contain spaces ("Master Roshi").
    entries.extend(ids.iter().map(|id| id_entry(id)));
    if entries.is_empty() {
        anyhow::bail!("no targets: pass ids or --catalog <file>");
    }

    let resolver = config.resolver().context("invalid base_url/url_template")?;
    Ok(TargetCatalog::resolve(entries, &resolver)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_catalog() {
        let entries = parse_entries(
            "# Z fighters\nGoku\nPiccolo! /wiki/Piccolo  # renders client-side\n\n  Vegeta https://dragonball.fandom.com/wiki/Vegeta\n",
        )
        .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], CatalogEntry::new("Goku", None));
        assert_eq!(entries[1].path.as_deref(), Some("/wiki/Piccolo"));
        assert!(entries[1].dynamic);
        assert_eq!(
            entries[2].path.as_deref(),
            Some("https://dragonball.fandom.com/wiki/Vegeta")
        );
    }

    #[test]
    fn test_json_catalog() {
        let entries = parse_entries(
            r#"[{"id": "Goku", "path": "/wiki/Goku"}, {"id": "Cell", "url": "https://example.org/Cell", "dynamic": true}]"#,
        )
        .unwrap();
        assert_eq!(entries[0].path.as_deref(), Some("/wiki/Goku"));
        assert!(!entries[0].dynamic);
        assert_eq!(entries[1].path.as_deref(), Some("https://example.org/Cell"));
        assert!(entries[1].dynamic);
    }

    #[test]
    fn test_build_catalog_merges_file_and_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.txt");
        std::fs::write(&path, "Goku\n").unwrap();

        let config = PipelineConfig::default();
        let catalog = build_catalog(&config, Some(&path), &["Krillin".to_string()]).unwrap();
        let urls: Vec<&str> = catalog.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://dragonball.fandom.com/wiki/Goku",
                "https://dragonball.fandom.com/wiki/Krillin"
            ]
        );
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let config = PipelineConfig::default();
        let ids = vec!["Goku".to_string(), "Goku!".to_string()];
        assert!(build_catalog(&config, None, &ids).is_err());

        let roshi = build_catalog(&config, None, &["Master Roshi".to_string()]).unwrap();
        assert_eq!(
            roshi.iter().next().unwrap().url,
            "https://dragonball.fandom.com/wiki/Master%20Roshi"
        );
        assert!(build_catalog(&config, None, &[]).is_err());
    }
}
