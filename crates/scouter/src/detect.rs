//! Degradation detection: decide whether a fetched document is usable.
//!
//! A document is degraded when it is structurally present but missing the
//! content a character page should carry, typically a client-rendered
//! shell served to the lightweight strategy. The marker set is
//! configuration because it is site-specific.

use scraper::{Html, Node, Selector};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::ConfigError;

/// Structural expectations a usable page must meet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// CSS selectors that must each match at least one element.
    pub required_regions: Vec<String>,
    /// Minimum visible text length, in characters.
    pub min_content_chars: usize,
    /// Case-insensitive phrases that mark a shell or not-found page.
    pub placeholder_markers: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            required_regions: vec![
                "#mw-content-text".to_string(),
                ".portable-infobox, table.infobox".to_string(),
            ],
            min_content_chars: 200,
            placeholder_markers: vec![
                "There is currently no text in this page".to_string(),
                "This page does not exist".to_string(),
                "Please enable JavaScript".to_string(),
            ],
        }
    }
}

/// Why a document was judged degraded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DegradationReason {
    EmptyDocument,
    MissingRegion { selector: String },
    InsufficientContent { chars: usize, min: usize },
    PlaceholderMarker { marker: String },
}

impl std::fmt::Display for DegradationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradationReason::EmptyDocument => f.write_str("empty_document"),
            DegradationReason::MissingRegion { selector } => {
                write!(f, "missing_region({selector})")
            }
            DegradationReason::InsufficientContent { chars, min } => {
                write!(f, "insufficient_content({chars}<{min})")
            }
            DegradationReason::PlaceholderMarker { marker } => {
                write!(f, "placeholder_marker({marker})")
            }
        }
    }
}

/// Result of inspecting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationVerdict {
    pub usable: bool,
    pub reasons: Vec<DegradationReason>,
}

impl DegradationVerdict {
    fn from_reasons(reasons: Vec<DegradationReason>) -> Self {
        Self {
            usable: reasons.is_empty(),
            reasons,
        }
    }
}

/// Precompiled detector. Construction validates the selectors, so
/// inspection is infallible.
#[derive(Debug)]
pub struct DegradationDetector {
    regions: Vec<(String, Selector)>,
    min_content_chars: usize,
    /// (original marker, lowercased marker)
    markers: Vec<(String, String)>,
}

impl DegradationDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, ConfigError> {
        let regions = config
            .required_regions
            .iter()
            .map(|s| {
                Selector::parse(s)
                    .map(|sel| (s.clone(), sel))
                    .map_err(|e| ConfigError::InvalidSelector {
                        selector: s.clone(),
                        message: format!("{e:?}"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let markers = config
            .placeholder_markers
            .iter()
            .filter(|m| !m.trim().is_empty())
            .map(|m| (m.clone(), m.to_lowercase()))
            .collect();

        Ok(Self {
            regions,
            min_content_chars: config.min_content_chars,
            markers,
        })
    }

    /// Inspect a document. Malformed markup is reported as degradation,
    /// never as an error.
    pub fn inspect(&self, document: &Document) -> DegradationVerdict {
        if document.is_blank() {
            return DegradationVerdict::from_reasons(vec![DegradationReason::EmptyDocument]);
        }

        let html = Html::parse_document(&document.content);
        let mut reasons = Vec::new();

        for (raw, selector) in &self.regions {
            if html.select(selector).next().is_none() {
                reasons.push(DegradationReason::MissingRegion {
                    selector: raw.clone(),
                });
            }
        }

        let text = visible_text(&html);
        let chars = text.chars().count();
        if chars < self.min_content_chars {
            reasons.push(DegradationReason::InsufficientContent {
                chars,
                min: self.min_content_chars,
            });
        }

        let lowered = text.to_lowercase();
        for (marker, needle) in &self.markers {
            if lowered.contains(needle.as_str()) {
                reasons.push(DegradationReason::PlaceholderMarker {
                    marker: marker.clone(),
                });
            }
        }

        DegradationVerdict::from_reasons(reasons)
    }
}

/// Whitespace-collapsed text outside script, style and noscript elements.
///
/// `noscript` is parsed as raw text by html5ever when scripting is
/// enabled, so "please enable JavaScript" banners never count as content.
fn visible_text(html: &Html) -> String {
    let mut words: Vec<&str> = Vec::new();
    for node in html.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Strategy;

    const FULL_PAGE: &str = r#"<html><body>
        <main class="page"><div id="mw-content-text"><div class="mw-parser-output">
        <aside class="portable-infobox"><h2 class="pi-title" data-source="name">Goku</h2>
        <div class="pi-item pi-data" data-source="race"><h3 class="pi-data-label">Race</h3>
        <div class="pi-data-value">Saiyan</div></div></aside>
        <p>Son Goku is the main protagonist of the Dragon Ball metaseries. He is a Saiyan
        originally sent to Earth as an infant with the mission to destroy it. However, an
        accident alters his memory, causing him to grow up pure-hearted and later become
        Earth's greatest defender.</p>
        </div></div></main></body></html>"#;

    fn doc(content: &str) -> Document {
        Document::new(content, Strategy::Lightweight, "https://dragonball.fandom.com/wiki/Goku")
    }

    fn detector() -> DegradationDetector {
        DegradationDetector::new(&DetectorConfig::default()).unwrap()
    }

    #[test]
    fn test_full_page_is_usable() {
        let verdict = detector().inspect(&doc(FULL_PAGE));
        assert!(verdict.usable, "reasons: {:?}", verdict.reasons);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn test_shell_page_is_degraded() {
        let shell = r#"<html><head><script>window.__APP__ = {"loading": true, "payload": "lots of text that should not count as visible content at all because it lives inside a script element and is only data for the client side renderer to hydrate later on"};</script></head>
            <body><div id="app"></div><noscript>Please enable JavaScript to view this page.</noscript></body></html>"#;
        let verdict = detector().inspect(&doc(shell));
        assert!(!verdict.usable);
        assert!(verdict.reasons.contains(&DegradationReason::MissingRegion {
            selector: "#mw-content-text".into()
        }));
        assert!(matches!(
            verdict
                .reasons
                .iter()
                .find(|r| matches!(r, DegradationReason::InsufficientContent { .. })),
            Some(DegradationReason::InsufficientContent { chars: 0, min: 200 })
        ));
    }

    #[test]
    fn test_placeholder_marker_detected_case_insensitive() {
        let page = FULL_PAGE.replace(
            "<p>Son Goku",
            "<p>there is currently NO TEXT in this page. Son Goku",
        );
        let verdict = detector().inspect(&doc(&page));
        assert!(!verdict.usable);
        assert_eq!(
            verdict.reasons,
            vec![DegradationReason::PlaceholderMarker {
                marker: "There is currently no text in this page".into()
            }]
        );
    }

    #[test]
    fn test_empty_and_garbage_input() {
        let verdict = detector().inspect(&doc("   \n"));
        assert_eq!(verdict.reasons, vec![DegradationReason::EmptyDocument]);

        let verdict = detector().inspect(&doc("\u{0}\u{1}<<<>>>{{not html"));
        assert!(!verdict.usable);
        assert!(!verdict.reasons.is_empty());
    }

    #[test]
    fn test_invalid_selector_rejected_at_construction() {
        let config = DetectorConfig {
            required_regions: vec!["div[".into()],
            ..DetectorConfig::default()
        };
        assert!(matches!(
            DegradationDetector::new(&config),
            Err(ConfigError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn test_custom_marker_set() {
        let config = DetectorConfig {
            required_regions: vec!["article".into()],
            min_content_chars: 5,
            placeholder_markers: vec![],
        };
        let detector = DegradationDetector::new(&config).unwrap();
        assert!(detector.inspect(&doc("<article>Vegeta, prince of Saiyans</article>")).usable);
        assert!(!detector.inspect(&doc("<section>Vegeta, prince of Saiyans</section>")).usable);
    }
}
