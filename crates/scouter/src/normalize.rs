//! Normalizer: turn a usable document into a canonical record.
//!
//! The static markup served to plain HTTP and the DOM produced by a
//! browser differ in structure (the static infobox carries `data-source`
//! keys, the hydrated one only label/value pairs, some skins render a
//! table). Every lookup tries all shapes in a fixed order, so the
//! extracted field set depends on page content only, never on which
//! strategy fetched it.

use std::collections::BTreeSet;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{ConfigError, NormalizationError};
use crate::record::{CanonicalRecord, FieldKind, FieldValue, Fields, Provenance};

const DEFAULT_MAX_ITEM_LEN: usize = 120;

fn default_max_item_len() -> usize {
    DEFAULT_MAX_ITEM_LEN
}

/// Where a canonical field is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum FieldSource {
    /// First non-empty text among the selectors.
    Title { selectors: Vec<String> },
    /// Infobox row whose label matches one of `labels`.
    Infobox { labels: Vec<String> },
    /// List and table items under the first heading containing a keyword.
    Section {
        keywords: Vec<String>,
        #[serde(default = "default_max_item_len")]
        max_item_len: usize,
    },
}

/// One canonical field of the output schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    pub source: FieldSource,
}

impl FieldSpec {
    fn new(key: &str, kind: FieldKind, required: bool, source: FieldSource) -> Self {
        Self {
            key: key.to_string(),
            kind,
            required,
            source,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Character schema used when the configuration does not supply one.
pub fn default_schema() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new(
            "name",
            FieldKind::Text,
            true,
            FieldSource::Title {
                selectors: strings(&[
                    ".portable-infobox .pi-title",
                    "#firstHeading",
                    "h1.page-header__title",
                    "h1",
                ]),
            },
        ),
        FieldSpec::new(
            "race",
            FieldKind::Text,
            false,
            FieldSource::Infobox {
                labels: strings(&["Race", "Species"]),
            },
        ),
        FieldSpec::new(
            "power_level",
            FieldKind::Integer,
            false,
            FieldSource::Infobox {
                labels: strings(&["Power Level", "Battle Power"]),
            },
        ),
        FieldSpec::new(
            "affiliations",
            FieldKind::List,
            false,
            FieldSource::Infobox {
                labels: strings(&["Affiliation", "Affiliations"]),
            },
        ),
        FieldSpec::new(
            "techniques",
            FieldKind::List,
            false,
            FieldSource::Section {
                keywords: strings(&["technique", "abilities", "attacks"]),
                max_item_len: DEFAULT_MAX_ITEM_LEN,
            },
        ),
    ]
}

/// Text and list views of one located value.
struct RawValue {
    text: String,
    items: Vec<String>,
}

enum CompiledSource {
    Title(Vec<Selector>),
    Infobox(Vec<String>),
    Section {
        keywords: Vec<String>,
        max_item_len: usize,
    },
}

struct CompiledField {
    key: String,
    kind: FieldKind,
    required: bool,
    source: CompiledSource,
}

/// Fixed selectors for the three infobox shapes and section scanning.
struct ShapeSelectors {
    data_source: Selector,
    pi_data: Selector,
    pi_label: Selector,
    pi_value: Selector,
    table_row: Selector,
    th: Selector,
    td: Selector,
    headings: Selector,
    li: Selector,
    tr: Selector,
    cell: Selector,
}

impl ShapeSelectors {
    fn compile() -> Result<Self, ConfigError> {
        Ok(Self {
            data_source: parse_selector("[data-source]")?,
            pi_data: parse_selector(".pi-data")?,
            pi_label: parse_selector(".pi-data-label")?,
            pi_value: parse_selector(".pi-data-value")?,
            table_row: parse_selector("table.infobox tr")?,
            th: parse_selector("th")?,
            td: parse_selector("td")?,
            headings: parse_selector("h2, h3, h4")?,
            li: parse_selector("li")?,
            tr: parse_selector("tr")?,
            cell: parse_selector("th, td")?,
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector, ConfigError> {
    Selector::parse(s).map_err(|e| ConfigError::InvalidSelector {
        selector: s.to_string(),
        message: format!("{e:?}"),
    })
}

/// Compiled schema. Cheap to share behind an `Arc`; normalization is
/// synchronous and holds no state between calls.
pub struct Normalizer {
    fields: Vec<CompiledField>,
    shapes: ShapeSelectors,
    parenthetical: Regex,
    number: Regex,
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer")
            .field("fields", &self.fields.iter().map(|c| &c.key).collect::<Vec<_>>())
            .finish()
    }
}

impl Normalizer {
    pub fn new(schema: &[FieldSpec]) -> Result<Self, ConfigError> {
        if schema.is_empty() {
            return Err(ConfigError::Invalid("schema has no fields".into()));
        }

        let mut seen = BTreeSet::new();
        let mut fields = Vec::with_capacity(schema.len());
        for spec in schema {
            if spec.key.trim().is_empty() {
                return Err(ConfigError::Invalid("schema field with empty key".into()));
            }
            if !seen.insert(spec.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate schema field '{}'",
                    spec.key
                )));
            }
            let source = match &spec.source {
                FieldSource::Title { selectors } => CompiledSource::Title(
                    selectors
                        .iter()
                        .map(|s| parse_selector(s))
                        .collect::<Result<_, _>>()?,
                ),
                FieldSource::Infobox { labels } => {
                    CompiledSource::Infobox(labels.iter().map(|l| label_key(l)).collect())
                }
                FieldSource::Section {
                    keywords,
                    max_item_len,
                } => {
                    if spec.kind != FieldKind::List {
                        return Err(ConfigError::Invalid(format!(
                            "section field '{}' must be a list",
                            spec.key
                        )));
                    }
                    CompiledSource::Section {
                        keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
                        max_item_len: *max_item_len,
                    }
                }
            };
            fields.push(CompiledField {
                key: spec.key.clone(),
                kind: spec.kind,
                required: spec.required,
                source,
            });
        }

        Ok(Self {
            fields,
            shapes: ShapeSelectors::compile()?,
            parenthetical: Regex::new(r"\(.*?\)")
                .map_err(|e| ConfigError::Invalid(e.to_string()))?,
            number: Regex::new(r"^(?:\d{1,3}(?:[,. _]\d{3})+|\d+)$")
                .map_err(|e| ConfigError::Invalid(e.to_string()))?,
        })
    }

    /// Extract the schema's fields from `document`.
    ///
    /// `attempts` is the number of fetches spent on the target, recorded in
    /// the provenance.
    pub fn normalize(
        &self,
        target_id: &str,
        document: &Document,
        attempts: u32,
    ) -> Result<CanonicalRecord, NormalizationError> {
        let html = Html::parse_document(&document.content);
        let mut fields = Fields::new();

        for field in &self.fields {
            let raw = match &field.source {
                CompiledSource::Title(selectors) => self.title(&html, selectors),
                CompiledSource::Infobox(labels) => self.infobox(&html, labels),
                CompiledSource::Section {
                    keywords,
                    max_item_len,
                } => self.section(&html, keywords, *max_item_len),
            };

            match raw.map(|r| self.convert(field, r)).transpose()?.flatten() {
                Some(value) => {
                    fields.insert(field.key.clone(), value);
                }
                None if field.required => {
                    return Err(NormalizationError::MissingField {
                        field: field.key.clone(),
                    });
                }
                None => {}
            }
        }

        Ok(CanonicalRecord {
            target_id: target_id.to_string(),
            fields,
            provenance: Provenance {
                strategy: document.strategy,
                attempts,
                source_url: document.final_url.clone(),
            },
        })
    }

    fn convert(
        &self,
        field: &CompiledField,
        raw: RawValue,
    ) -> Result<Option<FieldValue>, NormalizationError> {
        let value = match field.kind {
            FieldKind::Text => {
                let text = self.clean(&raw.text);
                (!text.is_empty()).then_some(FieldValue::Text(collapse(&raw.text)))
            }
            FieldKind::Integer => {
                let text = self.clean(&raw.text);
                if text.is_empty() {
                    return Ok(None);
                }
                let parsed = self
                    .number
                    .is_match(&text)
                    .then(|| {
                        text.chars()
                            .filter(char::is_ascii_digit)
                            .collect::<String>()
                            .parse::<i64>()
                            .ok()
                    })
                    .flatten();
                match parsed {
                    Some(n) => Some(FieldValue::Integer(n)),
                    None => {
                        return Err(NormalizationError::InvalidNumber {
                            field: field.key.clone(),
                            raw: raw.text,
                        })
                    }
                }
            }
            FieldKind::Number => {
                let text = self.clean(&raw.text);
                if text.is_empty() {
                    return Ok(None);
                }
                let stripped: String = text
                    .chars()
                    .filter(|c| !matches!(c, ',' | '_' | ' '))
                    .collect();
                match stripped.parse::<f64>() {
                    Ok(n) if n.is_finite() => Some(FieldValue::Number(n)),
                    _ => {
                        return Err(NormalizationError::InvalidNumber {
                            field: field.key.clone(),
                            raw: raw.text,
                        })
                    }
                }
            }
            FieldKind::List => {
                let items = if raw.items.is_empty() && !raw.text.is_empty() {
                    vec![collapse(&raw.text)]
                } else {
                    raw.items
                };
                (!items.is_empty()).then_some(FieldValue::List(items))
            }
        };
        Ok(value)
    }

    fn title(&self, html: &Html, selectors: &[Selector]) -> Option<RawValue> {
        selectors.iter().find_map(|sel| {
            html.select(sel)
                .map(|el| text_of(&el))
                .find(|t| !t.is_empty())
                .map(|text| RawValue {
                    text,
                    items: Vec::new(),
                })
        })
    }

    fn infobox(&self, html: &Html, labels: &[String]) -> Option<RawValue> {
        let wanted = |label: &str| {
            let key = label_key(label);
            labels.iter().any(|l| *l == key)
        };

        // Static markup: keyed infobox items.
        for item in html.select(&self.shapes.data_source) {
            let Some(source) = item.value().attr("data-source") else {
                continue;
            };
            if !wanted(source) {
                continue;
            }
            if let Some(value) = item.select(&self.shapes.pi_value).next() {
                return Some(self.raw_value(&value));
            }
        }

        // Hydrated DOM: label/value pairs without keys.
        for item in html.select(&self.shapes.pi_data) {
            let label = item.select(&self.shapes.pi_label).next().map(|l| text_of(&l));
            if !label.as_deref().is_some_and(wanted) {
                continue;
            }
            if let Some(value) = item.select(&self.shapes.pi_value).next() {
                return Some(self.raw_value(&value));
            }
        }

        // Table skin.
        for row in html.select(&self.shapes.table_row) {
            let label = row.select(&self.shapes.th).next().map(|th| text_of(&th));
            if !label.as_deref().is_some_and(wanted) {
                continue;
            }
            if let Some(value) = row.select(&self.shapes.td).next() {
                return Some(self.raw_value(&value));
            }
        }

        None
    }

    fn raw_value(&self, value: &ElementRef<'_>) -> RawValue {
        let text = text_of(value);
        let mut items: Vec<String> = value
            .select(&self.shapes.li)
            .map(|li| self.clean(&text_of(&li)))
            .collect();
        if items.is_empty() {
            // Parentheticals may span inline markup, so strip them from the
            // whole value before splitting.
            let whole = value_text(value);
            let stripped = self.parenthetical.replace_all(&whole, "");
            items = stripped.split([',', ';', '\n']).map(collapse).collect();
        }
        items.retain(|i| !i.is_empty());
        let mut seen = BTreeSet::new();
        items.retain(|i| seen.insert(i.clone()));
        RawValue { text, items }
    }

    fn section(&self, html: &Html, keywords: &[String], max_item_len: usize) -> Option<RawValue> {
        let heading = html.select(&self.shapes.headings).find(|h| {
            let text = text_of(h).to_lowercase();
            keywords.iter().any(|k| text.contains(k.as_str()))
        })?;

        // Newer MediaWiki wraps headings in `div.mw-heading`; the section
        // content is then a sibling of the wrapper.
        let anchor = heading
            .parent()
            .and_then(ElementRef::wrap)
            .filter(is_heading_wrapper)
            .unwrap_or(heading);

        let mut found = BTreeSet::new();
        let mut add = |raw: String| {
            if !raw.is_empty() && raw.chars().count() < max_item_len {
                let cleaned = self.clean(&raw);
                if !cleaned.is_empty() {
                    found.insert(cleaned);
                }
            }
        };

        for sibling in anchor.next_siblings() {
            let Some(el) = ElementRef::wrap(sibling) else {
                continue;
            };
            if matches!(el.value().name(), "h2" | "h3" | "h4") || is_heading_wrapper(&el) {
                break;
            }
            if el.value().name() == "li" {
                add(text_of(&el));
            }
            for li in el.select(&self.shapes.li) {
                add(text_of(&li));
            }
            for tr in el.select(&self.shapes.tr) {
                if let Some(cell) = tr.select(&self.shapes.cell).next() {
                    add(text_of(&cell));
                }
            }
        }

        if found.is_empty() {
            return None;
        }
        let items: Vec<String> = found.into_iter().collect();
        Some(RawValue {
            text: items.join(", "),
            items,
        })
    }

    /// Drop parentheticals and collapse whitespace.
    fn clean(&self, s: &str) -> String {
        collapse(&self.parenthetical.replace_all(s, ""))
    }
}

fn is_heading_wrapper(el: &ElementRef<'_>) -> bool {
    el.value().classes().any(|c| c == "mw-heading")
}

/// Element text with node boundaries treated as whitespace.
fn text_of(el: &ElementRef<'_>) -> String {
    collapse(&el.text().collect::<Vec<_>>().join(" "))
}

/// Text content of an infobox value with `<br>` rendered as a line break.
fn value_text(el: &ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) if e.name() == "br" => out.push('\n'),
            _ => {}
        }
    }
    out
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Labels compare case-insensitively, ignoring spaces, `_` and `-`.
fn label_key(label: &str) -> String {
    label
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}
