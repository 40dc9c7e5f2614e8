//! Target catalog: the ordered set of pages a run will fetch.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CatalogError;

/// Optional per-target knowledge supplied by the catalog loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHints {
    /// The page is known to need script execution; skip the lightweight strategy.
    #[serde(default)]
    pub known_dynamic: bool,
}

/// One page to fetch, identified uniquely within its catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub hints: TargetHints,
}

/// An unresolved catalog entry: an id plus an optional location.
///
/// The location may be an absolute URL or a path relative to the base URL.
/// When absent, the URL template is applied to the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(default, alias = "url")]
    pub path: Option<String>,
    #[serde(default)]
    pub dynamic: bool,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, path: Option<&str>) -> Self {
        Self {
            id: id.into(),
            path: path.map(str::to_string),
            dynamic: false,
        }
    }
}

/// Resolves catalog locations against a base URL.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    base: Url,
    template: String,
}

impl UrlResolver {
    /// `template` is a path or URL containing `{id}`, e.g. `wiki/{id}`.
    pub fn new(base_url: &str, template: &str) -> Result<Self, CatalogError> {
        let base = Url::parse(base_url).map_err(|e| CatalogError::InvalidUrl {
            id: String::new(),
            message: format!("base URL '{base_url}': {e}"),
        })?;
        Ok(Self {
            base,
            template: template.to_string(),
        })
    }

    /// Absolute locations pass through; relative ones join the base URL.
    pub fn resolve(&self, id: &str, location: Option<&str>) -> Result<String, CatalogError> {
        let location = match location.map(str::trim).filter(|l| !l.is_empty()) {
            Some(l) => l.to_string(),
            None => self.template.replace("{id}", id),
        };
        if location.starts_with("http://") || location.starts_with("https://") {
            return Url::parse(&location)
                .map(|u| u.to_string())
                .map_err(|e| CatalogError::InvalidUrl {
                    id: id.to_string(),
                    message: e.to_string(),
                });
        }
        self.base
            .join(&location)
            .map(|u| u.to_string())
            .map_err(|e| CatalogError::InvalidUrl {
                id: id.to_string(),
                message: e.to_string(),
            })
    }
}

/// Ordered, id-unique collection of targets.
#[derive(Debug, Clone, Default)]
pub struct TargetCatalog {
    targets: Vec<Target>,
}

impl TargetCatalog {
    /// Build a catalog from already-resolved targets.
    pub fn new(targets: Vec<Target>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for t in &targets {
            if t.id.trim().is_empty() {
                return Err(CatalogError::EmptyId);
            }
            if !seen.insert(t.id.as_str()) {
                return Err(CatalogError::DuplicateId(t.id.clone()));
            }
        }
        Ok(Self { targets })
    }

    /// Resolve entries against `resolver`, keeping their order.
    pub fn resolve(
        entries: impl IntoIterator<Item = CatalogEntry>,
        resolver: &UrlResolver,
    ) -> Result<Self, CatalogError> {
        let targets = entries
            .into_iter()
            .map(|entry| {
                let id = entry.id.trim().to_string();
                let url = resolver.resolve(&id, entry.path.as_deref())?;
                Ok(Target {
                    id,
                    url,
                    hints: TargetHints {
                        known_dynamic: entry.dynamic,
                    },
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        Self::new(targets)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl<'a> IntoIterator for &'a TargetCatalog {
    type Item = &'a Target;
    type IntoIter = std::slice::Iter<'a, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}
