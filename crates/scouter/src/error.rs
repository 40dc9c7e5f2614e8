//! Error types for the pipeline.
//!
//! Fetch-layer errors are retryable and never leave a single target's
//! attempt sequence. Normalization errors end a target. Sink errors are the
//! only ones that reach the orchestrator boundary.

use serde::{Deserialize, Serialize};

/// Coarse classification of a fetch failure, kept in attempt records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Network,
    Http,
    Render,
}

/// What went wrong inside the browser strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderFailure {
    /// No browser context could be acquired.
    Session,
    /// Navigation failed or timed out.
    Navigation,
    /// The ready condition was not met in time.
    NotReady,
    /// The rendered DOM could not be read back.
    Extract,
}

/// A failed fetch attempt. Every variant is retryable by the escalation policy.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network {
        url: String,
        message: String,
        timed_out: bool,
    },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("render error ({failure:?}) for {url}: {message}")]
    Render {
        url: String,
        failure: RenderFailure,
        message: String,
    },
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Network { .. } => FetchErrorKind::Network,
            FetchError::Http { .. } => FetchErrorKind::Http,
            FetchError::Render { .. } => FetchErrorKind::Render,
        }
    }

    pub(crate) fn render(url: &str, failure: RenderFailure, err: impl std::fmt::Display) -> Self {
        FetchError::Render {
            url: url.to_string(),
            failure,
            message: format!("{err:#}"),
        }
    }
}

/// A usable document whose fields could not be extracted.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("required field '{field}' not found")]
    MissingField { field: String },

    #[error("field '{field}' expected a number, found '{raw}'")]
    InvalidNumber { field: String, raw: String },
}

/// Failure to hand a record to the external sink.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink is closed")]
    Closed,

    #[error("sink backend error: {0}")]
    Backend(String),
}

/// Problems building the target catalog.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("duplicate target id '{0}'")]
    DuplicateId(String),

    #[error("empty target id")]
    EmptyId,

    #[error("cannot resolve URL for '{id}': {message}")]
    InvalidUrl { id: String, message: String },
}

/// Invalid pipeline configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kind() {
        let err = FetchError::Http {
            url: "https://example.com/wiki/Goku".into(),
            status: 503,
        };
        assert_eq!(err.kind(), FetchErrorKind::Http);
        assert_eq!(err.to_string(), "HTTP 503 from https://example.com/wiki/Goku");
    }

    #[test]
    fn test_render_helper_keeps_chain() {
        let cause = anyhow::anyhow!("socket closed").context("navigation failed");
        let err = FetchError::render("https://x/y", RenderFailure::Navigation, cause);
        match err {
            FetchError::Render {
                failure, message, ..
            } => {
                assert_eq!(failure, RenderFailure::Navigation);
                assert!(message.contains("navigation failed"));
                assert!(message.contains("socket closed"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
