//! Fetched documents and the strategy that produced them.

use serde::{Deserialize, Serialize};

/// A fetch implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Direct HTTP request, no script execution.
    Lightweight,
    /// Full browser navigation and DOM rendering.
    Render,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Lightweight => f.write_str("lightweight"),
            Strategy::Render => f.write_str("render"),
        }
    }
}

/// Raw markup returned by one fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub strategy: Strategy,
    /// URL after redirects.
    pub final_url: String,
    /// HTTP status when known (the browser strategy reports 200 on success).
    pub status: u16,
}

impl Document {
    pub fn new(
        content: impl Into<String>,
        strategy: Strategy,
        final_url: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            strategy,
            final_url: final_url.into(),
            status: 200,
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// No content beyond whitespace.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}
