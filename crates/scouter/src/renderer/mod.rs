//! Browser seam for the render strategy.
//!
//! A [`Renderer`] opens page contexts; a [`RenderContext`] is one page that
//! can be pointed at a URL, queried with scripts and read back as markup.
//! Render attempts never talk to a renderer directly, they borrow contexts
//! through the [`SessionPool`].

pub mod chromium;
pub mod pool;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use pool::{SessionLease, SessionPool};

/// Where a navigation ended up and how long it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub final_url: String,
    pub elapsed_ms: u64,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>>;
    async fn shutdown(&self) -> Result<()>;
    /// Contexts opened and not yet closed.
    fn open_contexts(&self) -> usize;
}

/// One browser page, owned by a single render attempt at a time.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Load `url`, failing if the load does not finish within `timeout`.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<Navigation>;

    /// Evaluate a script expression in the page and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    /// Serialized DOM of the page as it is now.
    async fn outer_html(&self) -> Result<String> {
        match self.evaluate("document.documentElement.outerHTML").await? {
            serde_json::Value::String(html) => Ok(html),
            other => anyhow::bail!("page returned non-string markup: {other}"),
        }
    }

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Renderer used when no browser could be started. Every context request
/// fails, so render attempts end in a session error while lightweight
/// fetches keep working.
#[derive(Debug, Clone)]
pub struct NoopRenderer {
    reason: String,
}

impl NoopRenderer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Renderer for NoopRenderer {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>> {
        anyhow::bail!("no browser available: {}", self.reason)
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn open_contexts(&self) -> usize {
        0
    }
}
