//! Render strategy: navigate a pooled browser context and read back the
//! final DOM once the page is ready.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::Fetcher;
use crate::catalog::Target;
use crate::document::{Document, Strategy};
use crate::error::{FetchError, RenderFailure};
use crate::renderer::{RenderContext, SessionPool};

const DOM_LENGTH_JS: &str =
    "document.documentElement ? document.documentElement.outerHTML.length : 0";

/// When a navigated page counts as rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadyCondition {
    /// Wait a fixed time after navigation.
    Settle { millis: u64 },
    /// Poll the DOM size until it stops changing for `stable_polls` polls.
    DomStable {
        poll_ms: u64,
        stable_polls: u32,
        max_wait_ms: u64,
    },
    /// Wait for an element matching `selector` to appear.
    Selector { selector: String, max_wait_ms: u64 },
}

impl Default for ReadyCondition {
    fn default() -> Self {
        ReadyCondition::DomStable {
            poll_ms: 500,
            stable_polls: 3,
            max_wait_ms: 15_000,
        }
    }
}

/// Browser strategy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub headless: bool,
    pub navigation_timeout_ms: u64,
    pub ready: ReadyCondition,
    /// Idle browser contexts kept for reuse.
    pub max_idle_sessions: usize,
    /// Chromium binary; discovered when unset.
    pub chromium_path: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            headless: true,
            navigation_timeout_ms: 45_000,
            ready: ReadyCondition::default(),
            max_idle_sessions: 4,
            chromium_path: None,
        }
    }
}

/// Fetcher that renders pages in a browser context from a [`SessionPool`].
pub struct RenderFetcher {
    pool: Arc<SessionPool>,
    config: RenderConfig,
}

impl RenderFetcher {
    pub fn new(pool: Arc<SessionPool>, config: RenderConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    async fn wait_ready(&self, ctx: &dyn RenderContext, url: &str) -> Result<(), FetchError> {
        match &self.config.ready {
            ReadyCondition::Settle { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
                Ok(())
            }
            ReadyCondition::DomStable {
                poll_ms,
                stable_polls,
                max_wait_ms,
            } => {
                let deadline = Instant::now() + Duration::from_millis(*max_wait_ms);
                let mut last = None;
                let mut stable = 0u32;
                loop {
                    let len = ctx
                        .evaluate(DOM_LENGTH_JS)
                        .await
                        .map_err(|e| FetchError::render(url, RenderFailure::NotReady, e))?
                        .as_u64();
                    if len.is_some() && len == last {
                        stable += 1;
                        if stable >= *stable_polls {
                            return Ok(());
                        }
                    } else {
                        stable = 0;
                        last = len;
                    }
                    if Instant::now() >= deadline {
                        return Err(FetchError::render(
                            url,
                            RenderFailure::NotReady,
                            format!("DOM still changing after {max_wait_ms}ms"),
                        ));
                    }
                    tokio::time::sleep(Duration::from_millis(*poll_ms)).await;
                }
            }
            ReadyCondition::Selector {
                selector,
                max_wait_ms,
            } => {
                let selector_js = serde_json::to_string(selector)
                    .map_err(|e| FetchError::render(url, RenderFailure::NotReady, e))?;
                let script = format!("document.querySelector({selector_js}) !== null");
                let deadline = Instant::now() + Duration::from_millis(*max_wait_ms);
                loop {
                    let found = ctx
                        .evaluate(&script)
                        .await
                        .map_err(|e| FetchError::render(url, RenderFailure::NotReady, e))?;
                    if found.as_bool() == Some(true) {
                        return Ok(());
                    }
                    if Instant::now() >= deadline {
                        return Err(FetchError::render(
                            url,
                            RenderFailure::NotReady,
                            format!("'{selector}' did not appear within {max_wait_ms}ms"),
                        ));
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn render(&self, ctx: &mut dyn RenderContext, url: &str) -> Result<Document, FetchError> {
        let nav = ctx
            .goto(url, Duration::from_millis(self.config.navigation_timeout_ms))
            .await
            .map_err(|e| FetchError::render(url, RenderFailure::Navigation, e))?;

        self.wait_ready(ctx, url).await?;

        let content = ctx
            .outer_html()
            .await
            .map_err(|e| FetchError::render(url, RenderFailure::Extract, e))?;

        tracing::debug!(
            "rendered {url} ({} bytes, navigation {}ms)",
            content.len(),
            nav.elapsed_ms
        );

        Ok(Document::new(content, Strategy::Render, nav.final_url))
    }
}

#[async_trait]
impl Fetcher for RenderFetcher {
    fn strategy(&self) -> Strategy {
        Strategy::Render
    }

    async fn fetch(&self, target: &Target) -> Result<Document, FetchError> {
        let mut lease = self
            .pool
            .acquire()
            .await
            .map_err(|e| FetchError::render(&target.url, RenderFailure::Session, e))?;

        // A cancelled fetch drops the lease, which closes the context.
        let rendered = match lease.context() {
            Ok(ctx) => self.render(ctx, &target.url).await,
            Err(e) => Err(FetchError::render(&target.url, RenderFailure::Session, e)),
        };
        match rendered {
            Ok(doc) => {
                lease.release().await;
                Ok(doc)
            }
            Err(e) => {
                lease.discard().await;
                Err(e)
            }
        }
    }
}
