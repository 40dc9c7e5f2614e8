//! Chromium backend over the DevTools protocol (chromiumoxide).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{Navigation, RenderContext, Renderer};

/// Environment variable naming a Chromium binary.
pub const CHROMIUM_ENV: &str = "SCOUTER_CHROMIUM_PATH";

const PATH_NAMES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

const MACOS_APPS: &[&str] = &[
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
];

/// Locate a Chromium binary: `$SCOUTER_CHROMIUM_PATH`, a download under
/// `~/.cache/scouter/chromium`, then `PATH`, then the usual macOS bundles.
pub fn find_chromium() -> Option<PathBuf> {
    let from_env = std::env::var_os(CHROMIUM_ENV).map(PathBuf::from);
    let downloaded = dirs::cache_dir().map(|cache| {
        let dir = cache.join("scouter").join("chromium");
        if cfg!(target_os = "macos") {
            dir.join("Chromium.app/Contents/MacOS/Chromium")
        } else {
            dir.join("chrome")
        }
    });

    from_env
        .into_iter()
        .chain(downloaded)
        .find(|p| p.is_file())
        .or_else(|| PATH_NAMES.iter().find_map(|name| which::which(name).ok()))
        .or_else(|| {
            cfg!(target_os = "macos")
                .then(|| MACOS_APPS.iter().map(PathBuf::from).find(|p| p.is_file()))
                .flatten()
        })
}

/// A launched Chromium process and its protocol event loop.
pub struct ChromiumRenderer {
    browser: Browser,
    events: JoinHandle<()>,
    open: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Start Chromium. `executable` skips [`find_chromium`].
    pub async fn launch(headless: bool, executable: Option<&Path>) -> Result<Self> {
        let executable = match executable {
            Some(path) => path.to_path_buf(),
            None => find_chromium().with_context(|| {
                format!("no Chromium binary found; set {CHROMIUM_ENV} or render.chromium_path")
            })?,
        };

        let mut config = BrowserConfig::builder()
            .chrome_executable(&executable)
            .args(["--no-sandbox", "--disable-gpu", "--disable-dev-shm-usage", "--mute-audio"]);
        if !headless {
            config = config.with_head();
        }
        let config = config
            .build()
            .map_err(|e| anyhow::anyhow!("invalid browser configuration: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .with_context(|| format!("failed to start {}", executable.display()))?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("devtools event error: {e}");
                }
            }
        });

        tracing::info!(
            "browser started: {} (headless={headless})",
            executable.display()
        );
        Ok(Self {
            browser,
            events,
            open: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to open a browser tab")?;
        self.open.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(ChromiumTab {
            page,
            open: Arc::clone(&self.open),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // The process exits with the `Browser` handle; stopping the event
        // loop releases the websocket immediately.
        self.events.abort();
        tracing::debug!("browser shut down ({} tabs still open)", self.open_contexts());
        Ok(())
    }

    fn open_contexts(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }
}

/// One Chromium tab.
pub struct ChromiumTab {
    page: Page,
    open: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for ChromiumTab {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<Navigation> {
        let started = Instant::now();
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| anyhow::anyhow!("page load exceeded {}ms", timeout.as_millis()))?
            .with_context(|| format!("failed to load {url}"))?;

        let final_url = match self.page.url().await {
            Ok(Some(current)) => current,
            _ => url.to_string(),
        };
        Ok(Navigation {
            final_url,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        self.page
            .evaluate(expression)
            .await
            .context("script evaluation failed")?
            .into_value()
            .map_err(|e| anyhow::anyhow!("script result is not JSON: {e:?}"))
    }

    async fn outer_html(&self) -> Result<String> {
        self.page.content().await.context("failed to read page markup")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.open.fetch_sub(1, Ordering::Relaxed);
        self.page.close().await.context("failed to close tab")
    }
}
