//! Browser session pool with scoped leases.
//!
//! A [`SessionLease`] owns one context for the duration of one render
//! attempt. `release` hands a healthy context back for reuse, `discard`
//! closes it, and dropping an unreleased lease (error path, cancelled
//! future) closes it in the background. A context is never visible to two
//! attempts at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use super::{RenderContext, Renderer};

/// Pool of idle browser contexts on top of a [`Renderer`].
pub struct SessionPool {
    renderer: Arc<dyn Renderer>,
    idle: Mutex<Vec<Box<dyn RenderContext>>>,
    max_idle: usize,
    leased: AtomicUsize,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("idle", &self.idle_count())
            .field("leased", &self.leased())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

impl SessionPool {
    pub fn new(renderer: Arc<dyn Renderer>, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            renderer,
            idle: Mutex::new(Vec::new()),
            max_idle,
            leased: AtomicUsize::new(0),
        })
    }

    /// Take an idle context or open a new one.
    pub async fn acquire(self: &Arc<Self>) -> Result<SessionLease> {
        let reused = self.lock_idle().pop();
        let context = match reused {
            Some(ctx) => ctx,
            None => self.renderer.open_context().await?,
        };
        self.leased.fetch_add(1, Ordering::Relaxed);
        Ok(SessionLease {
            context: Some(context),
            pool: Arc::clone(self),
        })
    }

    /// Contexts currently held by leases.
    pub fn leased(&self) -> usize {
        self.leased.load(Ordering::Relaxed)
    }

    /// Contexts waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    /// Close idle contexts and shut the renderer down.
    pub async fn shutdown(&self) -> Result<()> {
        let idle: Vec<_> = std::mem::take(&mut *self.lock_idle());
        for ctx in idle {
            if let Err(e) = ctx.close().await {
                tracing::debug!("closing idle browser context failed: {e:#}");
            }
        }
        self.renderer.shutdown().await
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn RenderContext>>> {
        // A poisoned lock only means another thread panicked mid-push; the
        // vector itself is still valid.
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn give_back(&self, ctx: Box<dyn RenderContext>) {
        self.leased.fetch_sub(1, Ordering::Relaxed);
        let overflow = {
            let mut idle = self.lock_idle();
            if idle.len() < self.max_idle {
                idle.push(ctx);
                None
            } else {
                Some(ctx)
            }
        };
        if let Some(ctx) = overflow {
            let _ = ctx.close().await;
        }
    }
}

/// Exclusive use of one browser context.
pub struct SessionLease {
    context: Option<Box<dyn RenderContext>>,
    pool: Arc<SessionPool>,
}

impl SessionLease {
    pub fn context(&mut self) -> Result<&mut dyn RenderContext> {
        match self.context.as_deref_mut() {
            Some(ctx) => Ok(ctx),
            None => anyhow::bail!("browser context already returned"),
        }
    }

    /// Return the context to the pool for reuse.
    pub async fn release(mut self) {
        if let Some(ctx) = self.context.take() {
            self.pool.give_back(ctx).await;
        }
    }

    /// Close the context instead of reusing it.
    pub async fn discard(mut self) {
        if let Some(ctx) = self.context.take() {
            self.pool.leased.fetch_sub(1, Ordering::Relaxed);
            if let Err(e) = ctx.close().await {
                tracing::debug!("closing browser context failed: {e:#}");
            }
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(ctx) = self.context.take() else {
            return;
        };
        self.pool.leased.fetch_sub(1, Ordering::Relaxed);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = ctx.close().await;
                });
            }
            Err(_) => tracing::warn!("browser context dropped outside a runtime; not closed"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory renderer for exercising the pool and render fetcher.

    use super::super::Navigation;
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    pub struct FakeRenderer {
        pub opened: AtomicUsize,
        pub closed: Arc<AtomicUsize>,
        pub html: Mutex<String>,
        pub fail_navigation: std::sync::atomic::AtomicBool,
    }

    pub struct FakeContext {
        html: String,
        fail_navigation: bool,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn open_context(&self) -> Result<Box<dyn RenderContext>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeContext {
                html: self.html.lock().unwrap().clone(),
                fail_navigation: self.fail_navigation.load(Ordering::SeqCst),
                closed: Arc::clone(&self.closed),
            }))
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
        fn open_contexts(&self) -> usize {
            self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RenderContext for FakeContext {
        async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<Navigation> {
            if self.fail_navigation {
                anyhow::bail!("net::ERR_NAME_NOT_RESOLVED");
            }
            Ok(Navigation {
                final_url: url.to_string(),
                elapsed_ms: 1,
            })
        }
        async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
            if script.contains("querySelector") {
                // Selector checks see the page as ready once it has markup.
                return Ok(serde_json::json!(!self.html.is_empty()));
            }
            Ok(serde_json::json!(self.html.len()))
        }
        async fn outer_html(&self) -> Result<String> {
            Ok(self.html.clone())
        }
        async fn close(self: Box<Self>) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
