//! Fetch strategies behind one interface.
//!
//! The escalation policy picks a [`Strategy`]; the orchestrator looks up
//! the matching [`Fetcher`] and never inspects how it works.

pub mod http;
pub mod render;

use async_trait::async_trait;

use crate::catalog::Target;
use crate::document::{Document, Strategy};
use crate::error::FetchError;

pub use http::LightweightFetcher;
pub use render::{ReadyCondition, RenderConfig, RenderFetcher};

/// A way of turning a target into a document.
///
/// Implementations make exactly one attempt per call; retries belong to
/// the escalation policy.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Which strategy this fetcher implements.
    fn strategy(&self) -> Strategy;

    /// Fetch `target` once.
    async fn fetch(&self, target: &Target) -> Result<Document, FetchError>;
}
