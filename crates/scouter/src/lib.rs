//! Scouter: fetch orchestration for wiki character pages.
//!
//! Each target is fetched with a plain HTTP request first and escalated to
//! a headless browser when the result looks degraded. Whichever strategy
//! wins, the page is normalized into one [`CanonicalRecord`] shape and
//! handed to a [`RecordSink`]. The [`Orchestrator`] runs a whole
//! [`TargetCatalog`] under a concurrency cap and returns a [`RunReport`].

pub mod acquisition;
pub mod catalog;
pub mod config;
pub mod detect;
pub mod document;
pub mod error;
pub mod events;
pub mod normalize;
pub mod orchestrator;
pub mod policy;
pub mod record;
pub mod renderer;
pub mod report;
pub mod sink;

pub use acquisition::{Fetcher, LightweightFetcher, ReadyCondition, RenderConfig, RenderFetcher};
pub use catalog::{CatalogEntry, Target, TargetCatalog, TargetHints, UrlResolver};
pub use config::PipelineConfig;
pub use detect::{DegradationDetector, DegradationReason, DegradationVerdict, DetectorConfig};
pub use document::{Document, Strategy};
pub use error::{CatalogError, ConfigError, FetchError, NormalizationError, SinkError};
pub use normalize::{FieldSource, FieldSpec, Normalizer};
pub use orchestrator::Orchestrator;
pub use policy::{BackoffConfig, RetryBudget};
pub use record::{CanonicalRecord, FieldKind, FieldValue};
pub use report::{FailureReason, HaltReason, Outcome, RunReport, RunSummary, TargetReport};
pub use sink::{ChannelSink, JsonLinesSink, MemorySink, RecordSink};
