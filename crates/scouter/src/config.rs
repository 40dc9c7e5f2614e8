//! Pipeline configuration.
//!
//! One value built by the caller and handed to the orchestrator and the
//! fetchers at construction. Every field has a default, so a config file
//! only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::acquisition::http::DEFAULT_USER_AGENT;
use crate::acquisition::{ReadyCondition, RenderConfig};
use crate::catalog::UrlResolver;
use crate::detect::{DegradationDetector, DetectorConfig};
use crate::error::{CatalogError, ConfigError};
use crate::normalize::{default_schema, FieldSpec, Normalizer};
use crate::policy::{BackoffConfig, RetryBudget};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub base_url: String,
    /// Path or URL with an `{id}` placeholder, used for entries without a location.
    pub url_template: String,
    pub user_agent: String,
    pub request_timeout_ms: u64,
    /// Targets processed at the same time.
    pub concurrency: usize,
    pub budget: RetryBudget,
    pub backoff: BackoffConfig,
    pub render: RenderConfig,
    pub detector: DetectorConfig,
    pub schema: Vec<FieldSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dragonball.fandom.com/".to_string(),
            url_template: "wiki/{id}".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_ms: 20_000,
            concurrency: 4,
            budget: RetryBudget::default(),
            backoff: BackoffConfig::default(),
            render: RenderConfig::default(),
            detector: DetectorConfig::default(),
            schema: default_schema(),
        }
    }
}

impl PipelineConfig {
    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.budget.total() == 0 {
            return Err(ConfigError::Invalid(
                "retry budget allows no attempts at all".into(),
            ));
        }
        if self.backoff.base_ms > self.backoff.max_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff base_ms ({}) exceeds max_ms ({})",
                self.backoff.base_ms, self.backoff.max_ms
            )));
        }
        if self.request_timeout_ms == 0 || self.render.navigation_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if let ReadyCondition::Selector { selector, .. } = &self.render.ready {
            scraper::Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
                selector: selector.clone(),
                message: format!("{e:?}"),
            })?;
        }
        self.resolver()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.detector()?;
        self.normalizer()?;
        Ok(())
    }

    pub fn resolver(&self) -> Result<UrlResolver, CatalogError> {
        UrlResolver::new(&self.base_url, &self.url_template)
    }

    pub fn detector(&self) -> Result<DegradationDetector, ConfigError> {
        DegradationDetector::new(&self.detector)
    }

    pub fn normalizer(&self) -> Result<Normalizer, ConfigError> {
        Normalizer::new(&self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"concurrency": 8, "budget": {"max_render_attempts": 1}, "render": {"headless": false}}"#,
        )
        .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.budget.max_light_attempts, 2);
        assert_eq!(config.budget.max_render_attempts, 1);
        assert!(!config.render.headless);
        assert_eq!(config.schema.len(), default_schema().len());
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero = PipelineConfig {
            concurrency: 0,
            ..PipelineConfig::default()
        };
        assert!(zero.validate().is_err());

        let mut no_budget = PipelineConfig::default();
        no_budget.budget = RetryBudget {
            max_light_attempts: 0,
            max_render_attempts: 0,
        };
        assert!(no_budget.validate().is_err());

        let mut backoff = PipelineConfig::default();
        backoff.backoff.base_ms = 10_000;
        assert!(backoff.validate().is_err());

        let mut empty_schema = PipelineConfig::default();
        empty_schema.schema.clear();
        assert!(empty_schema.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_selector() {
        let mut config = PipelineConfig::default();
        config.detector.required_regions = vec!["div[".into()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSelector { .. })
        ));
    }
}
