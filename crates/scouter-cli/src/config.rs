//! Configuration loading and resolution.
//!
//! Precedence, lowest first: built-in defaults, the JSON config file,
//! `SCOUTER_*` environment variables, command-line flags (applied by the
//! caller).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use scouter::PipelineConfig;

/// Config file used when neither `--config` nor `SCOUTER_CONFIG` is given.
pub const DEFAULT_CONFIG_FILE: &str = "scouter.json";

/// Resolve the config file path, if any.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var("SCOUTER_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let cwd = PathBuf::from(DEFAULT_CONFIG_FILE);
    cwd.exists().then_some(cwd)
}

/// Load the effective pipeline configuration from file and environment.
pub fn load(explicit: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match resolve_config_path(explicit) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: PipelineConfig = serde_json::from_str(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            tracing::debug!("loaded config from {}", path.display());
            config
        }
        None => PipelineConfig::default(),
    };
    apply_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Apply `SCOUTER_*` overrides read through `var`.
pub fn apply_env(config: &mut PipelineConfig, var: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(v) = var("SCOUTER_BASE_URL") {
        config.base_url = v;
    }
    if let Some(v) = var("SCOUTER_URL_TEMPLATE") {
        config.url_template = v;
    }
    if let Some(v) = var("SCOUTER_USER_AGENT") {
        config.user_agent = v;
    }
    if let Some(v) = var("SCOUTER_CONCURRENCY") {
        config.concurrency = parse_number("SCOUTER_CONCURRENCY", &v)?;
    }
    if let Some(v) = var("SCOUTER_TIMEOUT_MS") {
        config.request_timeout_ms = parse_number("SCOUTER_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = var("SCOUTER_MAX_LIGHT_ATTEMPTS") {
        config.budget.max_light_attempts = parse_number("SCOUTER_MAX_LIGHT_ATTEMPTS", &v)?;
    }
    if let Some(v) = var("SCOUTER_MAX_RENDER_ATTEMPTS") {
        config.budget.max_render_attempts = parse_number("SCOUTER_MAX_RENDER_ATTEMPTS", &v)?;
    }
    if let Some(v) = var("SCOUTER_HEADLESS") {
        config.render.headless = parse_bool("SCOUTER_HEADLESS", &v)?;
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{key} must be a non-negative integer, got '{value}'"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{key} must be a boolean, got '{value}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PipelineConfig::default();
        apply_env(
            &mut config,
            vars(&[
                ("SCOUTER_CONCURRENCY", "8"),
                ("SCOUTER_MAX_RENDER_ATTEMPTS", "1"),
                ("SCOUTER_HEADLESS", "false"),
                ("SCOUTER_BASE_URL", "https://dbz.example.org/"),
            ]),
        )
        .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.budget.max_render_attempts, 1);
        assert_eq!(config.budget.max_light_attempts, 2);
        assert!(!config.render.headless);
        assert_eq!(config.base_url, "https://dbz.example.org/");
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = PipelineConfig::default();
        assert!(apply_env(&mut config, vars(&[("SCOUTER_CONCURRENCY", "lots")])).is_err());
        assert!(apply_env(&mut config, vars(&[("SCOUTER_HEADLESS", "maybe")])).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scouter.json");
        std::fs::write(
            &path,
            r#"{"concurrency": 2, "render": {"ready": {"kind": "settle", "millis": 750}}}"#,
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(
            config.render.ready,
            scouter::ReadyCondition::Settle { millis: 750 }
        );
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("absent.json"))).is_err());
    }
}
