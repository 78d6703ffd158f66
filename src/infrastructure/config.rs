//! Application configuration loading
//!
//! A single JSON config file, resolved under the platform config directory,
//! with safe defaults for every field. Job-level overrides are validated
//! separately by `application::config`; this file only carries ambient
//! defaults (delays, timeouts, pricing, logging).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

/// Upstream call pacing and pricing defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingSettings {
    /// Delay between consecutive item calls, in milliseconds.
    pub request_delay_ms: u64,
    /// Hard timeout for one upstream call, in seconds.
    pub call_timeout_seconds: u64,
    /// Per-second success budget before the inter-batch cool-down kicks in.
    pub rate_limit_per_sec: u32,
    pub user_agent: String,
    pub unit_price_usd: f64,
}

impl Default for ScrapingSettings {
    fn default() -> Self {
        Self {
            request_delay_ms: 500,
            call_timeout_seconds: 30,
            rate_limit_per_sec: 5,
            user_agent: "cloneflow/0.3".to_string(),
            unit_price_usd: 0.001,
        }
    }
}

/// Default bulk-job parameters applied when a request omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    pub batch_size: u32,
    pub max_concurrency: u32,
    pub cost_limit_usd: f64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrency: 2,
            cost_limit_usd: 10.0,
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// tracing filter directive, e.g. "info" or "cloneflow=debug".
    pub level: String,
    pub file_enabled: bool,
    /// Log directory; defaults next to the config file when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            directory: None,
        }
    }
}

/// Complete ambient configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraping: ScrapingSettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Platform config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cloneflow")
            .join("config.json")
    }

    /// Load from `path`, falling back to defaults when the file is missing.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Persist to `path`, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, raw)
            .await
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.scraping.request_delay_ms, 500);
        assert_eq!(config.batch.batch_size, 10);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.scraping.request_delay_ms = 1234;
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded.scraping.request_delay_ms, 1234);
    }

    #[tokio::test]
    async fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"batch":{"batch_size":25,"max_concurrency":4,"cost_limit_usd":1.0}}"#)
            .await
            .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.batch.batch_size, 25);
        assert_eq!(config.scraping.call_timeout_seconds, 30);
    }
}
