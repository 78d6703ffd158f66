//! Bulk-job request validation
//!
//! A [`BulkJobRequest`] arrives with optional overrides; missing fields are
//! filled from [`AppConfig`] defaults and everything is validated against
//! hard bounds. Invalid explicit values fail fast with a descriptive error
//! instead of being silently clamped.

use serde::{Deserialize, Serialize};

use crate::domain::session::{JobPriority, SessionConfig, WorkType};
use crate::infrastructure::config::AppConfig;

pub const MIN_BATCH_SIZE: u32 = 1;
pub const MAX_BATCH_SIZE: u32 = 50;
pub const MIN_CONCURRENCY: u32 = 1;
pub const MAX_CONCURRENCY: u32 = 10;
pub const MIN_COST_LIMIT_USD: f64 = 0.01;
pub const MAX_COST_LIMIT_USD: f64 = 100.0;

/// Raw job request as it arrives over the bulk-job surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkJobRequest {
    /// One of the known work-type names, e.g. "profile_snapshot".
    pub work_type: String,
    pub account_ids: Vec<String>,
    pub batch_size: Option<u32>,
    pub max_concurrency: Option<u32>,
    pub cost_limit_usd: Option<f64>,
    pub priority: Option<JobPriority>,
    pub rate_limit_per_sec: Option<u32>,
    pub trigger: Option<String>,
}

impl BulkJobRequest {
    pub fn new(work_type: &str, account_ids: Vec<String>) -> Self {
        Self {
            work_type: work_type.to_string(),
            account_ids,
            batch_size: None,
            max_concurrency: None,
            cost_limit_usd: None,
            priority: None,
            rate_limit_per_sec: None,
            trigger: None,
        }
    }
}

/// Validation failures for a bulk-job request.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("batch_size {0} out of range ({MIN_BATCH_SIZE}-{MAX_BATCH_SIZE})")]
    BatchSize(u32),

    #[error("max_concurrency {0} out of range ({MIN_CONCURRENCY}-{MAX_CONCURRENCY})")]
    Concurrency(u32),

    #[error("cost_limit_usd {0} out of range (${MIN_COST_LIMIT_USD}-${MAX_COST_LIMIT_USD})")]
    CostLimit(f64),

    #[error("{0}")]
    WorkType(String),

    #[error("no target accounts provided")]
    NoTargets,
}

/// A fully validated, default-filled job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedBulkConfig {
    pub work_type: WorkType,
    pub account_ids: Vec<String>,
    pub batch_size: u32,
    pub max_concurrency: u32,
    pub cost_limit_usd: f64,
    pub priority: JobPriority,
    pub rate_limit_per_sec: u32,
    pub trigger: Option<String>,
}

impl ValidatedBulkConfig {
    /// Validate a request, filling gaps from the ambient configuration.
    pub fn from_request(request: BulkJobRequest, app: &AppConfig) -> Result<Self, ConfigError> {
        let work_type: WorkType = request.work_type.parse().map_err(ConfigError::WorkType)?;

        if request.account_ids.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let batch_size = request.batch_size.unwrap_or(app.batch.batch_size);
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(ConfigError::BatchSize(batch_size));
        }

        let max_concurrency = request.max_concurrency.unwrap_or(app.batch.max_concurrency);
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrency) {
            return Err(ConfigError::Concurrency(max_concurrency));
        }

        let cost_limit_usd = request.cost_limit_usd.unwrap_or(app.batch.cost_limit_usd);
        if !(MIN_COST_LIMIT_USD..=MAX_COST_LIMIT_USD).contains(&cost_limit_usd) {
            return Err(ConfigError::CostLimit(cost_limit_usd));
        }

        Ok(Self {
            work_type,
            account_ids: request.account_ids,
            batch_size,
            max_concurrency,
            cost_limit_usd,
            priority: request.priority.unwrap_or_default(),
            rate_limit_per_sec: request
                .rate_limit_per_sec
                .unwrap_or(app.scraping.rate_limit_per_sec),
            trigger: request.trigger,
        })
    }

    /// The configuration snapshot stored on the session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            batch_size: self.batch_size,
            max_concurrency: self.max_concurrency,
            cost_limit_usd: self.cost_limit_usd,
            priority: self.priority,
            rate_limit_per_sec: self.rate_limit_per_sec,
            trigger: self.trigger.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request() -> BulkJobRequest {
        BulkJobRequest::new("profile_snapshot", vec!["a".into(), "b".into()])
    }

    #[test]
    fn defaults_fill_in_from_app_config() {
        let app = AppConfig::default();
        let config = ValidatedBulkConfig::from_request(request(), &app).unwrap();
        assert_eq!(config.batch_size, app.batch.batch_size);
        assert_eq!(config.max_concurrency, app.batch.max_concurrency);
        assert_eq!(config.work_type, WorkType::ProfileSnapshot);
    }

    #[rstest]
    #[case(0)]
    #[case(51)]
    fn batch_size_bounds_are_enforced(#[case] batch_size: u32) {
        let mut req = request();
        req.batch_size = Some(batch_size);
        let err = ValidatedBulkConfig::from_request(req, &AppConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::BatchSize(_)));
    }

    #[rstest]
    #[case(0)]
    #[case(11)]
    fn concurrency_bounds_are_enforced(#[case] concurrency: u32) {
        let mut req = request();
        req.max_concurrency = Some(concurrency);
        let err = ValidatedBulkConfig::from_request(req, &AppConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Concurrency(_)));
    }

    #[rstest]
    #[case(0.005)]
    #[case(150.0)]
    fn cost_limit_bounds_are_enforced(#[case] limit: f64) {
        let mut req = request();
        req.cost_limit_usd = Some(limit);
        let err = ValidatedBulkConfig::from_request(req, &AppConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::CostLimit(_)));
    }

    #[test]
    fn unknown_work_type_fails_fast() {
        let mut req = request();
        req.work_type = "crypto_mining".into();
        let err = ValidatedBulkConfig::from_request(req, &AppConfig::default()).unwrap_err();
        assert!(err.to_string().contains("crypto_mining"));
    }

    #[test]
    fn empty_target_list_is_rejected() {
        let req = BulkJobRequest::new("profile_snapshot", vec![]);
        let err = ValidatedBulkConfig::from_request(req, &AppConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::NoTargets));
    }
}
