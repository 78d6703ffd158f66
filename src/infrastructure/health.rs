//! Account health scoring from recent error history
//!
//! Scores each managed account's reliability on a 0-100 scale from its last
//! 24 hours of history, predicts the next-error probability, and recommends
//! an action. Results are cached per account for 30 minutes and can be
//! invalidated explicitly (the orchestrator does so after each success).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::patterns::ErrorHistory;
use crate::domain::scrape_error::ErrorType;

/// Cache freshness window.
const CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// What to do with an account given its current health.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecommendedAction {
    Continue,
    Pause,
    Investigate,
    Quarantine,
}

/// Health assessment for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountHealth {
    pub account_id: String,
    /// 0-100, clamped.
    pub health_score: f64,
    pub consecutive_failures: u32,
    /// Errors per hour over the last 24h window.
    pub error_rate: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub suspicious: bool,
    pub rate_limit_hits: u32,
    /// 0-0.95.
    pub next_error_probability: f64,
    pub recommended_action: RecommendedAction,
    pub confidence: f64,
    pub last_analyzed: DateTime<Utc>,
}

/// Caching health monitor over the shared error history.
#[derive(Debug)]
pub struct AccountHealthMonitor {
    history: Arc<ErrorHistory>,
    cache: RwLock<HashMap<String, AccountHealth>>,
}

impl AccountHealthMonitor {
    pub fn new(history: Arc<ErrorHistory>) -> Self {
        Self {
            history,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Current health for the account, computed at most every 30 minutes.
    pub fn evaluate(&self, account_id: &str) -> AccountHealth {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.get(account_id) {
                let age = Utc::now() - cached.last_analyzed;
                if age.to_std().map(|d| d < CACHE_TTL).unwrap_or(true) {
                    return cached.clone();
                }
            }
        }

        let health = self.compute(account_id);
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(account_id.to_string(), health.clone());
        health
    }

    /// Drop the cached entry so the next evaluation recomputes.
    pub fn invalidate(&self, account_id: &str) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.remove(account_id);
    }

    fn compute(&self, account_id: &str) -> AccountHealth {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::hours(24);
        let errors = self.history.account_errors_since(account_id, cutoff);

        let consecutive_failures = self.history.consecutive_failures(account_id);
        let error_rate = errors.len() as f64 / 24.0;
        let auth_count = errors
            .iter()
            .filter(|e| e.error_type == ErrorType::AuthenticationError)
            .count() as u32;
        let rate_limit_hits = errors
            .iter()
            .filter(|e| e.error_type == ErrorType::RateLimit)
            .count() as u32;
        let suspicious = auth_count > 3 || rate_limit_hits > 10;

        let last_success = self.history.last_success(account_id);
        let days_since_success = last_success
            .map(|ts| ((now - ts).num_days().max(0)) as f64)
            .unwrap_or(0.0);

        let mut health_score = 100.0
            - f64::from(consecutive_failures) * 5.0
            - error_rate * 10.0
            - if suspicious { 20.0 } else { 0.0 }
            - f64::from(rate_limit_hits) * 2.0
            - days_since_success;
        health_score = health_score.clamp(0.0, 100.0);

        // Each term carries its own cap before summing.
        let next_error_probability = ((f64::from(consecutive_failures) * 0.1).min(0.5)
            + (error_rate * 0.05).min(0.3)
            + ((100.0 - health_score) * 0.002).min(0.2))
        .min(0.95);

        let recommended_action = if health_score < 20.0 || next_error_probability > 0.8 {
            RecommendedAction::Quarantine
        } else if health_score < 40.0 || next_error_probability > 0.6 {
            RecommendedAction::Investigate
        } else if health_score < 70.0 || next_error_probability > 0.4 {
            RecommendedAction::Pause
        } else {
            RecommendedAction::Continue
        };

        // More observed errors, more confidence in the verdict.
        let confidence = (0.3 + errors.len() as f64 * 0.05).min(0.9);

        if recommended_action != RecommendedAction::Continue {
            tracing::debug!(
                "🩺 Account {account_id} health {health_score:.1}, action {recommended_action:?}"
            );
        }

        AccountHealth {
            account_id: account_id.to_string(),
            health_score,
            consecutive_failures,
            error_rate,
            last_success,
            suspicious,
            rate_limit_hits,
            next_error_probability,
            recommended_action,
            confidence,
            last_analyzed: now,
        }
    }
}
