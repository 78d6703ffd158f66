//! Pre-flight session risk assessment
//!
//! Scores a prospective job before any slot or budget is committed. The
//! score folds together mean account health, the historical error rate of
//! the work type, time of day, concurrent session pressure, and a system
//! load probe. Only EXTREME risk blocks the job.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::domain::session::{SessionManager, WorkType};
use crate::infrastructure::health::AccountHealthMonitor;
use crate::utils::SharedRng;

/// Risk classification for a prospective session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

/// Time-of-day category used as a risk adjustment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeOfDay {
    Peak,
    Normal,
    OffPeak,
}

/// Full assessment returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub level: RiskLevel,
    pub should_proceed: bool,
    pub mean_health: f64,
    pub historical_error_rate: f64,
    pub time_of_day: TimeOfDay,
    pub concurrent_sessions: usize,
    pub system_load: f64,
    pub recommendations: Vec<String>,
}

/// Per-work-type attempt/failure tally fed by the orchestrator.
#[derive(Debug, Default)]
pub struct WorkTypeStats {
    inner: RwLock<HashMap<WorkType, (u64, u64)>>,
}

impl WorkTypeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, work_type: WorkType, attempts: u64, failures: u64) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let entry = inner.entry(work_type).or_insert((0, 0));
        entry.0 += attempts;
        entry.1 += failures;
    }

    /// Failure ratio in [0, 1]; 0 when nothing was recorded yet.
    pub fn error_rate(&self, work_type: WorkType) -> f64 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        match inner.get(&work_type) {
            Some((attempts, failures)) if *attempts > 0 => *failures as f64 / *attempts as f64,
            _ => 0.0,
        }
    }
}

/// Go/no-go scorer for prospective bulk jobs.
pub struct SessionRiskAssessor {
    health: Arc<AccountHealthMonitor>,
    sessions: Arc<SessionManager>,
    stats: Arc<WorkTypeStats>,
    rng: SharedRng,
    /// Fixed load for tests and deployments with a real probe; when unset a
    /// simulated value is drawn from the injected RNG.
    fixed_system_load: Option<f64>,
}

impl SessionRiskAssessor {
    pub fn new(
        health: Arc<AccountHealthMonitor>,
        sessions: Arc<SessionManager>,
        stats: Arc<WorkTypeStats>,
        rng: SharedRng,
    ) -> Self {
        Self {
            health,
            sessions,
            stats,
            rng,
            fixed_system_load: None,
        }
    }

    pub fn with_system_load(mut self, load: f64) -> Self {
        self.fixed_system_load = Some(load.clamp(0.0, 1.0));
        self
    }

    pub async fn assess(&self, work_type: WorkType, account_ids: &[String]) -> RiskAssessment {
        self.assess_at(work_type, account_ids, Utc::now()).await
    }

    /// Assessment with an explicit timestamp, for deterministic tests.
    pub async fn assess_at(
        &self,
        work_type: WorkType,
        account_ids: &[String],
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let mean_health = if account_ids.is_empty() {
            100.0
        } else {
            account_ids
                .iter()
                .map(|id| self.health.evaluate(id).health_score)
                .sum::<f64>()
                / account_ids.len() as f64
        };
        let unhealthy = account_ids
            .iter()
            .filter(|id| self.health.evaluate(id).health_score < 40.0)
            .count();

        let historical_error_rate = self.stats.error_rate(work_type);
        let time_of_day = time_category(now);
        let concurrent_sessions = self.sessions.active_session_count().await;
        let system_load = self
            .fixed_system_load
            .unwrap_or_else(|| self.rng.f64() * 0.5);

        let mut score = (100.0 - mean_health) * 0.01 + historical_error_rate * 2.0;
        score += match time_of_day {
            TimeOfDay::Peak => 0.2,
            TimeOfDay::Normal => 0.0,
            TimeOfDay::OffPeak => -0.1,
        };
        if concurrent_sessions > 10 {
            score += 0.5;
        } else if concurrent_sessions > 5 {
            score += 0.3;
        }
        score += system_load * 0.4;

        let level = if score > 1.5 {
            RiskLevel::Extreme
        } else if score > 1.0 {
            RiskLevel::High
        } else if score > 0.5 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let mut recommendations = Vec::new();
        if unhealthy > 0 {
            recommendations.push(format!(
                "exclude {unhealthy} unhealthy account(s) before running"
            ));
        }
        if time_of_day == TimeOfDay::Peak {
            recommendations.push("avoid peak hours; schedule during off-peak".to_string());
        }
        if system_load > 0.7 {
            recommendations.push("reduce batch size while system load is high".to_string());
        }
        if level == RiskLevel::Extreme {
            recommendations.push("defer this job; risk is extreme".to_string());
        }

        tracing::info!(
            "🎯 Risk for {work_type}: {score:.2} ({level:?}), {concurrent_sessions} concurrent"
        );

        RiskAssessment {
            score,
            level,
            should_proceed: level != RiskLevel::Extreme,
            mean_health,
            historical_error_rate,
            time_of_day,
            concurrent_sessions,
            system_load,
            recommendations,
        }
    }
}

/// PEAK is weekday business hours (09-17 UTC); OFF_PEAK is 22-06 UTC.
fn time_category(now: DateTime<Utc>) -> TimeOfDay {
    let hour = now.hour();
    let weekday = !matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
    if weekday && (9..17).contains(&hour) {
        TimeOfDay::Peak
    } else if hour >= 22 || hour < 6 {
        TimeOfDay::OffPeak
    } else {
        TimeOfDay::Normal
    }
}
