//! Recovery planning for classified scraping failures
//!
//! Turns a [`ScrapingError`] plus run context into a single
//! [`RecoveryAction`]. The planner consults the pattern analyzer and the
//! account health monitor: a matched PROACTIVE high-risk pattern escalates a
//! would-be backoff into a pause, a PREVENTIVE match doubles the computed
//! delay, and a QUARANTINE health verdict turns retries into a skip.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::health::{AccountHealthMonitor, RecommendedAction};
use super::patterns::{MitigationStrategy, PatternAnalyzer};
use crate::domain::scrape_error::{ErrorType, ScrapingError, Severity};
use crate::utils::SharedRng;

/// Longest pause a planner will ever schedule.
const MAX_PAUSE: Duration = Duration::from_secs(5 * 60);
/// Backoff delays are capped here before pattern amplification.
const MAX_BACKOFF: Duration = Duration::from_secs(2 * 60);
/// Jitter added on top of exponential backoff, in milliseconds.
const JITTER_MS: u64 = 5_000;
/// Consecutive-error count that forces a session pause.
const CONSECUTIVE_ERROR_LIMIT: u32 = 10;
/// Aggregate pattern risk above which a PROACTIVE match escalates.
const PROACTIVE_RISK_THRESHOLD: f64 = 0.5;

/// What the orchestrator should do about one failed item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RecoveryAction {
    /// Sleep for `delay`, then retry the same item.
    Backoff { delay: Duration },
    /// Give up on this item and move on.
    Skip { reason: String },
    /// Pause the session for `duration`; remaining batch items are abandoned.
    PauseSession { duration: Duration },
    /// Abort the whole session.
    CancelSession { reason: String },
}

impl RecoveryAction {
    /// Whether the action abandons the rest of the current batch.
    pub fn stops_batch(&self) -> bool {
        matches!(
            self,
            RecoveryAction::PauseSession { .. } | RecoveryAction::CancelSession { .. }
        )
    }
}

/// Per-item retry context the orchestrator tracks.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext {
    /// 1-based attempt number for the current item.
    pub attempt: u32,
    /// Session-wide consecutive error count.
    pub consecutive_errors: u32,
}

/// Decides recovery actions, amplified by pattern and health signals.
#[derive(Debug)]
pub struct RecoveryPlanner {
    patterns: Arc<PatternAnalyzer>,
    health: Arc<AccountHealthMonitor>,
    rng: SharedRng,
}

impl RecoveryPlanner {
    pub fn new(
        patterns: Arc<PatternAnalyzer>,
        health: Arc<AccountHealthMonitor>,
        rng: SharedRng,
    ) -> Self {
        Self {
            patterns,
            health,
            rng,
        }
    }

    pub fn plan(&self, error: &ScrapingError, ctx: &RecoveryContext) -> RecoveryAction {
        if error.severity == Severity::Critical {
            return RecoveryAction::CancelSession {
                reason: format!("critical error: {}", error.message),
            };
        }

        if error.error_type == ErrorType::AuthenticationError {
            return RecoveryAction::Skip {
                reason: "authentication failure is not recoverable for this item".into(),
            };
        }

        if let Some(account) = error.account_id.as_deref() {
            if self.health.evaluate(account).recommended_action == RecommendedAction::Quarantine {
                return RecoveryAction::Skip {
                    reason: format!("account {account} is quarantined"),
                };
            }
        }

        if error.error_type == ErrorType::RateLimit {
            let factor = 2u32.saturating_pow(ctx.consecutive_errors.min(16));
            let duration = error
                .suggested_delay
                .saturating_mul(factor)
                .min(MAX_PAUSE);
            return RecoveryAction::PauseSession { duration };
        }

        if ctx.consecutive_errors >= CONSECUTIVE_ERROR_LIMIT {
            return RecoveryAction::PauseSession { duration: MAX_PAUSE };
        }

        if error.retryable && ctx.attempt < error.max_retries {
            let matched = self
                .patterns
                .matches(error.account_id.as_deref(), Some(error.error_type));

            if matched.has_mitigation(MitigationStrategy::Proactive)
                && matched.aggregate_risk > PROACTIVE_RISK_THRESHOLD
            {
                tracing::warn!(
                    "⚠️ Proactive pattern match (risk {:.2}) escalates backoff to pause",
                    matched.aggregate_risk
                );
                return RecoveryAction::PauseSession { duration: MAX_PAUSE };
            }

            let exponent = 2u32.saturating_pow(ctx.attempt.saturating_sub(1).min(16));
            let jitter = Duration::from_millis(self.rng.u64(0..JITTER_MS + 1));
            let mut delay = error
                .suggested_delay
                .saturating_mul(exponent)
                .min(MAX_BACKOFF)
                .saturating_add(jitter);

            if matched.has_mitigation(MitigationStrategy::Preventive) {
                delay = delay.saturating_mul(2);
            }

            return RecoveryAction::Backoff { delay };
        }

        RecoveryAction::Skip {
            reason: format!(
                "retries exhausted after attempt {} of {}",
                ctx.attempt, error.max_retries
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::patterns::ErrorHistory;
    use chrono::Utc;

    fn planner() -> (Arc<ErrorHistory>, RecoveryPlanner) {
        let history = Arc::new(ErrorHistory::new());
        let patterns = Arc::new(PatternAnalyzer::new(Arc::clone(&history)));
        let health = Arc::new(AccountHealthMonitor::new(Arc::clone(&history)));
        let planner = RecoveryPlanner::new(patterns, health, SharedRng::seeded(1));
        (history, planner)
    }

    fn planner_with_patterns(history: &Arc<ErrorHistory>) -> RecoveryPlanner {
        let patterns = Arc::new(PatternAnalyzer::new(Arc::clone(history)));
        patterns.recompute_patterns();
        let health = Arc::new(AccountHealthMonitor::new(Arc::clone(history)));
        RecoveryPlanner::new(patterns, health, SharedRng::seeded(1))
    }

    fn scraping_error(
        error_type: ErrorType,
        severity: Severity,
        retryable: bool,
        delay_secs: u64,
        max_retries: u32,
    ) -> ScrapingError {
        ScrapingError {
            error_type,
            severity,
            code: "t".into(),
            message: "test failure".into(),
            timestamp: Utc::now(),
            session_id: Some("s1".into()),
            account_id: None,
            retryable,
            suggested_delay: Duration::from_secs(delay_secs),
            max_retries,
        }
    }

    fn ctx(attempt: u32, consecutive: u32) -> RecoveryContext {
        RecoveryContext {
            attempt,
            consecutive_errors: consecutive,
        }
    }

    #[test]
    fn critical_error_cancels_even_with_retries_left() {
        let (_h, planner) = planner();
        let error = scraping_error(ErrorType::QuotaExceeded, Severity::Critical, true, 10, 5);
        let action = planner.plan(&error, &ctx(1, 0));
        assert!(matches!(action, RecoveryAction::CancelSession { .. }));
    }

    #[test]
    fn authentication_errors_skip_the_item() {
        let (_h, planner) = planner();
        let error = scraping_error(ErrorType::AuthenticationError, Severity::High, false, 0, 0);
        assert!(matches!(
            planner.plan(&error, &ctx(1, 0)),
            RecoveryAction::Skip { .. }
        ));
    }

    #[test]
    fn rate_limit_pauses_with_doubling_capped_at_five_minutes() {
        let (_h, planner) = planner();
        let error = scraping_error(ErrorType::RateLimit, Severity::Medium, true, 60, 5);

        match planner.plan(&error, &ctx(1, 0)) {
            RecoveryAction::PauseSession { duration } => {
                assert_eq!(duration, Duration::from_secs(60));
            }
            other => panic!("expected pause, got {other:?}"),
        }

        match planner.plan(&error, &ctx(1, 2)) {
            RecoveryAction::PauseSession { duration } => {
                assert_eq!(duration, Duration::from_secs(240));
            }
            other => panic!("expected pause, got {other:?}"),
        }

        match planner.plan(&error, &ctx(1, 6)) {
            RecoveryAction::PauseSession { duration } => {
                assert_eq!(duration, MAX_PAUSE);
            }
            other => panic!("expected pause, got {other:?}"),
        }
    }

    #[test]
    fn ten_consecutive_errors_force_a_pause() {
        let (_h, planner) = planner();
        let error = scraping_error(ErrorType::NetworkError, Severity::Medium, true, 30, 5);
        match planner.plan(&error, &ctx(1, 10)) {
            RecoveryAction::PauseSession { duration } => assert_eq!(duration, MAX_PAUSE),
            other => panic!("expected pause, got {other:?}"),
        }
    }

    #[test]
    fn retryable_error_backs_off_exponentially_with_jitter() {
        let (_h, planner) = planner();
        let error = scraping_error(ErrorType::TimeoutError, Severity::Medium, true, 10, 3);

        match planner.plan(&error, &ctx(2, 1)) {
            RecoveryAction::Backoff { delay } => {
                // 10s * 2^(2-1) = 20s plus up to 5s jitter.
                assert!(delay >= Duration::from_secs(20));
                assert!(delay <= Duration::from_secs(25));
            }
            other => panic!("expected backoff, got {other:?}"),
        }
    }

    #[test]
    fn backoff_is_capped_before_jitter() {
        let (_h, planner) = planner();
        let error = scraping_error(ErrorType::NetworkError, Severity::Medium, true, 30, 9);
        match planner.plan(&error, &ctx(8, 1)) {
            RecoveryAction::Backoff { delay } => {
                assert!(delay <= MAX_BACKOFF + Duration::from_millis(JITTER_MS));
            }
            other => panic!("expected backoff, got {other:?}"),
        }
    }

    #[test]
    fn exhausted_retries_skip() {
        let (_h, planner) = planner();
        let error = scraping_error(ErrorType::TimeoutError, Severity::Medium, true, 10, 3);
        assert!(matches!(
            planner.plan(&error, &ctx(3, 1)),
            RecoveryAction::Skip { .. }
        ));
    }

    #[test]
    fn quarantined_account_is_skipped_before_retrying() {
        let history = Arc::new(ErrorHistory::new());
        // Bury the account in failures so health recommends quarantine.
        for _ in 0..25 {
            let mut e = scraping_error(ErrorType::NetworkError, Severity::Medium, true, 1, 3);
            e.account_id = Some("bad".into());
            history.record_error(&e);
        }
        let patterns = Arc::new(PatternAnalyzer::new(Arc::clone(&history)));
        let health = Arc::new(AccountHealthMonitor::new(Arc::clone(&history)));
        let planner = RecoveryPlanner::new(patterns, health, SharedRng::seeded(1));

        let mut error = scraping_error(ErrorType::TimeoutError, Severity::Medium, true, 10, 3);
        error.account_id = Some("bad".into());
        assert!(matches!(
            planner.plan(&error, &ctx(1, 0)),
            RecoveryAction::Skip { .. }
        ));
    }

    #[test]
    fn preventive_pattern_doubles_the_backoff_delay() {
        let history = Arc::new(ErrorHistory::new());
        // Repeating timeout/network trigrams produce a PREVENTIVE
        // sequential pattern for these types.
        for t in [
            ErrorType::TimeoutError,
            ErrorType::NetworkError,
            ErrorType::TimeoutError,
            ErrorType::NetworkError,
            ErrorType::TimeoutError,
        ] {
            let e = scraping_error(t, Severity::Medium, true, 10, 5);
            history.record_error(&e);
        }
        let planner = planner_with_patterns(&history);

        let error = scraping_error(ErrorType::TimeoutError, Severity::Medium, true, 10, 5);
        match planner.plan(&error, &ctx(1, 1)) {
            RecoveryAction::Backoff { delay } => {
                // Base 10s doubled to at least 20s (jitter also doubles).
                assert!(delay >= Duration::from_secs(20), "delay: {delay:?}");
            }
            other => panic!("expected backoff, got {other:?}"),
        }
    }

    #[test]
    fn proactive_high_risk_pattern_escalates_to_pause() {
        let history = Arc::new(ErrorHistory::new());
        // 12 errors of one type inside the window: frequency pattern with
        // count > 10 becomes PROACTIVE with confidence 12/20 = 0.6.
        for _ in 0..12 {
            let e = scraping_error(ErrorType::UnknownError, Severity::Medium, true, 15, 5);
            history.record_error(&e);
        }
        let planner = planner_with_patterns(&history);

        let error = scraping_error(ErrorType::UnknownError, Severity::Medium, true, 15, 5);
        match planner.plan(&error, &ctx(1, 1)) {
            RecoveryAction::PauseSession { duration } => assert_eq!(duration, MAX_PAUSE),
            other => panic!("expected pause escalation, got {other:?}"),
        }
    }
}
