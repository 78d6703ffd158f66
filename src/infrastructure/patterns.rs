//! Rolling error history and recurring-pattern detection
//!
//! [`ErrorHistory`] is the bounded shared record of per-item failures and
//! successes; both the pattern analyzer and the account health monitor read
//! from it. [`PatternAnalyzer::recompute_patterns`] is invoked explicitly
//! (typically after each recorded error) rather than on a background timer,
//! so callers and tests control exactly when analysis happens.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::scrape_error::{ErrorType, ScrapingError, Severity};

/// Rolling history capacity.
const MAX_HISTORY: usize = 10_000;

/// Detection windows scanned on each recompute.
const WINDOWS: [Duration; 4] = [
    Duration::from_secs(5 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(2 * 60 * 60),
    Duration::from_secs(24 * 60 * 60),
];

/// One recorded failure, reduced to what pattern/health analysis needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_type: ErrorType,
    pub account_id: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct HistoryInner {
    records: VecDeque<ErrorRecord>,
    last_success: HashMap<String, DateTime<Utc>>,
    consecutive_failures: HashMap<String, u32>,
}

/// Bounded, process-local error/success history shared across analyzers.
#[derive(Debug, Default)]
pub struct ErrorHistory {
    inner: RwLock<HistoryInner>,
}

impl ErrorHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one classified error, evicting the oldest entry when full.
    pub fn record_error(&self, error: &ScrapingError) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.records.len() >= MAX_HISTORY {
            inner.records.pop_front();
        }
        inner.records.push_back(ErrorRecord {
            error_type: error.error_type,
            account_id: error.account_id.clone(),
            session_id: error.session_id.clone(),
            timestamp: error.timestamp,
        });
        if let Some(account) = &error.account_id {
            *inner
                .consecutive_failures
                .entry(account.clone())
                .or_insert(0) += 1;
        }
    }

    /// Record a successful call, resetting the account's failure streak.
    pub fn record_success(&self, account_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .last_success
            .insert(account_id.to_string(), Utc::now());
        inner.consecutive_failures.insert(account_id.to_string(), 0);
    }

    /// All records newer than `cutoff`, oldest first.
    pub fn errors_since(&self, cutoff: DateTime<Utc>) -> Vec<ErrorRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .records
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Records for one account newer than `cutoff`.
    pub fn account_errors_since(&self, account_id: &str, cutoff: DateTime<Utc>) -> Vec<ErrorRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .records
            .iter()
            .filter(|r| r.timestamp >= cutoff && r.account_id.as_deref() == Some(account_id))
            .cloned()
            .collect()
    }

    pub fn consecutive_failures(&self, account_id: &str) -> u32 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .consecutive_failures
            .get(account_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn last_success(&self, account_id: &str) -> Option<DateTime<Utc>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.last_success.get(account_id).copied()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a detected pattern should be acted upon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MitigationStrategy {
    Reactive,
    Preventive,
    Proactive,
}

/// A recurring error shape detected across the rolling history.
///
/// Patterns are derived and recomputed from history; they are never
/// persisted as ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub id: String,
    pub error_types: Vec<ErrorType>,
    pub frequency: u32,
    pub window: Duration,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub impact: Severity,
    pub mitigation: MitigationStrategy,
    pub affected_accounts: Vec<String>,
}

/// Result of matching the pattern set against a run context.
#[derive(Debug, Clone, Default)]
pub struct PatternMatch {
    pub patterns: Vec<ErrorPattern>,
    /// Sum of matched confidences, capped at 1.0.
    pub aggregate_risk: f64,
}

impl PatternMatch {
    pub fn has_mitigation(&self, strategy: MitigationStrategy) -> bool {
        self.patterns.iter().any(|p| p.mitigation == strategy)
    }
}

/// Detects frequency, account, and sequential error patterns.
#[derive(Debug)]
pub struct PatternAnalyzer {
    history: std::sync::Arc<ErrorHistory>,
    patterns: RwLock<Vec<ErrorPattern>>,
}

impl PatternAnalyzer {
    pub fn new(history: std::sync::Arc<ErrorHistory>) -> Self {
        Self {
            history,
            patterns: RwLock::new(Vec::new()),
        }
    }

    /// Re-scan the history over all detection windows and replace the
    /// current pattern set. Returns the number of patterns found.
    pub fn recompute_patterns(&self) -> usize {
        let now = Utc::now();
        let mut found = Vec::new();

        for window in WINDOWS {
            let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
            let records = self.history.errors_since(cutoff);
            if records.is_empty() {
                continue;
            }
            self.detect_frequency_patterns(&records, window, &mut found);
            self.detect_account_patterns(&records, window, &mut found);
            self.detect_sequential_patterns(&records, window, &mut found);
        }

        let count = found.len();
        if count > 0 {
            tracing::debug!("🔍 Pattern analysis found {count} pattern(s)");
        }
        let mut patterns = self.patterns.write().unwrap_or_else(|e| e.into_inner());
        *patterns = found;
        count
    }

    /// All patterns touching the given account or last error type, with the
    /// aggregate risk of the match.
    pub fn matches(&self, account_id: Option<&str>, last_error: Option<ErrorType>) -> PatternMatch {
        let patterns = self.patterns.read().unwrap_or_else(|e| e.into_inner());
        let matched: Vec<ErrorPattern> = patterns
            .iter()
            .filter(|p| {
                let by_account = account_id
                    .is_some_and(|a| p.affected_accounts.iter().any(|x| x == a));
                let by_type = last_error.is_some_and(|t| p.error_types.contains(&t));
                by_account || by_type
            })
            .cloned()
            .collect();

        let aggregate_risk = matched
            .iter()
            .map(|p| p.confidence)
            .sum::<f64>()
            .min(1.0);

        PatternMatch {
            patterns: matched,
            aggregate_risk,
        }
    }

    pub fn current_patterns(&self) -> Vec<ErrorPattern> {
        let patterns = self.patterns.read().unwrap_or_else(|e| e.into_inner());
        patterns.clone()
    }

    /// >= 5 occurrences of one error type inside the window.
    fn detect_frequency_patterns(
        &self,
        records: &[ErrorRecord],
        window: Duration,
        out: &mut Vec<ErrorPattern>,
    ) {
        let mut counts: HashMap<ErrorType, u32> = HashMap::new();
        for r in records {
            *counts.entry(r.error_type).or_insert(0) += 1;
        }

        for (error_type, count) in counts {
            if count < 5 {
                continue;
            }
            let impact = if error_type == ErrorType::QuotaExceeded || count > 15 {
                Severity::Critical
            } else if error_type == ErrorType::AuthenticationError || count > 10 {
                Severity::High
            } else if count > 5 {
                Severity::Medium
            } else {
                Severity::Low
            };
            let mitigation = if error_type == ErrorType::RateLimit {
                MitigationStrategy::Preventive
            } else if count > 10 {
                MitigationStrategy::Proactive
            } else {
                MitigationStrategy::Reactive
            };
            out.push(ErrorPattern {
                id: Uuid::new_v4().to_string(),
                error_types: vec![error_type],
                frequency: count,
                window,
                confidence: (f64::from(count) / 20.0).min(1.0),
                impact,
                mitigation,
                affected_accounts: Vec::new(),
            });
        }
    }

    /// >= 3 errors against the same account inside the window.
    fn detect_account_patterns(
        &self,
        records: &[ErrorRecord],
        window: Duration,
        out: &mut Vec<ErrorPattern>,
    ) {
        let mut per_account: HashMap<&str, Vec<ErrorType>> = HashMap::new();
        for r in records {
            if let Some(account) = r.account_id.as_deref() {
                per_account.entry(account).or_default().push(r.error_type);
            }
        }

        for (account, types) in per_account {
            let count = types.len() as u32;
            if count < 3 {
                continue;
            }
            let mut distinct = types;
            distinct.sort_by_key(|t| *t as u8);
            distinct.dedup();
            out.push(ErrorPattern {
                id: Uuid::new_v4().to_string(),
                error_types: distinct,
                frequency: count,
                window,
                confidence: (f64::from(count) / 10.0).min(0.9),
                impact: Severity::High,
                mitigation: MitigationStrategy::Proactive,
                affected_accounts: vec![account.to_string()],
            });
        }
    }

    /// Any 3-error-type subsequence repeating >= 2 times inside the window.
    fn detect_sequential_patterns(
        &self,
        records: &[ErrorRecord],
        window: Duration,
        out: &mut Vec<ErrorPattern>,
    ) {
        if records.len() < 3 {
            return;
        }
        let mut trigrams: HashMap<[ErrorType; 3], u32> = HashMap::new();
        for w in records.windows(3) {
            let key = [w[0].error_type, w[1].error_type, w[2].error_type];
            *trigrams.entry(key).or_insert(0) += 1;
        }

        for (trigram, count) in trigrams {
            if count < 2 {
                continue;
            }
            out.push(ErrorPattern {
                id: Uuid::new_v4().to_string(),
                error_types: trigram.to_vec(),
                frequency: count,
                window,
                confidence: (f64::from(count) / 5.0).min(0.8),
                impact: Severity::Medium,
                mitigation: MitigationStrategy::Preventive,
                affected_accounts: Vec::new(),
            });
        }
    }
}
