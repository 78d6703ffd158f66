//! Bulk job orchestration
//!
//! Drives a validated job through the session state machine: partitions
//! targets into fixed-size batches, calls the upstream API strictly one
//! item at a time, classifies failures, applies recovery actions, and
//! enforces the cost ceiling. Session control actions (pause/stop) are
//! cooperative signals observed at item boundaries; a pause or cancel takes
//! effect no later than the completion of the in-flight item.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout};

use super::config::{BulkJobRequest, ConfigError, ValidatedBulkConfig};
use super::risk::WorkTypeStats;
use crate::domain::events::{AppEvent, Notification};
use crate::domain::scrape_error::{ErrorType, RawFailure, RunContext, TransportKind};
use crate::domain::session::{
    ItemFailure, JobSummary, SessionAction, SessionError, SessionManager, SessionProgress,
    SessionStatus,
};
use crate::infrastructure::api_client::{FetchOptions, ProfileApiClient};
use crate::infrastructure::classifier::ErrorClassifier;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::health::AccountHealthMonitor;
use crate::infrastructure::notifier::NotificationSink;
use crate::infrastructure::patterns::{ErrorHistory, PatternAnalyzer};
use crate::infrastructure::recovery::{RecoveryAction, RecoveryContext, RecoveryPlanner};
use crate::utils::SharedRng;

/// Cost ceiling relative to the up-front estimate.
const COST_HALT_FACTOR: f64 = 1.5;
/// Cool-down applied between batches after a rate-limit-sized burst.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(2);
/// Polling interval while waiting out an external pause.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Rate-limit pauses tolerated before a session is parked as RateLimited.
const MAX_RATE_LIMIT_PAUSES: u32 = 3;

/// Orchestrator-level failures.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// Outcome of one batch, folded into the running totals.
#[derive(Debug, Default)]
struct BatchOutcome {
    successes: u32,
    stop_session: bool,
}

/// Explicitly constructed top-level driver. Carries its own classifier,
/// planner, analyzer, and health monitor instances so independent
/// orchestrators (and tests) never share hidden state.
pub struct BulkOrchestrator {
    sessions: Arc<SessionManager>,
    history: Arc<ErrorHistory>,
    patterns: Arc<PatternAnalyzer>,
    health: Arc<AccountHealthMonitor>,
    classifier: ErrorClassifier,
    planner: RecoveryPlanner,
    stats: Arc<WorkTypeStats>,
    api: Arc<dyn ProfileApiClient>,
    notifier: Arc<dyn NotificationSink>,
    app_config: AppConfig,
    unit_price_usd: f64,
}

impl BulkOrchestrator {
    pub fn new(
        api: Arc<dyn ProfileApiClient>,
        notifier: Arc<dyn NotificationSink>,
        app_config: AppConfig,
        rng: SharedRng,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new());
        let history = Arc::new(ErrorHistory::new());
        let patterns = Arc::new(PatternAnalyzer::new(Arc::clone(&history)));
        let health = Arc::new(AccountHealthMonitor::new(Arc::clone(&history)));
        let planner = RecoveryPlanner::new(Arc::clone(&patterns), Arc::clone(&health), rng);
        let unit_price_usd = app_config.scraping.unit_price_usd;

        Self {
            sessions,
            history,
            patterns,
            health,
            classifier: ErrorClassifier::new(),
            planner,
            stats: Arc::new(WorkTypeStats::new()),
            api,
            notifier,
            app_config,
            unit_price_usd,
        }
    }

    /// Session manager handle for the external control surface.
    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    /// Work-type statistics handle for the risk assessor.
    pub fn work_type_stats(&self) -> Arc<WorkTypeStats> {
        Arc::clone(&self.stats)
    }

    /// Shared error history handle (health monitoring, risk assessment).
    pub fn error_history(&self) -> Arc<ErrorHistory> {
        Arc::clone(&self.history)
    }

    /// Validate the request and create a pending session. Fails fast on any
    /// out-of-range configuration value.
    pub async fn create_job(&self, request: BulkJobRequest) -> Result<String, OrchestratorError> {
        let config = ValidatedBulkConfig::from_request(request, &self.app_config)?;
        let estimated_cost = self.estimate_cost(&config);
        let session_id = self
            .sessions
            .create_session(
                config.work_type,
                config.account_ids.clone(),
                config.session_config(),
                estimated_cost,
            )
            .await;
        tracing::info!(
            "🧾 Job {session_id}: {} target(s), estimated ${estimated_cost:.2}",
            config.account_ids.len()
        );
        Ok(session_id)
    }

    /// Validate, create, and immediately run a job.
    pub async fn create_and_execute(
        &self,
        request: BulkJobRequest,
    ) -> Result<JobSummary, OrchestratorError> {
        let session_id = self.create_job(request).await?;
        self.execute(&session_id).await
    }

    /// Run a previously created session to completion.
    pub async fn execute(&self, session_id: &str) -> Result<JobSummary, OrchestratorError> {
        let session = self
            .sessions
            .get_session(session_id)
            .await
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;

        self.sessions
            .apply_action(session_id, SessionAction::Start)
            .await?;
        let seq = AtomicU64::new(0);
        self.emit(
            session_id,
            &seq,
            AppEvent::StateChanged {
                from: SessionStatus::Pending,
                to: SessionStatus::Initializing,
                reason: None,
            },
        );

        let targets = session.targets.clone();
        let batch_size = session.config.batch_size as usize;
        let rate_limit_per_sec = session.config.rate_limit_per_sec;
        let estimated_cost = session.estimated_cost_usd;
        let work_type = session.work_type;
        let options = FetchOptions { work_type };
        let request_delay = Duration::from_millis(self.app_config.scraping.request_delay_ms);
        let call_timeout = Duration::from_secs(self.app_config.scraping.call_timeout_seconds);
        let started = std::time::Instant::now();

        self.sessions.mark_running(session_id).await?;
        self.emit(
            session_id,
            &seq,
            AppEvent::StateChanged {
                from: SessionStatus::Initializing,
                to: SessionStatus::Running,
                reason: None,
            },
        );

        let mut progress = SessionProgress::default();
        let mut failures: Vec<ItemFailure> = Vec::new();
        let mut consecutive_errors = 0u32;
        let mut rate_limit_pauses = 0u32;
        let mut halted_reason: Option<String> = None;

        'batches: for batch in targets.chunks(batch_size) {
            match self.wait_until_runnable(session_id).await {
                Some(SessionStatus::Running) => {}
                _ => break 'batches,
            }

            let outcome = self
                .process_batch(
                    session_id,
                    batch,
                    &options,
                    call_timeout,
                    request_delay,
                    &mut progress,
                    &mut failures,
                    &mut consecutive_errors,
                    &mut rate_limit_pauses,
                    &seq,
                )
                .await;

            // Persist aggregated progress and notify after every batch.
            self.sessions.update_progress(session_id, progress).await?;
            let total = targets.len() as u32;
            let done = progress.completed + progress.failed + progress.skipped;
            self.emit(
                session_id,
                &seq,
                AppEvent::ProgressUpdate {
                    completed: progress.completed,
                    failed: progress.failed,
                    skipped: progress.skipped,
                    total,
                    percentage: if total == 0 {
                        100.0
                    } else {
                        f64::from(done) / f64::from(total) * 100.0
                    },
                },
            );
            self.emit(
                session_id,
                &seq,
                AppEvent::CostUpdate {
                    request_units: progress.request_units,
                    actual_cost_usd: progress.actual_cost_usd,
                    estimated_cost_usd: estimated_cost,
                },
            );

            if outcome.stop_session {
                break 'batches;
            }

            if progress.actual_cost_usd >= estimated_cost * COST_HALT_FACTOR {
                let reason = format!(
                    "cost ${:.2} reached {COST_HALT_FACTOR}x the estimate ${estimated_cost:.2}",
                    progress.actual_cost_usd
                );
                tracing::warn!("💸 Session {session_id} halted: {reason}");
                halted_reason = Some(reason);
                break 'batches;
            }

            // Cool down after a burst that met the session's per-second budget.
            if outcome.successes >= rate_limit_per_sec {
                sleep(RATE_LIMIT_COOLDOWN).await;
            }
        }

        let final_status = self
            .finalize(session_id, rate_limit_pauses, halted_reason, &seq)
            .await?;

        let attempts = u64::from(progress.completed + progress.failed + progress.skipped);
        let item_failures = u64::from(progress.failed + progress.skipped);
        self.stats.record(work_type, attempts, item_failures);

        let summary = JobSummary {
            session_id: session_id.to_string(),
            status: final_status,
            total: targets.len() as u32,
            succeeded: progress.completed,
            failed: progress.failed,
            skipped: progress.skipped,
            request_units: progress.request_units,
            actual_cost_usd: progress.actual_cost_usd,
            estimated_cost_usd: estimated_cost,
            duration_ms: started.elapsed().as_millis() as u64,
            errors: failures,
        };
        self.emit(
            session_id,
            &seq,
            AppEvent::SessionCompleted {
                summary: summary.clone(),
            },
        );
        tracing::info!(
            "🏁 Session {session_id} finished: {}/{} ok, {} failed, {} skipped, ${:.2}",
            summary.succeeded,
            summary.total,
            summary.failed,
            summary.skipped,
            summary.actual_cost_usd
        );
        Ok(summary)
    }

    /// Process one batch strictly sequentially. Returns whether the whole
    /// session must stop.
    #[allow(clippy::too_many_arguments)]
    async fn process_batch(
        &self,
        session_id: &str,
        batch: &[String],
        options: &FetchOptions,
        call_timeout: Duration,
        request_delay: Duration,
        progress: &mut SessionProgress,
        failures: &mut Vec<ItemFailure>,
        consecutive_errors: &mut u32,
        rate_limit_pauses: &mut u32,
        seq: &AtomicU64,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for account_id in batch {
            match self.wait_until_runnable(session_id).await {
                Some(SessionStatus::Running) => {}
                _ => {
                    outcome.stop_session = true;
                    return outcome;
                }
            }

            let mut attempt = 1u32;
            loop {
                let call = timeout(call_timeout, self.api.fetch_profile(account_id, options));
                let result = match call.await {
                    Ok(inner) => inner,
                    Err(_) => Err(RawFailure::Transport {
                        kind: TransportKind::Timeout,
                        message: format!("call exceeded {call_timeout:?}"),
                    }),
                };

                match result {
                    Ok(fetch) => {
                        progress.completed += 1;
                        progress.request_units += fetch.request_units;
                        progress.actual_cost_usd += fetch.cost_usd;
                        *consecutive_errors = 0;
                        outcome.successes += 1;
                        self.history.record_success(account_id);
                        self.health.invalidate(account_id);
                        break;
                    }
                    Err(raw) => {
                        let ctx = RunContext::for_item(session_id, account_id.as_str());
                        let error = self.classifier.classify(&raw, &ctx);
                        self.history.record_error(&error);
                        self.patterns.recompute_patterns();
                        *consecutive_errors += 1;
                        let _ = self.sessions.add_error(session_id, &error.message).await;

                        let action = self.planner.plan(
                            &error,
                            &RecoveryContext {
                                attempt,
                                consecutive_errors: *consecutive_errors,
                            },
                        );
                        tracing::debug!(
                            "Item {account_id} attempt {attempt} failed ({}) -> {action:?}",
                            error.error_type
                        );

                        match action {
                            RecoveryAction::Backoff { delay } => {
                                sleep(delay).await;
                                attempt += 1;
                                continue;
                            }
                            RecoveryAction::Skip { reason } => {
                                progress.skipped += 1;
                                failures.push(ItemFailure::from_error(account_id, &error));
                                tracing::debug!("Skipping {account_id}: {reason}");
                                break;
                            }
                            RecoveryAction::PauseSession { duration } => {
                                progress.failed += 1;
                                failures.push(ItemFailure::from_error(account_id, &error));
                                let is_rate_limit = error.error_type == ErrorType::RateLimit;
                                if is_rate_limit {
                                    *rate_limit_pauses += 1;
                                    if *rate_limit_pauses >= MAX_RATE_LIMIT_PAUSES {
                                        outcome.stop_session = true;
                                        return outcome;
                                    }
                                }
                                self.pause_and_wait(session_id, duration, seq).await;
                                // Remaining items in this batch are abandoned.
                                return outcome;
                            }
                            RecoveryAction::CancelSession { reason } => {
                                progress.failed += 1;
                                failures.push(ItemFailure::from_error(account_id, &error));
                                let _ = self
                                    .sessions
                                    .apply_action(session_id, SessionAction::Stop)
                                    .await;
                                self.emit(
                                    session_id,
                                    seq,
                                    AppEvent::StateChanged {
                                        from: SessionStatus::Running,
                                        to: SessionStatus::Cancelled,
                                        reason: Some(reason),
                                    },
                                );
                                outcome.stop_session = true;
                                return outcome;
                            }
                        }
                    }
                }
            }

            if !request_delay.is_zero() {
                sleep(request_delay).await;
            }
        }
        outcome
    }

    /// Serve a planner-initiated pause in-flow: pause, sleep, resume.
    async fn pause_and_wait(&self, session_id: &str, duration: Duration, seq: &AtomicU64) {
        if self
            .sessions
            .apply_action(session_id, SessionAction::Pause)
            .await
            .is_ok()
        {
            self.emit(
                session_id,
                seq,
                AppEvent::StateChanged {
                    from: SessionStatus::Running,
                    to: SessionStatus::Paused,
                    reason: Some(format!("pausing for {duration:?}")),
                },
            );
            sleep(duration).await;
            // The session may have been stopped while paused.
            let _ = self
                .sessions
                .apply_action(session_id, SessionAction::Resume)
                .await;
        }
    }

    /// Block until the session is Running, or return its blocking status.
    /// External pauses are waited out; stop/cancel is surfaced immediately.
    async fn wait_until_runnable(&self, session_id: &str) -> Option<SessionStatus> {
        loop {
            match self.sessions.status_of(session_id).await? {
                SessionStatus::Running => return Some(SessionStatus::Running),
                SessionStatus::Paused => sleep(PAUSE_POLL_INTERVAL).await,
                other => return Some(other),
            }
        }
    }

    /// Settle the terminal status once batch processing ends.
    async fn finalize(
        &self,
        session_id: &str,
        rate_limit_pauses: u32,
        halted_reason: Option<String>,
        seq: &AtomicU64,
    ) -> Result<SessionStatus, OrchestratorError> {
        let current = self
            .sessions
            .status_of(session_id)
            .await
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;

        let final_status = match current {
            SessionStatus::Cancelled => SessionStatus::Cancelled,
            _ if rate_limit_pauses >= MAX_RATE_LIMIT_PAUSES => {
                self.sessions.mark_rate_limited(session_id).await?;
                SessionStatus::RateLimited
            }
            _ => {
                self.sessions
                    .finish(session_id, SessionStatus::Completed)
                    .await?;
                if let Some(reason) = halted_reason {
                    self.emit(
                        session_id,
                        seq,
                        AppEvent::StateChanged {
                            from: SessionStatus::Running,
                            to: SessionStatus::Completed,
                            reason: Some(reason),
                        },
                    );
                }
                SessionStatus::Completed
            }
        };
        Ok(final_status)
    }

    fn estimate_cost(&self, config: &ValidatedBulkConfig) -> f64 {
        let units = config.work_type.estimated_units_per_item();
        config.account_ids.len() as f64 * f64::from(units) * self.unit_price_usd
    }

    fn emit(&self, session_id: &str, seq: &AtomicU64, event: AppEvent) {
        let notification = Notification {
            session_id: session_id.to_string(),
            seq: seq.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            event,
        };
        self.notifier.notify(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::WorkType;
    use crate::infrastructure::api_client::ProfileFetch;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted API client: pops one canned response per call, falling back
    /// to a success with the given unit count.
    struct ScriptedClient {
        responses: Mutex<HashMap<String, Vec<Result<ProfileFetch, RawFailure>>>>,
        default_units: u32,
        default_cost: f64,
        call_delay: Duration,
    }

    impl ScriptedClient {
        fn succeeding(units: u32, cost: f64) -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                default_units: units,
                default_cost: cost,
                call_delay: Duration::ZERO,
            }
        }

        fn with_call_delay(mut self, delay: Duration) -> Self {
            self.call_delay = delay;
            self
        }

        fn script(self, account: &str, responses: Vec<Result<ProfileFetch, RawFailure>>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(account.to_string(), responses);
            self
        }
    }

    #[async_trait]
    impl ProfileApiClient for ScriptedClient {
        async fn fetch_profile(
            &self,
            identifier: &str,
            _options: &FetchOptions,
        ) -> Result<ProfileFetch, RawFailure> {
            if !self.call_delay.is_zero() {
                sleep(self.call_delay).await;
            }
            {
                let mut responses = self.responses.lock().unwrap();
                if let Some(queue) = responses.get_mut(identifier) {
                    if !queue.is_empty() {
                        return queue.remove(0);
                    }
                }
            }
            Ok(ProfileFetch {
                data: serde_json::json!({"id": identifier}),
                request_units: self.default_units,
                cost_usd: self.default_cost,
            })
        }
    }

    /// Sink that retains everything it saw.
    #[derive(Default)]
    struct CollectingSink {
        notifications: Mutex<Vec<Notification>>,
    }

    impl NotificationSink for CollectingSink {
        fn notify(&self, notification: Notification) {
            self.notifications.lock().unwrap().push(notification);
        }
    }

    fn fast_app_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.scraping.request_delay_ms = 0;
        config.scraping.call_timeout_seconds = 5;
        config.batch.batch_size = 3;
        config
    }

    fn orchestrator_with(
        client: ScriptedClient,
        sink: Arc<CollectingSink>,
    ) -> BulkOrchestrator {
        BulkOrchestrator::new(
            Arc::new(client),
            sink,
            fast_app_config(),
            SharedRng::seeded(11),
        )
    }

    fn accounts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("acct-{i}")).collect()
    }

    fn auth_failure() -> RawFailure {
        RawFailure::Http {
            status: 401,
            message: "unauthorized".into(),
        }
    }

    fn quota_failure() -> RawFailure {
        RawFailure::Http {
            status: 402,
            message: "monthly quota exhausted".into(),
        }
    }

    fn rate_limit_failure() -> RawFailure {
        RawFailure::Http {
            status: 429,
            message: "rate limit exceeded".into(),
        }
    }

    #[tokio::test]
    async fn happy_path_completes_and_accumulates_cost() {
        let sink = Arc::new(CollectingSink::default());
        let orchestrator =
            orchestrator_with(ScriptedClient::succeeding(2, 0.001), Arc::clone(&sink));

        let summary = orchestrator
            .create_and_execute(BulkJobRequest::new("profile_snapshot", accounts(5)))
            .await
            .unwrap();

        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.request_units, 10);
        assert!((summary.actual_cost_usd - 0.005).abs() < 1e-9);
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn invalid_config_fails_before_any_session_exists() {
        let sink = Arc::new(CollectingSink::default());
        let orchestrator =
            orchestrator_with(ScriptedClient::succeeding(1, 0.001), Arc::clone(&sink));

        let mut request = BulkJobRequest::new("profile_snapshot", accounts(3));
        request.batch_size = Some(99);
        let err = orchestrator.create_and_execute(request).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
        assert_eq!(orchestrator.sessions().stats().await.total_sessions, 0);
    }

    #[tokio::test]
    async fn auth_failures_skip_only_the_affected_item() {
        let sink = Arc::new(CollectingSink::default());
        let client = ScriptedClient::succeeding(1, 0.001)
            .script("acct-2", vec![Err(auth_failure())]);
        let orchestrator = orchestrator_with(client, Arc::clone(&sink));

        let summary = orchestrator
            .create_and_execute(BulkJobRequest::new("profile_snapshot", accounts(3)))
            .await
            .unwrap();

        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].account_id, "acct-2");
        assert!(summary.errors[0].message.contains("AUTHENTICATION_ERROR"));
    }

    #[tokio::test]
    async fn critical_quota_failure_cancels_the_whole_session() {
        let sink = Arc::new(CollectingSink::default());
        let client = ScriptedClient::succeeding(1, 0.001)
            .script("acct-1", vec![Err(quota_failure())]);
        let orchestrator = orchestrator_with(client, Arc::clone(&sink));

        let summary = orchestrator
            .create_and_execute(BulkJobRequest::new("follower_scrape", accounts(6)))
            .await
            .unwrap();

        assert_eq!(summary.status, SessionStatus::Cancelled);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 1);
        // The remaining five items were never attempted.
        assert_eq!(summary.errors.len(), 1);
    }

    #[tokio::test]
    async fn cost_overrun_halts_between_batches_with_partial_totals() {
        let sink = Arc::new(CollectingSink::default());
        // 12 snapshot items at unit price 0.001 estimate to $0.012; each call
        // actually costs $0.01, so the first batch of 3 already exceeds 1.5x.
        let orchestrator =
            orchestrator_with(ScriptedClient::succeeding(1, 0.01), Arc::clone(&sink));

        let summary = orchestrator
            .create_and_execute(BulkJobRequest::new("profile_snapshot", accounts(12)))
            .await
            .unwrap();

        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.succeeded, 3, "only the first batch may run");
        assert!(summary.actual_cost_usd >= summary.estimated_cost_usd * 1.5);

        let notifications = sink.notifications.lock().unwrap();
        assert!(notifications.iter().any(|n| matches!(
            &n.event,
            AppEvent::StateChanged { reason: Some(r), .. } if r.contains("cost")
        )));
    }

    #[tokio::test]
    async fn notifications_are_sequenced_per_session() {
        let sink = Arc::new(CollectingSink::default());
        let orchestrator =
            orchestrator_with(ScriptedClient::succeeding(1, 0.001), Arc::clone(&sink));

        orchestrator
            .create_and_execute(BulkJobRequest::new("profile_snapshot", accounts(4)))
            .await
            .unwrap();

        let notifications = sink.notifications.lock().unwrap();
        let seqs: Vec<u64> = notifications.iter().map(|n| n.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort_unstable();
        assert_eq!(seqs, sorted, "per-session seq must be monotonic");
        assert!(notifications.iter().any(|n| matches!(
            n.event,
            AppEvent::ProgressUpdate { .. }
        )));
        assert!(notifications.iter().any(|n| matches!(
            n.event,
            AppEvent::CostUpdate { .. }
        )));
        assert!(notifications.iter().any(|n| matches!(
            n.event,
            AppEvent::SessionCompleted { .. }
        )));
    }

    #[tokio::test]
    async fn executing_an_unknown_session_fails() {
        let sink = Arc::new(CollectingSink::default());
        let orchestrator =
            orchestrator_with(ScriptedClient::succeeding(1, 0.001), Arc::clone(&sink));
        let err = orchestrator.execute("missing").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn stopping_mid_run_is_observed_at_an_item_boundary() {
        let sink = Arc::new(CollectingSink::default());
        let orchestrator = Arc::new(orchestrator_with(
            ScriptedClient::succeeding(1, 0.001).with_call_delay(Duration::from_millis(20)),
            Arc::clone(&sink),
        ));

        let session_id = orchestrator
            .create_job(BulkJobRequest::new("profile_snapshot", accounts(30)))
            .await
            .unwrap();

        let sessions = orchestrator.sessions();
        let runner = {
            let orchestrator = Arc::clone(&orchestrator);
            let session_id = session_id.clone();
            tokio::spawn(async move { orchestrator.execute(&session_id).await })
        };

        // Wait until the session is running, then stop it.
        loop {
            match sessions.status_of(&session_id).await {
                Some(SessionStatus::Running) => break,
                Some(SessionStatus::Pending) | Some(SessionStatus::Initializing) | None => {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                other => panic!("session reached {other:?} before it could be stopped"),
            }
        }
        sessions
            .apply_action(&session_id, SessionAction::Stop)
            .await
            .unwrap();

        let summary = runner.await.unwrap().unwrap();
        assert_eq!(summary.status, SessionStatus::Cancelled);
        assert!(summary.succeeded < 30);
    }

    #[tokio::test(start_paused = true)]
    async fn per_job_rate_limit_override_drives_the_cooldown() {
        // Two fully successful batches of 3 with a 1/s limit must serve a
        // cool-down after each batch; the ambient 5/s default never would.
        let sink = Arc::new(CollectingSink::default());
        let orchestrator =
            orchestrator_with(ScriptedClient::succeeding(1, 0.001), Arc::clone(&sink));

        let mut request = BulkJobRequest::new("profile_snapshot", accounts(6));
        request.rate_limit_per_sec = Some(1);

        let started = tokio::time::Instant::now();
        let summary = orchestrator.create_and_execute(request).await.unwrap();
        let throttled = started.elapsed();

        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.succeeded, 6);
        assert!(
            throttled >= RATE_LIMIT_COOLDOWN,
            "cool-down never served: {throttled:?}"
        );

        // The same job without the override stays under the 5/s budget.
        let started = tokio::time::Instant::now();
        orchestrator
            .create_and_execute(BulkJobRequest::new("profile_snapshot", accounts(6)))
            .await
            .unwrap();
        assert!(started.elapsed() < RATE_LIMIT_COOLDOWN);
    }

    #[tokio::test(start_paused = true)]
    async fn a_rate_limit_pause_resumes_and_the_run_continues() {
        let sink = Arc::new(CollectingSink::default());
        let client = ScriptedClient::succeeding(1, 0.001)
            .script("acct-1", vec![Err(rate_limit_failure())]);
        let orchestrator = orchestrator_with(client, Arc::clone(&sink));

        let summary = orchestrator
            .create_and_execute(BulkJobRequest::new("profile_snapshot", accounts(6)))
            .await
            .unwrap();

        // The first batch is abandoned at the failing item; the second batch
        // runs to completion after the pause is waited out.
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].message.contains("RATE_LIMIT"));

        let notifications = sink.notifications.lock().unwrap();
        assert!(notifications.iter().any(|n| matches!(
            n.event,
            AppEvent::StateChanged {
                to: SessionStatus::Paused,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_rate_limits_park_the_session() {
        let sink = Arc::new(CollectingSink::default());
        let client = ScriptedClient::succeeding(1, 0.001)
            .script("acct-1", vec![Err(rate_limit_failure())])
            .script("acct-4", vec![Err(rate_limit_failure())])
            .script("acct-7", vec![Err(rate_limit_failure())]);
        let orchestrator = orchestrator_with(client, Arc::clone(&sink));

        let summary = orchestrator
            .create_and_execute(BulkJobRequest::new("profile_snapshot", accounts(9)))
            .await
            .unwrap();

        // Each batch opens with a throttled item; the third strike parks the
        // session instead of pausing again.
        assert_eq!(summary.status, SessionStatus::RateLimited);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.succeeded, 0);

        let session_id = summary.session_id;
        assert_eq!(
            orchestrator.sessions().status_of(&session_id).await,
            Some(SessionStatus::RateLimited)
        );
    }

    #[tokio::test]
    async fn work_type_stats_are_fed_after_each_run() {
        let sink = Arc::new(CollectingSink::default());
        let client = ScriptedClient::succeeding(1, 0.001)
            .script("acct-1", vec![Err(auth_failure())]);
        let orchestrator = orchestrator_with(client, Arc::clone(&sink));

        orchestrator
            .create_and_execute(BulkJobRequest::new("engagement_scan", accounts(4)))
            .await
            .unwrap();

        let stats = orchestrator.work_type_stats();
        let rate = stats.error_rate(WorkType::EngagementScan);
        assert!((rate - 0.25).abs() < 1e-9);
    }
}
