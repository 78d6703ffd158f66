//! In-memory session state management for bulk scraping jobs
//!
//! The [`SessionManager`] is the single authority over session lifecycle:
//! every status change flows through its transition API, and the valid
//! action set for each status is fixed by [`SessionStatus::valid_actions`].
//! The orchestrator drives the internal `Initializing -> Running` edge via
//! [`SessionManager::mark_running`]; the external control surface only ever
//! sees the five [`SessionAction`]s.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::scrape_error::ScrapingError;

/// Kinds of bulk scraping work this engine knows how to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkType {
    ProfileSnapshot,
    FollowerScrape,
    EngagementScan,
    PostHistory,
}

impl WorkType {
    pub const ALL: [WorkType; 4] = [
        WorkType::ProfileSnapshot,
        WorkType::FollowerScrape,
        WorkType::EngagementScan,
        WorkType::PostHistory,
    ];

    /// Rough request-unit estimate for one item of this work type, used for
    /// up-front cost estimation.
    pub fn estimated_units_per_item(self) -> u32 {
        match self {
            WorkType::ProfileSnapshot => 1,
            WorkType::EngagementScan => 3,
            WorkType::FollowerScrape => 5,
            WorkType::PostHistory => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkType::ProfileSnapshot => "profile_snapshot",
            WorkType::FollowerScrape => "follower_scrape",
            WorkType::EngagementScan => "engagement_scan",
            WorkType::PostHistory => "post_history",
        }
    }
}

impl std::str::FromStr for WorkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile_snapshot" => Ok(WorkType::ProfileSnapshot),
            "follower_scrape" => Ok(WorkType::FollowerScrape),
            "engagement_scan" => Ok(WorkType::EngagementScan),
            "post_history" => Ok(WorkType::PostHistory),
            other => Err(format!("unknown work type: {other}")),
        }
    }
}

impl std::fmt::Display for WorkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session lifecycle status. `Pending` subsumes the legacy IDLE entry state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Pending,
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    RateLimited,
}

impl SessionStatus {
    /// External actions accepted in this status.
    pub fn valid_actions(self) -> &'static [SessionAction] {
        match self {
            SessionStatus::Pending => &[SessionAction::Start],
            SessionStatus::Initializing => &[SessionAction::Stop],
            SessionStatus::Running => &[SessionAction::Pause, SessionAction::Stop],
            SessionStatus::Paused => &[SessionAction::Resume, SessionAction::Stop],
            SessionStatus::Completed => &[],
            SessionStatus::Failed | SessionStatus::Cancelled | SessionStatus::RateLimited => {
                &[SessionAction::Retry, SessionAction::Start]
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// External session control actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionAction {
    Start,
    Pause,
    Resume,
    Stop,
    Retry,
}

/// Job priority carried in the session configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Snapshot of the configuration a session was created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub batch_size: u32,
    pub max_concurrency: u32,
    pub cost_limit_usd: f64,
    pub priority: JobPriority,
    pub rate_limit_per_sec: u32,
    /// What triggered the job (manual, schedule name, webhook id).
    pub trigger: Option<String>,
}

/// Progress counters, mutated only through the session manager.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionProgress {
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub request_units: u32,
    pub actual_cost_usd: f64,
}

/// One bulk job instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub work_type: WorkType,
    pub status: SessionStatus,
    /// Ordered target account ids.
    pub targets: Vec<String>,
    pub config: SessionConfig,
    pub progress: SessionProgress,
    pub estimated_cost_usd: f64,
    pub error_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One failed item in the final job summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub account_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ItemFailure {
    pub fn from_error(account_id: &str, error: &ScrapingError) -> Self {
        Self {
            account_id: account_id.to_string(),
            message: format!("{}: {}", error.error_type, error.message),
            timestamp: error.timestamp,
        }
    }
}

/// Final result of one executed bulk job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub request_units: u32,
    pub actual_cost_usd: f64,
    pub estimated_cost_usd: f64,
    pub duration_ms: u64,
    /// Ordered per-item failures accumulated during the run.
    pub errors: Vec<ItemFailure>,
}

/// Session lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("invalid transition: action {action:?} is not allowed while session is {status}")]
    InvalidTransition {
        status: SessionStatus,
        action: SessionAction,
    },

    #[error("internal transition rejected: session is {status}, expected {expected}")]
    InternalTransition {
        status: SessionStatus,
        expected: SessionStatus,
    },
}

/// Per-status counts for monitoring.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub sessions_by_status: HashMap<SessionStatus, usize>,
}

/// Thread-safe in-memory session authority.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session in `Pending` status and return its id.
    pub async fn create_session(
        &self,
        work_type: WorkType,
        targets: Vec<String>,
        config: SessionConfig,
        estimated_cost_usd: f64,
    ) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            id: session_id.clone(),
            work_type,
            status: SessionStatus::Pending,
            targets,
            config,
            progress: SessionProgress::default(),
            estimated_cost_usd,
            error_count: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };

        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.clone(), session);
        tracing::info!("📋 Created session {session_id} ({work_type})");
        session_id
    }

    /// Apply an external control action, enforcing the transition table.
    pub async fn apply_action(
        &self,
        session_id: &str,
        action: SessionAction,
    ) -> Result<SessionStatus, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        if !session.status.valid_actions().contains(&action) {
            return Err(SessionError::InvalidTransition {
                status: session.status,
                action,
            });
        }

        let now = Utc::now();
        let next = match action {
            SessionAction::Start => {
                session.progress = SessionProgress::default();
                session.started_at = Some(now);
                session.ended_at = None;
                SessionStatus::Initializing
            }
            SessionAction::Pause => SessionStatus::Paused,
            SessionAction::Resume => SessionStatus::Running,
            SessionAction::Stop => {
                session.ended_at = Some(now);
                SessionStatus::Cancelled
            }
            SessionAction::Retry => {
                session.error_count = 0;
                session.ended_at = None;
                SessionStatus::Pending
            }
        };

        tracing::info!(
            "🔀 Session {session_id}: {:?} -> {:?} ({:?})",
            session.status,
            next,
            action
        );
        session.status = next;
        Ok(next)
    }

    /// Orchestrator-only edge: a started session begins its first batch.
    pub async fn mark_running(&self, session_id: &str) -> Result<(), SessionError> {
        self.internal_transition(session_id, SessionStatus::Initializing, SessionStatus::Running)
            .await
    }

    /// Park a session that gave up because of repeated rate limiting.
    pub async fn mark_rate_limited(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.status = SessionStatus::RateLimited;
        session.ended_at = Some(Utc::now());
        tracing::warn!("⏳ Session {session_id} parked as RateLimited");
        Ok(())
    }

    /// Finish a session with a terminal-ish status (Completed or Failed).
    pub async fn finish(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.status = status;
        session.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Replace the progress counters with a fresh aggregate.
    pub async fn update_progress(
        &self,
        session_id: &str,
        progress: SessionProgress,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.progress = progress;
        Ok(())
    }

    /// Record one item-level error against the session.
    pub async fn add_error(&self, session_id: &str, message: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.error_count += 1;
        tracing::debug!("Session {session_id} error #{}: {message}", session.error_count);
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    pub async fn status_of(&self, session_id: &str) -> Option<SessionStatus> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|s| s.status)
    }

    /// Sessions currently in a live state (Initializing/Running/Paused).
    pub async fn active_session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    SessionStatus::Initializing | SessionStatus::Running | SessionStatus::Paused
                )
            })
            .count()
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let mut by_status = HashMap::new();
        for session in sessions.values() {
            *by_status.entry(session.status).or_insert(0) += 1;
        }
        SessionStats {
            total_sessions: sessions.len(),
            sessions_by_status: by_status,
        }
    }

    /// Drop a finished session from memory.
    pub async fn remove_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        tracing::info!("Removed session from memory: {session_id}");
    }

    async fn internal_transition(
        &self,
        session_id: &str,
        expected: SessionStatus,
        next: SessionStatus,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if session.status != expected {
            return Err(SessionError::InternalTransition {
                status: session.status,
                expected,
            });
        }
        session.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            batch_size: 10,
            max_concurrency: 2,
            cost_limit_usd: 5.0,
            priority: JobPriority::Normal,
            rate_limit_per_sec: 5,
            trigger: None,
        }
    }

    #[tokio::test]
    async fn start_moves_pending_to_initializing_and_resets_progress() {
        let manager = SessionManager::new();
        let id = manager
            .create_session(
                WorkType::ProfileSnapshot,
                vec!["a".into(), "b".into()],
                config(),
                1.0,
            )
            .await;

        let status = manager.apply_action(&id, SessionAction::Start).await.unwrap();
        assert_eq!(status, SessionStatus::Initializing);

        let session = manager.get_session(&id).await.unwrap();
        assert!(session.started_at.is_some());
        assert_eq!(session.progress.completed, 0);
    }

    #[tokio::test]
    async fn pause_from_pending_is_rejected_with_descriptive_error() {
        let manager = SessionManager::new();
        let id = manager
            .create_session(WorkType::PostHistory, vec!["a".into()], config(), 1.0)
            .await;

        let err = manager
            .apply_action(&id, SessionAction::Pause)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Pause"), "got: {msg}");
        assert!(msg.contains("Pending"), "got: {msg}");
    }

    #[tokio::test]
    async fn full_lifecycle_start_run_pause_resume_stop() {
        let manager = SessionManager::new();
        let id = manager
            .create_session(WorkType::FollowerScrape, vec!["a".into()], config(), 1.0)
            .await;

        manager.apply_action(&id, SessionAction::Start).await.unwrap();
        manager.mark_running(&id).await.unwrap();
        assert_eq!(manager.status_of(&id).await, Some(SessionStatus::Running));

        manager.apply_action(&id, SessionAction::Pause).await.unwrap();
        manager.apply_action(&id, SessionAction::Resume).await.unwrap();
        let status = manager.apply_action(&id, SessionAction::Stop).await.unwrap();
        assert_eq!(status, SessionStatus::Cancelled);

        // Cancelled sessions are recoverable through Retry.
        let status = manager.apply_action(&id, SessionAction::Retry).await.unwrap();
        assert_eq!(status, SessionStatus::Pending);
        assert_eq!(manager.get_session(&id).await.unwrap().error_count, 0);
    }

    #[tokio::test]
    async fn completed_sessions_accept_no_actions() {
        let manager = SessionManager::new();
        let id = manager
            .create_session(WorkType::EngagementScan, vec!["a".into()], config(), 1.0)
            .await;
        manager.finish(&id, SessionStatus::Completed).await.unwrap();

        for action in [
            SessionAction::Start,
            SessionAction::Pause,
            SessionAction::Resume,
            SessionAction::Stop,
            SessionAction::Retry,
        ] {
            assert!(manager.apply_action(&id, action).await.is_err());
        }
    }

    #[tokio::test]
    async fn mark_running_requires_initializing() {
        let manager = SessionManager::new();
        let id = manager
            .create_session(WorkType::ProfileSnapshot, vec!["a".into()], config(), 1.0)
            .await;
        assert!(manager.mark_running(&id).await.is_err());
    }

    #[tokio::test]
    async fn active_count_covers_live_states_only() {
        let manager = SessionManager::new();
        let a = manager
            .create_session(WorkType::ProfileSnapshot, vec!["a".into()], config(), 1.0)
            .await;
        let b = manager
            .create_session(WorkType::ProfileSnapshot, vec!["b".into()], config(), 1.0)
            .await;

        assert_eq!(manager.active_session_count().await, 0);
        manager.apply_action(&a, SessionAction::Start).await.unwrap();
        assert_eq!(manager.active_session_count().await, 1);
        manager.finish(&b, SessionStatus::Failed).await.unwrap();
        assert_eq!(manager.active_session_count().await, 1);
    }
}
