//! Notification events emitted by the orchestrator
//!
//! Events are best-effort and fire-and-forget. The only ordering guarantee
//! is the per-session monotonic `seq` in the [`Notification`] envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{JobSummary, SessionStatus};

/// Session-scoped events published to the notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppEvent {
    ProgressUpdate {
        completed: u32,
        failed: u32,
        skipped: u32,
        total: u32,
        percentage: f64,
    },

    CostUpdate {
        request_units: u32,
        actual_cost_usd: f64,
        estimated_cost_usd: f64,
    },

    StateChanged {
        from: SessionStatus,
        to: SessionStatus,
        reason: Option<String>,
    },

    SessionCompleted {
        summary: JobSummary,
    },
}

/// Envelope carrying one event, sequenced per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub session_id: String,
    /// Monotonically increasing within one session.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: AppEvent,
}
