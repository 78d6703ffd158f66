//! cloneflow - Bulk social-profile scraping orchestration engine
//!
//! The engine runs bulk profile-scraping jobs against an upstream profile
//! API: it validates job requests, assesses their risk, allocates device
//! slots to accounts, and drives each job through a session state machine
//! with error classification, pattern analysis, health-aware recovery, and
//! cost control along the way.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod utils;

// Re-export the primary entry points
pub use application::{BulkJobRequest, BulkOrchestrator, SessionRiskAssessor};
pub use domain::{SessionAction, SessionManager, SessionStatus, WorkType};
pub use infrastructure::{AppConfig, ErrorClassifier, HttpProfileApiClient};
