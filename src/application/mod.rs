//! Application layer - Job validation, risk assessment, and orchestration
//!
//! This module coordinates the domain and infrastructure layers: it turns
//! raw bulk-job requests into validated configurations, scores prospective
//! jobs, and drives accepted jobs through the session state machine.

pub mod config;
pub mod orchestrator;
pub mod risk;

// Re-export commonly used items
pub use config::{BulkJobRequest, ValidatedBulkConfig};
pub use orchestrator::BulkOrchestrator;
pub use risk::{RiskAssessment, RiskLevel, SessionRiskAssessor};
