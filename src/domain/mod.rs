//! Domain module - Core types and session lifecycle
//!
//! This module contains the domain entities of the engine: classified
//! errors, slot and account records, the session state machine, and the
//! notification events it emits.

pub mod events;
pub mod scrape_error;
pub mod session;
pub mod slot;

// Re-export commonly used items
pub use scrape_error::{ErrorType, RawFailure, RunContext, ScrapingError, Severity};
pub use session::{JobSummary, Session, SessionAction, SessionManager, SessionStatus, WorkType};
