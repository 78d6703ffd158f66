//! Infrastructure layer - External boundaries and stateful services
//!
//! This module holds everything the engine needs around its domain core:
//! the upstream API client, error classification and history, account
//! health, recovery planning, slot bookkeeping, notifications, ambient
//! configuration, and logging.

pub mod allocator;
pub mod api_client;
pub mod classifier;
pub mod config;
pub mod health;
pub mod logging;
pub mod notifier;
pub mod patterns;
pub mod recovery;
pub mod registry;

// Re-export commonly used items
pub use api_client::{HttpProfileApiClient, ProfileApiClient};
pub use classifier::ErrorClassifier;
pub use config::AppConfig;
