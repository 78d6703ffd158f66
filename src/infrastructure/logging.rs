//! Logging initialization
//!
//! Console logging through tracing-subscriber with an env-filter, plus an
//! optional daily-rotated file appender. The non-blocking writer guard must
//! outlive the process, so it is parked in a global.

use anyhow::Result;
use lazy_static::lazy_static;
use std::sync::Mutex;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use super::config::LoggingSettings;

lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    let console_layer = fmt::layer().with_target(true);

    if settings.file_enabled {
        let dir = settings
            .directory
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("logs"));
        let appender = rolling::daily(dir, "cloneflow.log");
        let (writer, guard) = non_blocking(appender);
        LOG_GUARDS
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(guard);

        let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
        Registry::default()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;
    } else {
        Registry::default()
            .with(filter)
            .with(console_layer)
            .try_init()?;
    }

    tracing::info!("🚀 Logging initialized (level: {})", settings.level);
    Ok(())
}
