//! Scraping error taxonomy and the normalized raw-failure boundary type
//!
//! Every failure coming back from the upstream profile API is normalized
//! into a single [`RawFailure`] tagged union at the client edge, then turned
//! into a typed [`ScrapingError`] by the classifier. A `ScrapingError` is
//! immutable once created.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The eight per-item error types produced by classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorType {
    RateLimit,
    AuthenticationError,
    QuotaExceeded,
    TimeoutError,
    NetworkError,
    ApiError,
    ParsingError,
    UnknownError,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorType::RateLimit => "RATE_LIMIT",
            ErrorType::AuthenticationError => "AUTHENTICATION_ERROR",
            ErrorType::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorType::TimeoutError => "TIMEOUT_ERROR",
            ErrorType::NetworkError => "NETWORK_ERROR",
            ErrorType::ApiError => "API_ERROR",
            ErrorType::ParsingError => "PARSING_ERROR",
            ErrorType::UnknownError => "UNKNOWN_ERROR",
        };
        write!(f, "{s}")
    }
}

/// Error severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A classified per-item scraping failure.
///
/// Carries everything the recovery planner needs to decide what to do next:
/// the type/severity pair, whether a retry makes sense at all, and the
/// type-specific retry budget and base delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingError {
    pub error_type: ErrorType,
    pub severity: Severity,
    /// Numeric HTTP status or a symbolic upstream code, as a string.
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub account_id: Option<String>,
    pub retryable: bool,
    pub suggested_delay: Duration,
    pub max_retries: u32,
}

/// Transport-level failure kinds observed below the HTTP layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    ConnectionReset,
    ConnectionRefused,
    Dns,
    Tls,
}

/// Normalized upstream failure, produced at the API-client edge.
///
/// The upstream surfaces failures in several shapes (HTTP status responses,
/// transport errors, structured API error bodies). They are all folded into
/// this one tagged union before classification so the classifier never has
/// to duck-type across shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RawFailure {
    Http { status: u16, message: String },
    Transport { kind: TransportKind, message: String },
    Api { code: String, message: String },
    Other { message: String },
}

impl RawFailure {
    /// HTTP status, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RawFailure::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Symbolic upstream error code, when present.
    pub fn code(&self) -> Option<&str> {
        match self {
            RawFailure::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RawFailure::Http { message, .. }
            | RawFailure::Transport { message, .. }
            | RawFailure::Api { message, .. }
            | RawFailure::Other { message } => message,
        }
    }
}

impl std::fmt::Display for RawFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawFailure::Http { status, message } => write!(f, "HTTP {status}: {message}"),
            RawFailure::Transport { kind, message } => write!(f, "transport {kind:?}: {message}"),
            RawFailure::Api { code, message } => write!(f, "API {code}: {message}"),
            RawFailure::Other { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for RawFailure {}

/// Run context attached to a classification call.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub session_id: Option<String>,
    pub account_id: Option<String>,
}

impl RunContext {
    pub fn for_item(session_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            account_id: Some(account_id.into()),
        }
    }
}
