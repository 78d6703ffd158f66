//! Failure classification into the scraping error taxonomy
//!
//! Turns a normalized [`RawFailure`] into a typed [`ScrapingError`]. Rules
//! are evaluated in order and the first match wins, so classification is a
//! pure, idempotent function of the failure.

use std::time::Duration;

use chrono::Utc;

use crate::domain::scrape_error::{
    ErrorType, RawFailure, RunContext, ScrapingError, Severity, TransportKind,
};

/// Stateless first-match-wins failure classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one raw failure in the given run context.
    pub fn classify(&self, failure: &RawFailure, ctx: &RunContext) -> ScrapingError {
        let status = failure.status();
        let code = failure.code();
        let message = failure.message().to_lowercase();

        // 1. Rate limiting
        if status == Some(429)
            || message.contains("rate limit")
            || code == Some("RATE_LIMITED")
        {
            return self.build(
                failure,
                ctx,
                ErrorType::RateLimit,
                Severity::Medium,
                true,
                Duration::from_secs(60),
                5,
            );
        }

        // 2. Authentication / authorization
        if matches!(status, Some(401 | 403)) || message.contains("unauthorized") {
            return self.build(
                failure,
                ctx,
                ErrorType::AuthenticationError,
                Severity::High,
                false,
                Duration::ZERO,
                0,
            );
        }

        // 3. Quota / budget exhaustion
        if status == Some(402) || message.contains("quota") || message.contains("budget") {
            return self.build(
                failure,
                ctx,
                ErrorType::QuotaExceeded,
                Severity::Critical,
                false,
                Duration::ZERO,
                0,
            );
        }

        // 4. Timeouts and connection resets
        if matches!(
            failure,
            RawFailure::Transport {
                kind: TransportKind::Timeout | TransportKind::ConnectionReset,
                ..
            }
        ) {
            return self.build(
                failure,
                ctx,
                ErrorType::TimeoutError,
                Severity::Medium,
                true,
                Duration::from_secs(10),
                3,
            );
        }

        // 5. DNS / connection refused / server-side failures
        if matches!(
            failure,
            RawFailure::Transport {
                kind: TransportKind::Dns | TransportKind::ConnectionRefused | TransportKind::Tls,
                ..
            }
        ) || status.is_some_and(|s| s >= 500)
        {
            return self.build(
                failure,
                ctx,
                ErrorType::NetworkError,
                Severity::Medium,
                true,
                Duration::from_secs(30),
                5,
            );
        }

        // 6. Remaining client-side HTTP errors. Only 408/409 make sense to
        // retry (request timeout and transient conflict).
        if let Some(s) = status {
            if (400..500).contains(&s) {
                let retryable = s == 408 || s == 409;
                return self.build(
                    failure,
                    ctx,
                    ErrorType::ApiError,
                    Severity::High,
                    retryable,
                    if retryable { Duration::from_secs(5) } else { Duration::ZERO },
                    if retryable { 3 } else { 0 },
                );
            }
        }

        // 7. Response body the client could not make sense of
        if message.contains("parse")
            || message.contains("unexpected token")
            || message.contains("invalid json")
        {
            return self.build(
                failure,
                ctx,
                ErrorType::ParsingError,
                Severity::Low,
                true,
                Duration::from_secs(5),
                2,
            );
        }

        // 8. Fallback
        self.build(
            failure,
            ctx,
            ErrorType::UnknownError,
            Severity::Medium,
            true,
            Duration::from_secs(15),
            2,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        failure: &RawFailure,
        ctx: &RunContext,
        error_type: ErrorType,
        severity: Severity,
        retryable: bool,
        suggested_delay: Duration,
        max_retries: u32,
    ) -> ScrapingError {
        let code = match failure {
            RawFailure::Http { status, .. } => status.to_string(),
            RawFailure::Api { code, .. } => code.clone(),
            RawFailure::Transport { kind, .. } => format!("{kind:?}").to_uppercase(),
            RawFailure::Other { .. } => error_type.to_string(),
        };

        ScrapingError {
            error_type,
            severity,
            code,
            message: failure.message().to_string(),
            timestamp: Utc::now(),
            session_id: ctx.session_id.clone(),
            account_id: ctx.account_id.clone(),
            retryable,
            suggested_delay,
            max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn http(status: u16) -> RawFailure {
        RawFailure::Http {
            status,
            message: format!("upstream returned {status}"),
        }
    }

    #[test]
    fn status_429_is_rate_limit_with_five_retries() {
        let err = ErrorClassifier::new().classify(&http(429), &RunContext::default());
        assert_eq!(err.error_type, ErrorType::RateLimit);
        assert!(err.retryable);
        assert_eq!(err.max_retries, 5);
        assert_eq!(err.suggested_delay, Duration::from_secs(60));
    }

    #[rstest]
    #[case(http(401), ErrorType::AuthenticationError, Severity::High, false)]
    #[case(http(403), ErrorType::AuthenticationError, Severity::High, false)]
    #[case(http(402), ErrorType::QuotaExceeded, Severity::Critical, false)]
    #[case(http(500), ErrorType::NetworkError, Severity::Medium, true)]
    #[case(http(503), ErrorType::NetworkError, Severity::Medium, true)]
    #[case(http(404), ErrorType::ApiError, Severity::High, false)]
    #[case(http(409), ErrorType::ApiError, Severity::High, true)]
    #[case(http(408), ErrorType::ApiError, Severity::High, true)]
    fn http_status_rules(
        #[case] failure: RawFailure,
        #[case] expected_type: ErrorType,
        #[case] expected_severity: Severity,
        #[case] retryable: bool,
    ) {
        let err = ErrorClassifier::new().classify(&failure, &RunContext::default());
        assert_eq!(err.error_type, expected_type);
        assert_eq!(err.severity, expected_severity);
        assert_eq!(err.retryable, retryable);
    }

    #[rstest]
    #[case(TransportKind::Timeout, ErrorType::TimeoutError)]
    #[case(TransportKind::ConnectionReset, ErrorType::TimeoutError)]
    #[case(TransportKind::ConnectionRefused, ErrorType::NetworkError)]
    #[case(TransportKind::Dns, ErrorType::NetworkError)]
    #[case(TransportKind::Tls, ErrorType::NetworkError)]
    fn transport_rules(#[case] kind: TransportKind, #[case] expected: ErrorType) {
        let failure = RawFailure::Transport {
            kind,
            message: "boom".into(),
        };
        let err = ErrorClassifier::new().classify(&failure, &RunContext::default());
        assert_eq!(err.error_type, expected);
    }

    #[test]
    fn symbolic_rate_limit_code_matches_before_anything_else() {
        let failure = RawFailure::Api {
            code: "RATE_LIMITED".into(),
            message: "slow down".into(),
        };
        let err = ErrorClassifier::new().classify(&failure, &RunContext::default());
        assert_eq!(err.error_type, ErrorType::RateLimit);
        assert_eq!(err.code, "RATE_LIMITED");
    }

    #[test]
    fn parse_failures_classify_as_parsing_error() {
        let failure = RawFailure::Other {
            message: "failed to parse response body".into(),
        };
        let err = ErrorClassifier::new().classify(&failure, &RunContext::default());
        assert_eq!(err.error_type, ErrorType::ParsingError);
        assert_eq!(err.severity, Severity::Low);
        assert_eq!(err.max_retries, 2);
    }

    #[test]
    fn unknown_fallback_is_retryable_twice() {
        let failure = RawFailure::Other {
            message: "something odd happened".into(),
        };
        let err = ErrorClassifier::new().classify(&failure, &RunContext::default());
        assert_eq!(err.error_type, ErrorType::UnknownError);
        assert!(err.retryable);
        assert_eq!(err.max_retries, 2);
        assert_eq!(err.suggested_delay, Duration::from_secs(15));
    }

    #[test]
    fn classification_is_idempotent() {
        let classifier = ErrorClassifier::new();
        let failure = RawFailure::Http {
            status: 429,
            message: "rate limit exceeded".into(),
        };
        let ctx = RunContext::for_item("s1", "acct-1");
        let first = classifier.classify(&failure, &ctx);
        for _ in 0..5 {
            let again = classifier.classify(&failure, &ctx);
            assert_eq!(again.error_type, first.error_type);
            assert_eq!(again.severity, first.severity);
            assert_eq!(again.retryable, first.retryable);
        }
    }

    #[test]
    fn context_is_carried_into_the_error() {
        let err = ErrorClassifier::new().classify(&http(500), &RunContext::for_item("s9", "acct-3"));
        assert_eq!(err.session_id.as_deref(), Some("s9"));
        assert_eq!(err.account_id.as_deref(), Some("acct-3"));
    }
}
