//! Upstream profile API client boundary
//!
//! The engine talks to the external profile API only through the
//! [`ProfileApiClient`] trait. The concrete reqwest-backed client lives
//! here, and it is the single place where upstream failures of any shape
//! (HTTP status responses, transport errors, structured error bodies) are
//! normalized into [`RawFailure`] before classification.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::domain::scrape_error::{RawFailure, TransportKind};
use crate::domain::session::WorkType;

/// Options for one profile fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    pub work_type: WorkType,
}

/// One successful upstream fetch with its billing figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileFetch {
    pub data: serde_json::Value,
    /// Upstream billing units consumed by this call.
    pub request_units: u32,
    pub cost_usd: f64,
}

/// Async boundary to the upstream profile API.
#[async_trait]
pub trait ProfileApiClient: Send + Sync {
    async fn fetch_profile(
        &self,
        identifier: &str,
        options: &FetchOptions,
    ) -> Result<ProfileFetch, RawFailure>;
}

/// Configuration for the HTTP-backed client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpApiClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// Price of one request unit, used when the response omits a cost.
    pub unit_price_usd: f64,
}

impl Default for HttpApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.profilescope.example".to_string(),
            api_key: String::new(),
            user_agent: "cloneflow/0.3".to_string(),
            timeout_seconds: 30,
            unit_price_usd: 0.001,
        }
    }
}

/// Wire shape of a successful upstream response.
#[derive(Debug, Deserialize)]
struct FetchResponseBody {
    data: serde_json::Value,
    request_units: u32,
    #[serde(default)]
    cost_usd: Option<f64>,
}

/// Wire shape of a structured upstream error body.
#[derive(Debug, Deserialize)]
struct ErrorResponseBody {
    code: Option<String>,
    message: Option<String>,
}

/// reqwest-backed implementation of the profile API boundary.
pub struct HttpProfileApiClient {
    client: Client,
    config: HttpApiClientConfig,
}

impl HttpProfileApiClient {
    pub fn new(config: HttpApiClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .gzip(true)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    fn scope_for(work_type: WorkType) -> &'static str {
        match work_type {
            WorkType::ProfileSnapshot => "snapshot",
            WorkType::FollowerScrape => "followers",
            WorkType::EngagementScan => "engagement",
            WorkType::PostHistory => "posts",
        }
    }
}

#[async_trait]
impl ProfileApiClient for HttpProfileApiClient {
    async fn fetch_profile(
        &self,
        identifier: &str,
        options: &FetchOptions,
    ) -> Result<ProfileFetch, RawFailure> {
        let url = format!(
            "{}/v1/profiles/{identifier}?scope={}",
            self.config.base_url.trim_end_matches('/'),
            Self::scope_for(options.work_type),
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(normalize_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(normalize_error_response(status, response).await);
        }

        let body: FetchResponseBody = response.json().await.map_err(|e| RawFailure::Other {
            message: format!("failed to parse response body: {e}"),
        })?;

        Ok(ProfileFetch {
            data: body.data,
            request_units: body.request_units,
            cost_usd: body
                .cost_usd
                .unwrap_or(f64::from(body.request_units) * self.config.unit_price_usd),
        })
    }
}

/// Fold a non-success HTTP response into the tagged failure union,
/// preferring the structured error body when the upstream sent one.
async fn normalize_error_response(status: StatusCode, response: reqwest::Response) -> RawFailure {
    let text = response.text().await.unwrap_or_default();
    if let Ok(body) = serde_json::from_str::<ErrorResponseBody>(&text) {
        if let Some(code) = body.code {
            return RawFailure::Api {
                code,
                message: body.message.unwrap_or_else(|| status.to_string()),
            };
        }
    }
    let mut message = text;
    message.truncate(512);
    if message.is_empty() {
        message = status.to_string();
    }
    RawFailure::Http {
        status: status.as_u16(),
        message,
    }
}

/// Fold a reqwest transport error into the tagged failure union.
pub fn normalize_reqwest_error(error: reqwest::Error) -> RawFailure {
    let message = error.to_string();
    if error.is_timeout() {
        RawFailure::Transport {
            kind: TransportKind::Timeout,
            message,
        }
    } else if error.is_connect() {
        RawFailure::Transport {
            kind: TransportKind::ConnectionRefused,
            message,
        }
    } else if let Some(status) = error.status() {
        RawFailure::Http {
            status: status.as_u16(),
            message,
        }
    } else if error.is_decode() {
        RawFailure::Other {
            message: format!("failed to parse response body: {message}"),
        }
    } else {
        RawFailure::Other { message }
    }
}
