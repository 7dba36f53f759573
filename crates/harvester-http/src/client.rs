//! Blocking GET over async reqwest.
//!
//! Stage workers are plain threads, so each request is driven to completion
//! on a shared tokio runtime with `block_on`.

use std::sync::Arc;
use std::time::Duration;

use harvester_core::{FetchError, Payload};

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept in a `FetchError` message
const ERROR_BODY_LIMIT: usize = 200;

/// Failure to set up the HTTP stack
#[derive(Debug)]
pub enum ClientError {
    Runtime(std::io::Error),
    Client(reqwest::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runtime(e) => write!(f, "cannot start async runtime: {e}"),
            Self::Client(e) => write!(f, "cannot build HTTP client: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Shared HTTP client: one runtime and connection pool for every endpoint
#[derive(Clone)]
pub struct HttpClient {
    runtime: Arc<tokio::runtime::Runtime>,
    client: reqwest::Client,
    auth: Option<BasicAuth>,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(
        timeout: Duration,
        auth: Option<BasicAuth>,
        max_idle_per_host: usize,
    ) -> Result<Self, ClientError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(ClientError::Runtime)?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(max_idle_per_host)
            .build()
            .map_err(ClientError::Client)?;
        Ok(Self {
            runtime: Arc::new(runtime),
            client,
            auth,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `url` and classify the body (JSON stays structured, anything else raw)
    pub fn get(&self, url: reqwest::Url) -> Result<Payload, FetchError> {
        log::trace!("GET {url}");
        self.runtime.handle().block_on(async {
            let mut request = self.client.get(url).timeout(self.timeout);
            if let Some(auth) = &self.auth {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }
            let response = request.send().await.map_err(from_reqwest)?;

            let status = response.status();
            if status.as_u16() == 429 {
                let wait = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(v, chrono::Utc::now()));
                return Err(FetchError::rate_limited(wait));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::http(status.as_u16(), error_message(status, &body)));
            }

            let text = response.text().await.map_err(from_reqwest)?;
            Ok(Payload::from_text(text))
        })
    }
}

/// Map a transport error; the URL is stripped so credentials in query strings never reach logs
pub fn from_reqwest(e: reqwest::Error) -> FetchError {
    let status = e.status().map(|s| s.as_u16());
    let (timeout, decode) = (e.is_timeout(), e.is_decode());
    let message = e.without_url().to_string();
    if timeout {
        return FetchError::Timeout(message);
    }
    if decode {
        return FetchError::Unparseable(message);
    }
    FetchError::Http {
        status,
        message,
        retry_after: None,
    }
}

/// `Retry-After` is either delta-seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: chrono::DateTime<chrono::Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    // A date in the past means "now"
    Some((at.with_timezone(&chrono::Utc) - now).to_std().unwrap_or(Duration::ZERO))
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("error");
    let body = body.trim();
    if body.is_empty() {
        return reason.to_string();
    }
    let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    format!("{reason}: {snippet}")
}
