//! Error taxonomy for registry fetches, payload extraction and export

use std::time::Duration;

/// Error from a single request against a registry endpoint.
///
/// Transient variants are retried inside the fetch layer (see
/// [`retry_with_backoff`](crate::retry::retry_with_backoff)); everything else
/// is permanent and surfaces to the owning stage immediately.
#[derive(Debug, Clone)]
pub enum FetchError {
    /// Request or read timed out
    Timeout(String),
    /// HTTP-level failure, with status when the server answered at all
    Http {
        status: Option<u16>,
        message: String,
        /// Server wait hint (`Retry-After`), only meaningful for 429
        retry_after: Option<Duration>,
    },
    /// Response arrived but could not be decoded
    Unparseable(String),
    /// Request could not be built (bad URL template or base)
    InvalidRequest(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Http {
                status: Some(s),
                message,
                ..
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
                ..
            } => write!(f, "HTTP error: {message}"),
            Self::Unparseable(msg) => write!(f, "unparseable response: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status: Some(status),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::Http {
            status: Some(429),
            message: "too many requests".to_string(),
            retry_after,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            // No status = connection-level failure (refused, reset, DNS)
            Self::Http { status: None, .. } => true,
            Self::Http {
                status: Some(s), ..
            } => *s == 429 || (500..=599).contains(s),
            Self::Unparseable(_) | Self::InvalidRequest(_) => false,
        }
    }

    /// Server-provided wait before the next attempt (429 only)
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http {
                status: Some(429),
                retry_after,
                ..
            } => *retry_after,
            _ => None,
        }
    }
}

/// A well-formed response lacked the identifier or fields a stage needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    MissingField(String),
    Malformed { field: String, reason: String },
}

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing field {field}"),
            Self::Malformed { field, reason } => write!(f, "malformed field {field}: {reason}"),
        }
    }
}

impl std::error::Error for ExtractionError {}

/// Failure of one stage task. Recorded in the task result, never propagated.
#[derive(Debug, Clone)]
pub enum TaskError {
    Fetch(FetchError),
    Extraction(ExtractionError),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "{e}"),
            Self::Extraction(e) => write!(f, "extraction: {e}"),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<FetchError> for TaskError {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e)
    }
}

impl From<ExtractionError> for TaskError {
    fn from(e: ExtractionError) -> Self {
        Self::Extraction(e)
    }
}

/// Writing one consolidated artifact failed.
#[derive(Debug)]
pub enum ExportError {
    Serialize(serde_json::Error),
    Write { path: String, source: std::io::Error },
    /// Every candidate artifact path for a key is already taken in this flush
    PathCollision { key: String },
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialize(e) => write!(f, "serialize: {e}"),
            Self::Write { path, source } => write!(f, "write {path}: {source}"),
            Self::PathCollision { key } => write!(f, "no free artifact path for {key}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialize(e) => Some(e),
            Self::Write { source, .. } => Some(source),
            Self::PathCollision { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_retryable() {
        assert!(FetchError::Timeout("read".into()).is_retryable());
    }

    #[test]
    fn server_errors_retryable() {
        assert!(FetchError::http(500, "boom").is_retryable());
        assert!(FetchError::http(503, "busy").is_retryable());
        assert!(FetchError::rate_limited(None).is_retryable());
    }

    #[test]
    fn client_errors_permanent() {
        for status in [400, 401, 403, 404, 410] {
            let err = FetchError::http(status, "nope");
            assert!(!err.is_retryable(), "{status} should be permanent");
        }
    }

    #[test]
    fn connection_error_retryable() {
        let err = FetchError::Http {
            status: None,
            message: "connection refused".into(),
            retry_after: None,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn unparseable_permanent() {
        assert!(!FetchError::Unparseable("bad json".into()).is_retryable());
        assert!(!FetchError::InvalidRequest("bad url".into()).is_retryable());
    }

    #[test]
    fn retry_after_only_for_429() {
        let hint = Some(Duration::from_secs(3));
        assert_eq!(FetchError::rate_limited(hint).retry_after(), hint);
        let err = FetchError::Http {
            status: Some(503),
            message: "busy".into(),
            retry_after: hint,
        };
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn display_http_with_status() {
        assert_eq!(format!("{}", FetchError::http(404, "test")), "HTTP 404: test");
    }

    #[test]
    fn display_extraction() {
        let err = TaskError::from(ExtractionError::MissingField("/id".into()));
        assert_eq!(format!("{err}"), "extraction: missing field /id");
    }
}
