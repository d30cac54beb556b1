//! Failure taxonomy for discovery and probing.
//!
//! Every failure a provider can hand us is an expected, recorded outcome.
//! `ErrorKind` is what gets persisted on a verification result; the
//! error types here carry it together with the HTTP status (if any) and a
//! truncated message.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest error message we keep from a provider response body.
pub const MAX_ERROR_MESSAGE: usize = 500;

/// Classified cause of a failed discovery or probe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP 401/403.
    AuthFailure,
    /// HTTP 402.
    PaymentRequired,
    /// HTTP 404, or the model is absent from the provider's listing.
    NotFound,
    /// HTTP 429.
    RateLimited,
    /// The call exceeded its deadline or the run was cancelled.
    Timeout,
    /// HTTP 5xx.
    ServerError,
    /// The body could not be decoded, even permissively.
    MalformedResponse,
    /// Anything else: connection resets, DNS, odd status codes.
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::AuthFailure,
        ErrorKind::PaymentRequired,
        ErrorKind::NotFound,
        ErrorKind::RateLimited,
        ErrorKind::Timeout,
        ErrorKind::ServerError,
        ErrorKind::MalformedResponse,
        ErrorKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::PaymentRequired => "payment_required",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServerError => "server_error",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Failures after which a chat-completion probe is pointless: the
    /// credential itself is being refused.
    pub fn skips_responsiveness(&self) -> bool {
        matches!(self, ErrorKind::AuthFailure | ErrorKind::PaymentRequired)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a non-success HTTP status onto the taxonomy.
///
/// Returns `None` for 2xx statuses.
pub fn classify_status(status: StatusCode) -> Option<ErrorKind> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        401 | 403 => ErrorKind::AuthFailure,
        402 => ErrorKind::PaymentRequired,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::Unknown,
    })
}

/// Map a transport-level reqwest error onto the taxonomy.
pub fn classify_transport(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_decode() || err.is_body() {
        ErrorKind::MalformedResponse
    } else if let Some(status) = err.status() {
        classify_status(status).unwrap_or(ErrorKind::Unknown)
    } else {
        ErrorKind::Unknown
    }
}

/// Cut a provider message down to something safe to persist.
pub fn truncate_message(msg: &str) -> String {
    if msg.len() <= MAX_ERROR_MESSAGE {
        return msg.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    msg[..end].to_string()
}

/// A failed probe call: classified, with the status code when one came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(kind: ErrorKind, status: Option<u16>, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            status,
            message: truncate_message(message.as_ref()),
        }
    }

    /// Build from an HTTP error response.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let kind = classify_status(status).unwrap_or(ErrorKind::Unknown);
        let message = extract_error_message(body).unwrap_or_else(|| body.to_string());
        Self::new(kind, Some(status.as_u16()), message)
    }

    /// Build from a transport error. The query string is cut from the
    /// request URL in the message: some dialects carry the key there.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let mut message = err.to_string();
        if let Some(url) = err.url() {
            let mut bare = url.clone();
            bare.set_query(None);
            message = message.replace(url.as_str(), bare.as_str());
        }
        Self::new(classify_transport(err), err.status().map(|s| s.as_u16()), message)
    }

    pub fn timeout(what: &str, after: std::time::Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            None,
            format!("{what} timed out after {}ms", after.as_millis()),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Timeout, None, "run cancelled")
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProbeFailure {}

/// Discovery failed for a whole provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no adapter registered for provider family '{0}'")]
    NoAdapter(String),

    #[error("provider '{0}' has no usable credential")]
    MissingCredential(String),

    #[error("model listing failed: {0}")]
    Request(#[from] ProbeFailure),
}

impl DiscoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscoveryError::NoAdapter(_) => ErrorKind::Unknown,
            DiscoveryError::MissingCredential(_) => ErrorKind::AuthFailure,
            DiscoveryError::Request(f) => f.kind,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DiscoveryError::Request(f) => f.status,
            _ => None,
        }
    }
}

/// Pull a human-readable message out of a vendor error body.
///
/// Handles `{"error": {"message": ...}}`, `{"error": "..."}` and
/// `{"message": ...}`; anything else yields `None`.
pub fn extract_error_message(body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = &parsed["error"];
    error["message"]
        .as_str()
        .or_else(|| error.as_str())
        .or_else(|| parsed["message"].as_str())
        .map(str::to_string)
}
