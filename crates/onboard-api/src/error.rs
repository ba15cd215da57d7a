use thiserror::Error;

/// Top-level error type for the `onboard-api` crate.
///
/// Covers every failure mode of the management API surfaces the gateway
/// talks to: the device's iControl REST endpoint, shell execution through
/// `/tm/util/bash`, and the BIG-IQ license pool. `onboard-core` wraps these
/// with phase context before surfacing them.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credentials rejected by the device (HTTP 401).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A polling verb exhausted its retry policy.
    #[error("Timed out after {attempts} attempts: {operation}")]
    Timeout { operation: String, attempts: u32 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Device API ──────────────────────────────────────────────────
    /// Non-success HTTP status returned by the management API.
    #[error("HTTP {status} from {path}: {message}")]
    Http {
        status: u16,
        path: String,
        message: String,
    },

    /// A BIG-IQ licensing task finished in a failed state.
    #[error("BIG-IQ license task failed: {message}")]
    LicenseTask { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// A response was well-formed JSON but lacked an expected field.
    #[error("Unexpected response from {path}: missing {field}")]
    MissingField { path: String, field: &'static str },

    // ── Platform ────────────────────────────────────────────────────
    /// Operation not supported by this gateway.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => matches!(status, 500..=599),
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Http { status: 404, .. } => true,
            _ => false,
        }
    }

    /// HTTP status code, when the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Authentication { .. } => Some(401),
            _ => None,
        }
    }
}
