use thiserror::Error;

/// Top-level error type for the `syndesis-api` crate.
///
/// Covers every failure mode of the REST transport and the change-event
/// stream. `syndesis-core` maps these into the store-level taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// 401 or 403 from the API. Never retried automatically.
    #[error("Unauthenticated (HTTP {status}): {message}")]
    Unauthenticated { status: u16, message: String },

    /// A bearer token could not be encoded as a header value.
    #[error("Invalid access token: {0}")]
    InvalidToken(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Endpoint resolution ─────────────────────────────────────────
    /// An endpoint template placeholder had no matching parameter.
    #[error("Endpoint '{endpoint}' is missing parameter '{parameter}'")]
    MissingParameter { endpoint: String, parameter: String },

    // ── API responses ───────────────────────────────────────────────
    /// 404 from the API.
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// 5xx from the API.
    #[error("Server error (HTTP {status}): {message}")]
    Server {
        status: u16,
        message: String,
        debug_message: Option<String>,
    },

    /// Any other non-success status.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        debug_message: Option<String>,
        code: Option<String>,
    },

    // ── Event stream ────────────────────────────────────────────────
    /// The event stream could not be opened.
    #[error("Event stream connection failed: {0}")]
    EventStreamConnect(String),

    /// The event stream was closed by the server.
    #[error("Event stream closed (code {code}): {reason}")]
    EventStreamClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` for 401/403 responses.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Unauthenticated { .. })
    }

    /// Returns `true` if this is a transient error worth retrying once the
    /// server is reachable again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::EventStreamConnect(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthenticated { status, .. }
            | Self::Server { status, .. }
            | Self::Api { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_exposed_for_http_errors() {
        let err = Error::Server {
            status: 503,
            message: "unavailable".into(),
            debug_message: None,
        };
        assert_eq!(err.status(), Some(503));
        assert!(!err.is_transient());

        let err = Error::NotFound {
            path: "/connections/c9".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.is_not_found());
    }

    #[test]
    fn auth_errors_are_not_transient() {
        let err = Error::Unauthenticated {
            status: 403,
            message: "forbidden".into(),
        };
        assert!(err.is_auth_error());
        assert!(!err.is_transient());
    }
}
