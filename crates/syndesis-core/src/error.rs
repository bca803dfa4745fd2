// ── Core error types ──
//
// Store-level errors. Consumers see this taxonomy rather than raw HTTP
// status codes; `From<syndesis_api::Error>` does the translation.
//
// `CoreError` is `Clone` because one in-flight fetch hands its result to
// every waiter.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    /// The request could not complete (DNS, refused, reset, timeout).
    #[error("Network error: {message}")]
    Network { message: String },

    /// 401/403. Never retried automatically.
    #[error("Unauthenticated (HTTP {status}): {message}")]
    Unauthenticated { status: u16, message: String },

    #[error("Disconnected from the server")]
    Disconnected,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Not found: {kind} {id}")]
    NotFound { kind: String, id: String },

    // ── Server errors ────────────────────────────────────────────────
    #[error("Server error (HTTP {status}): {message}")]
    Server {
        status: u16,
        message: String,
        debug_message: Option<String>,
    },

    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Server-side error code, when the body carried one.
        code: Option<String>,
    },

    // ── Client-side errors ───────────────────────────────────────────
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Transient failures are retried once when the event stream
    /// reconnects; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Disconnected)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Unauthenticated { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<syndesis_api::Error> for CoreError {
    fn from(err: syndesis_api::Error) -> Self {
        use syndesis_api::Error as ApiError;

        match err {
            ApiError::Unauthenticated { status, message } => {
                CoreError::Unauthenticated { status, message }
            }
            ApiError::InvalidToken(message) => CoreError::Config {
                message: format!("Invalid access token: {message}"),
            },
            ApiError::Transport(ref e) => match e.status() {
                Some(status) if status.as_u16() == 404 => CoreError::NotFound {
                    kind: "resource".into(),
                    id: e.url().map(|u| u.path().to_owned()).unwrap_or_default(),
                },
                Some(status) if status.is_server_error() => CoreError::Server {
                    status: status.as_u16(),
                    message: e.to_string(),
                    debug_message: None,
                },
                _ => CoreError::Network {
                    message: e.to_string(),
                },
            },
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::Timeout { timeout_secs } => CoreError::Network {
                message: format!("Request timed out after {timeout_secs}s"),
            },
            ApiError::Tls(msg) => CoreError::Network {
                message: format!("TLS error: {msg}"),
            },
            ApiError::MissingParameter {
                endpoint,
                parameter,
            } => CoreError::Validation {
                message: format!("Endpoint '{endpoint}' is missing parameter '{parameter}'"),
            },
            ApiError::NotFound { path } => CoreError::NotFound {
                kind: "resource".into(),
                id: path,
            },
            ApiError::Server {
                status,
                message,
                debug_message,
            } => CoreError::Server {
                status,
                message,
                debug_message,
            },
            ApiError::Api {
                status,
                message,
                debug_message: _,
                code,
            } => CoreError::Api {
                status,
                message,
                code,
            },
            ApiError::EventStreamConnect(reason) => CoreError::Network {
                message: format!("Event stream connection failed: {reason}"),
            },
            ApiError::EventStreamClosed { code, reason } => CoreError::Network {
                message: format!("Event stream closed (code {code}): {reason}"),
            },
            ApiError::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
