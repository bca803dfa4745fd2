//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use syndesis_config::ConfigError;
use syndesis_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the server: {reason}")]
    #[diagnostic(
        code(syndctl::connection_failed),
        help(
            "Check that the server is running and reachable.\n\
             Self-signed certificate? Try --insecure (-k) or set ca_cert in your profile."
        )
    )]
    ConnectionFailed { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed (HTTP {status})")]
    #[diagnostic(
        code(syndctl::auth_failed),
        help(
            "Verify your bearer token.\n\
             Run: syndctl config set-token --profile {profile}\n\
             Or set SYNDESIS_TOKEN."
        )
    )]
    AuthFailed { status: u16, profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(syndctl::not_found),
        help("Run: syndctl {list_command} to see available entries")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(syndctl::api_error))]
    ApiError { code: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(syndctl::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(syndctl::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: syndctl config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(syndctl::no_config),
        help(
            "Create a profile with: syndctl config init\n\
             Or pass --url / set SYNDESIS_URL.\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(syndctl::config))]
    Config(#[from] ConfigError),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' was not confirmed")]
    #[diagnostic(
        code(syndctl::not_confirmed),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NotConfirmed { action: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(syndctl::json), help("Check the JSON file contents and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NotConfirmed { .. } | Self::NoConfig { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }

    /// Attach the active profile name to an authentication failure.
    pub fn with_profile(self, name: &str) -> Self {
        match self {
            Self::AuthFailed { status, .. } => Self::AuthFailed {
                status,
                profile: name.to_owned(),
            },
            other => other,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Network { message } => CliError::ConnectionFailed { reason: message },

            CoreError::Disconnected => CliError::ConnectionFailed {
                reason: "the connection to the server was lost".into(),
            },

            CoreError::Unauthenticated { status, .. } => CliError::AuthFailed {
                status,
                profile: "default".into(),
            },

            CoreError::NotFound { kind, id } => CliError::NotFound {
                list_command: format!("{} list", list_command_for(&kind)),
                resource_type: kind,
                identifier: id,
            },

            CoreError::Server {
                status,
                message,
                debug_message,
            } => CliError::ApiError {
                code: format!("http_{status}"),
                message: match debug_message {
                    Some(debug) => format!("{message} ({debug})"),
                    None => message,
                },
            },

            CoreError::Api {
                status,
                message,
                code,
            } => CliError::ApiError {
                code: code.unwrap_or_else(|| format!("http_{status}")),
                message,
            },

            CoreError::Validation { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => CliError::ApiError {
                code: "internal".into(),
                message,
            },
        }
    }
}

fn list_command_for(kind: &str) -> &'static str {
    match kind {
        "connection" => "connections",
        "integration" => "integrations",
        "action" => "actions",
        "oauth-app" => "oauth-apps",
        "integration-template" => "templates",
        _ => "<resource>",
    }
}
