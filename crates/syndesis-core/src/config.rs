// ── Runtime session configuration ──
//
// Describes *how* to reach a Syndesis server. Carries credentials and
// tuning but never touches disk; the CLI builds a `SessionConfig` from its
// profile and hands it in.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use syndesis_api::{EventTransport, ReconnectConfig, TlsMode};
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed development clusters).
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => Self::System,
            TlsVerification::CustomCa(path) => Self::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => Self::DangerAcceptInvalid,
        }
    }
}

/// Anti-forgery settings; names default to the server's.
#[derive(Debug, Clone, Default)]
pub struct XsrfSettings {
    pub cookie_name: Option<String>,
    pub header_name: Option<String>,
    /// Sent until the server sets the cookie.
    pub token: Option<SecretString>,
}

/// Configuration for one session against one server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// API base, e.g. `https://syndesis.example.com/api/v1`.
    pub url: Url,
    /// Bearer token, when the server sits behind an OAuth proxy.
    pub token: Option<SecretString>,
    pub tls: TlsVerification,
    /// Per-request timeout.
    pub timeout: Duration,
    pub xsrf: XsrfSettings,
    /// Endpoint templates merged over the built-in map (last writer wins).
    pub endpoints: BTreeMap<String, String>,
    /// Whether `connect()` opens the change-event stream.
    pub events_enabled: bool,
    pub event_transport: EventTransport,
    pub reconnect: ReconnectConfig,
}

impl SessionConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            token: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            xsrf: XsrfSettings::default(),
            endpoints: BTreeMap::new(),
            events_enabled: true,
            event_transport: EventTransport::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}
