//! Shared configuration for Syndesis tools.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `syndesis_core::SessionConfig`. The CLI layers its
//! flag overrides on top.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use syndesis_api::EventTransport;
use syndesis_core::{SessionConfig, TlsVerification, XsrfSettings};

/// Keyring service name; entries are keyed `{profile}/token`.
pub const KEYRING_SERVICE: &str = "syndesis";

/// Prefix for environment overrides, e.g. `SYNDESIS_DEFAULT_PROFILE` or
/// `SYNDESIS_PROFILES__DEV__URL`.
pub const ENV_PREFIX: &str = "SYNDESIS_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use: `requested`, else the default.
    pub fn profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles.get(name).ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Poll interval for `poll` when none is given (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    5
}

/// A named server profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// API base URL (e.g., "https://syndesis.example.com/api/v1").
    pub url: String,

    /// Bearer token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable holding the bearer token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    /// Open the change-event stream for long-running commands.
    pub events: Option<bool>,

    /// "websocket" or "sse".
    pub event_transport: Option<String>,

    pub xsrf_cookie: Option<String>,
    pub xsrf_header: Option<String>,
    /// Anti-forgery token sent until the server sets the cookie.
    pub xsrf_token: Option<String>,

    /// Endpoint template overrides, merged over the built-in map.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

impl Profile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "syndesis", "syndesis").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("syndesis");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (missing file is fine) + environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

/// Resolve the bearer token from the credential chain. `None` means the
/// server is reached without one.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name)) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    profile.token.as_ref().map(|t| SecretString::from(t.clone()))
}

/// Store a token in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))?;
    entry.set_password(token)?;
    tracing::debug!(profile = profile_name, "token stored in keyring");
    Ok(())
}

fn keyring_user(profile_name: &str) -> String {
    format!("{profile_name}/token")
}

// ── Translation ─────────────────────────────────────────────────────

pub fn parse_event_transport(raw: &str) -> Result<EventTransport, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: "event_transport".into(),
        reason: format!("expected 'websocket' or 'sse', got '{raw}'"),
    })
}

/// Build a `SessionConfig` from a profile, without CLI flag overrides.
pub fn profile_to_session_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    let url: url::Url = profile.url.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", profile.url),
    })?;

    let mut config = SessionConfig::new(url);
    config.token = resolve_token(profile, profile_name);

    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.events_enabled = profile.events.unwrap_or(true);
    if let Some(ref transport) = profile.event_transport {
        config.event_transport = parse_event_transport(transport)?;
    }
    config.xsrf = XsrfSettings {
        cookie_name: profile.xsrf_cookie.clone(),
        header_name: profile.xsrf_header.clone(),
        token: profile.xsrf_token.as_ref().map(|t| SecretString::from(t.clone())),
    };
    config.endpoints.clone_from(&profile.endpoints);

    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "dev"

[defaults]
timeout = 12

[profiles.dev]
url = "https://syndesis.dev.example.com/api/v1"
event_transport = "sse"
insecure = true

[profiles.dev.endpoints]
connections = "/v2/connections"

[profiles.prod]
url = "https://syndesis.example.com/api/v1"
ca_cert = "/etc/ssl/syndesis.pem"
events = false
"#;

    fn write_sample() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_profiles_from_file() {
        let (_dir, path) = write_sample();
        let cfg = load_config_from(&path).unwrap();

        assert_eq!(cfg.profile_name(None), "dev");
        assert_eq!(cfg.profile_name(Some("prod")), "prod");
        assert_eq!(cfg.defaults.timeout, 12);
        assert_eq!(cfg.defaults.output, "table");
        assert_eq!(cfg.profiles.len(), 2);
        assert!(matches!(cfg.profile("staging"), Err(ConfigError::UnknownProfile { .. })));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn profile_translates_to_session_config() {
        let (_dir, path) = write_sample();
        let cfg = load_config_from(&path).unwrap();

        let dev = profile_to_session_config(cfg.profile("dev").unwrap(), "dev", &cfg.defaults).unwrap();
        assert_eq!(dev.url.as_str(), "https://syndesis.dev.example.com/api/v1");
        assert_eq!(dev.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(dev.timeout, Duration::from_secs(12));
        assert_eq!(dev.event_transport, EventTransport::ServerSentEvents);
        assert!(dev.events_enabled);
        assert_eq!(dev.endpoints.get("connections").map(String::as_str), Some("/v2/connections"));

        let prod = profile_to_session_config(cfg.profile("prod").unwrap(), "prod", &cfg.defaults).unwrap();
        assert_eq!(prod.tls, TlsVerification::CustomCa("/etc/ssl/syndesis.pem".into()));
        assert!(!prod.events_enabled);
    }

    #[test]
    fn plaintext_token_is_the_last_resort() {
        use secrecy::ExposeSecret;

        let profile = Profile {
            token: Some("plain".into()),
            token_env: Some("SYNDESIS_CONFIG_TEST_UNSET_7F3A".into()),
            ..Profile::new("https://x/api/v1")
        };
        let token = resolve_token(&profile, "config-test-nonexistent-profile").unwrap();
        assert_eq!(token.expose_secret(), "plain");

        assert!(resolve_token(&Profile::new("https://x/api/v1"), "config-test-nonexistent-profile").is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let defaults = Defaults::default();
        let err = profile_to_session_config(&Profile::new("not a url"), "bad", &defaults).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "url"));

        let profile = Profile {
            event_transport: Some("carrier-pigeon".into()),
            ..Profile::new("https://x/api/v1")
        };
        assert!(profile_to_session_config(&profile, "bad", &defaults).is_err());
        assert_eq!(parse_event_transport("WS").unwrap(), EventTransport::WebSocket);
    }

    #[test]
    fn save_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert("local".into(), Profile::new("http://localhost:8080/api/v1"));

        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profile("local").unwrap().url, "http://localhost:8080/api/v1");
    }
}
