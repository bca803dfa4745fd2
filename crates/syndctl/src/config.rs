//! CLI configuration: thin wrapper around `syndesis_config` shared types.
//!
//! Adds the resolution step that layers `GlobalOpts` flag overrides
//! (--url, --token, --insecure, ...) on top of a profile.

use std::time::Duration;

use secrecy::SecretString;

use syndesis_api::EventTransport;
use syndesis_core::{SessionConfig, TlsVerification};

use crate::cli::{EventTransportArg, GlobalOpts};
use crate::error::CliError;

pub use syndesis_config::{
    Config, Defaults, Profile, config_path, load_config_or_default, save_config,
};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.profile_name(global.profile.as_deref())
}

/// Build the `SessionConfig` for a command from config file, profile and
/// flags. Flags win over the profile, the profile over `[defaults]`.
pub fn resolve_session_config(global: &GlobalOpts) -> Result<(SessionConfig, String), CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut session = match cfg.profiles.get(&profile_name) {
        Some(profile) => {
            syndesis_config::profile_to_session_config(profile, &profile_name, &cfg.defaults)?
        }
        None => {
            if global.profile.is_some() && global.url.is_none() {
                return Err(profile_not_found(&cfg, &profile_name));
            }
            // No profile: --url / SYNDESIS_URL is enough on its own.
            let url_str = global.url.as_deref().ok_or_else(|| CliError::NoConfig {
                path: config_path().display().to_string(),
            })?;
            let mut session = SessionConfig::new(parse_url(url_str)?);
            session.timeout = Duration::from_secs(cfg.defaults.timeout);
            if cfg.defaults.insecure {
                session.tls = TlsVerification::DangerAcceptInvalid;
            }
            session
        }
    };

    apply_overrides(&mut session, global)?;
    Ok((session, profile_name))
}

/// Apply flag overrides to an already-resolved session config.
pub fn apply_overrides(session: &mut SessionConfig, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(ref url_str) = global.url {
        session.url = parse_url(url_str)?;
    }
    if let Some(ref token) = global.token {
        session.token = Some(SecretString::from(token.clone()));
    }
    if global.insecure {
        session.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        session.timeout = Duration::from_secs(secs);
    }
    if let Some(transport) = global.event_transport {
        session.event_transport = match transport {
            EventTransportArg::Websocket => EventTransport::WebSocket,
            EventTransportArg::Sse => EventTransport::ServerSentEvents,
        };
    }
    Ok(())
}

pub fn profile_not_found(cfg: &Config, name: &str) -> CliError {
    let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
    available.sort();
    CliError::ProfileNotFound {
        name: name.to_owned(),
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

fn parse_url(raw: &str) -> Result<url::Url, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {raw}"),
    })
}
