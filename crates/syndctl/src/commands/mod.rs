//! Command handlers, one module per top-level command.

pub mod config_cmd;
pub mod events;
pub mod poll;
pub mod resources;
pub mod steps;
pub mod util;

use syndesis_core::{Connection, Integration, IntegrationTemplate, OAuthApp, Session};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Route a server-bound command to its handler.
pub async fn dispatch(cmd: Command, session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Connections(args) => {
            resources::handle::<Connection>(session, session.connections(), args, global).await
        }
        Command::Integrations(args) => {
            resources::handle::<Integration>(session, session.integrations(), args, global).await
        }
        Command::Actions(args) => {
            resources::handle(session, session.actions(), args, global).await
        }
        Command::OauthApps(args) => {
            resources::handle::<OAuthApp>(session, session.oauth_apps(), args, global).await
        }
        Command::Templates(args) => {
            resources::handle::<IntegrationTemplate>(session, session.templates(), args, global)
                .await
        }
        Command::Events(args) => events::handle(session, args, global).await,
        Command::Poll(args) => poll::handle(session, args, global).await,
        Command::Steps(args) => steps::handle(args, Some(session), global).await,
        Command::Config(_) | Command::Completions(_) => unreachable!("handled before dispatch"),
    }
}
