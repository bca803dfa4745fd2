//! `syndctl events`: tail the server's change-event stream.

use chrono::Local;
use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;

use syndesis_api::{ChangeAction, ChangeEvent, StreamState};
use syndesis_core::Session;

use crate::cli::{EventsArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

pub async fn handle(session: &Session, args: EventsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let events = session.events();
    let mut rx = events.subscribe();
    let mut state = events.state();
    events.start();

    let color = output::should_color(&global.color);
    let mut seen = 0usize;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => {
                    if !wanted(&event, args.kinds.as_deref()) {
                        continue;
                    }
                    output::print_output(&format_event(&event, &global.output, color), global.quiet);
                    seen += 1;
                    if args.count.is_some_and(|n| seen >= n) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event consumer lagged");
                }
                Err(RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                if !global.quiet {
                    eprintln!("· stream {current}");
                }
                if current == StreamState::Stopped {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    events.stop();
    Ok(())
}

fn wanted(event: &ChangeEvent, kinds: Option<&[String]>) -> bool {
    kinds.is_none_or(|kinds| kinds.iter().any(|k| event.is_kind(k)))
}

fn format_event(event: &ChangeEvent, format: &OutputFormat, color: bool) -> String {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json_compact(event),
        OutputFormat::Yaml => output::render_yaml(&[event]),
        OutputFormat::Plain => format!("{} {} {}", event.action, event.kind, event.id),
        OutputFormat::Table => {
            let stamp = Local::now().format("%H:%M:%S");
            let action = format!("{:<7}", event.action.as_ref());
            let action = if color {
                match event.action {
                    ChangeAction::Created => action.green().to_string(),
                    ChangeAction::Updated => action.yellow().to_string(),
                    ChangeAction::Deleted => action.red().to_string(),
                }
            } else {
                action
            };
            format!("{stamp}  {action}  {:<22} {}", event.kind, event.id)
        }
    }
}
