//! `syndctl poll`: re-fetch a GET endpoint on an interval and print each
//! result as it lands.

use std::time::Duration;

use chrono::Local;
use serde_json::Value;

use syndesis_api::Endpoint;
use syndesis_core::{FetchState, PollingFetch, Session};

use crate::cli::{GlobalOpts, OutputFormat, PollArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

pub async fn handle(session: &Session, args: PollArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let secs = args
        .interval
        .unwrap_or_else(|| config::load_config_or_default().defaults.poll_interval);
    // Zero means fetch once.
    let poll = (secs > 0).then_some(Duration::from_secs(secs));

    let endpoint = args
        .params
        .iter()
        .fold(Endpoint::new(args.endpoint.as_str()), |ep, (name, value)| {
            ep.param(name.as_str(), value.as_str())
        });
    // Resolve up front so a missing placeholder fails before polling starts.
    session.api().endpoint_url(&endpoint).map_err(|e| CliError::Validation {
        field: "endpoint".into(),
        reason: e.to_string(),
    })?;

    let mut fetch = PollingFetch::endpoint(session.api().clone(), endpoint, poll, Value::Null);
    let limit = if poll.is_none() { Some(1) } else { args.count };
    let mut seen = 0usize;

    loop {
        tokio::select! {
            state = fetch.changed() => {
                let Some(state) = state else { break };
                if state.loading {
                    continue;
                }
                print_state(&state, global);
                seen += 1;
                if limit.is_some_and(|n| seen >= n) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    fetch.stop();
    Ok(())
}

fn print_state(state: &FetchState<Value>, global: &GlobalOpts) {
    if let Some(ref err) = state.error {
        // Keep going; the last good value stays in `data`.
        eprintln!("{} ! {err}", Local::now().format("%H:%M:%S"));
        return;
    }
    let out = match global.output {
        OutputFormat::Yaml => output::render_yaml(&state.data),
        OutputFormat::JsonCompact | OutputFormat::Plain => output::render_json_compact(&state.data),
        OutputFormat::Json | OutputFormat::Table => output::render_json_pretty(&state.data),
    };
    if matches!(global.output, OutputFormat::Table) && !global.quiet {
        eprintln!("── {}", Local::now().format("%H:%M:%S"));
    }
    output::print_output(&out, global.quiet);
}
