//! `syndctl steps`: which step kinds may be inserted at a flow position.

use std::path::Path;

use serde::Serialize;
use tabled::Tabled;

use syndesis_api::ResourceEndpoints;
use syndesis_core::{CoreError, Extension, Flow, Integration, Session, Step, StepCatalog, StepKind};

use crate::cli::{GlobalOpts, StepsArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Clone, Serialize, Tabled)]
struct StepRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    #[serde(rename = "stepKind")]
    step_kind: String,
    #[tabled(rename = "Description")]
    description: String,
}

impl From<&StepKind> for StepRow {
    fn from(kind: &StepKind) -> Self {
        Self {
            name: kind.name.clone(),
            step_kind: kind.step_kind.clone(),
            description: kind.description.clone(),
        }
    }
}

/// `session` is only needed for `--fetch-extensions`.
pub async fn handle(
    args: StepsArgs,
    session: Option<&Session>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let flow = read_flow(&args.flow)?;

    if args.position > flow.len() {
        return Err(CliError::Validation {
            field: "position".into(),
            reason: format!("flow has {} steps, position must be 0..={}", flow.len(), flow.len()),
        });
    }

    let extensions: Vec<Extension> = match (session, args.extensions.as_deref()) {
        (_, Some(path)) => serde_json::from_value(util::read_json_file(path)?)?,
        (Some(session), None) if args.fetch_extensions => session
            .api()
            .list(&ResourceEndpoints::new("extensions", "extension"))
            .await
            .map_err(CoreError::from)?,
        _ => Vec::new(),
    };

    let visible = StepCatalog::builtin().visible_in_flow(&flow, args.position, &extensions);
    let rows: Vec<StepRow> = visible.iter().map(StepRow::from).collect();

    let out = output::render_list(&global.output, &rows, StepRow::clone, |row| row.name.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Accepts a bare step array, a flow object, or a whole integration (its
/// primary flow is used).
fn read_flow(path: &Path) -> Result<Vec<Step>, CliError> {
    let value = util::read_json_file(path)?;
    if value.is_array() {
        Ok(serde_json::from_value(value)?)
    } else if value.get("flows").is_some() {
        let integration: Integration = serde_json::from_value(value)?;
        Ok(integration.primary_steps().to_vec())
    } else if value.is_object() {
        Ok(serde_json::from_value::<Flow>(value)?.steps)
    } else {
        Err(CliError::Validation {
            field: "flow".into(),
            reason: "expected a JSON array of steps or a flow object".into(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flow_file_shapes_are_all_accepted() {
        let dir = tempfile::tempdir().unwrap();

        let bare = dir.path().join("bare.json");
        std::fs::write(&bare, r#"[{"stepKind":"endpoint"},{"stepKind":"log"}]"#).unwrap();
        assert_eq!(read_flow(&bare).unwrap().len(), 2);

        let flow = dir.path().join("flow.json");
        std::fs::write(&flow, r#"{"id":"f1","steps":[{"stepKind":"endpoint"}]}"#).unwrap();
        assert_eq!(read_flow(&flow).unwrap().len(), 1);

        let integration = dir.path().join("integration.json");
        std::fs::write(
            &integration,
            r#"{"name":"i","flows":[{"steps":[{"stepKind":"endpoint"},{"stepKind":"mapper"},{"stepKind":"endpoint"}]}]}"#,
        )
        .unwrap();
        assert_eq!(read_flow(&integration).unwrap().len(), 3);
    }

    #[test]
    fn scalar_flow_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");
        std::fs::write(&path, "42").unwrap();
        assert!(matches!(read_flow(&path), Err(CliError::Validation { .. })));
    }
}
