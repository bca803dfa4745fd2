//! Generic handlers shared by every cached entity kind.
//!
//! Each command (`connections`, `integrations`, ...) goes through the
//! session's `EntityStore` for that kind: reads come from the cache and
//! coalesce with concurrent loads, writes update the cache in place.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tabled::Tabled;

use syndesis_core::{
    Action, Connection, DataShape, Entity, EntityFilter, Integration, IntegrationTemplate,
    OAuthApp, Session, Store, StoreView,
};

use crate::cli::{GlobalOpts, ListArgs, OutputFormat, ResourceArgs, ResourceCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Resource trait ──────────────────────────────────────────────────

/// CLI presentation of an entity kind.
pub trait Resource: Entity {
    /// Human noun used in messages.
    const NOUN: &'static str;
    /// Top-level command name, for help text.
    const COMMAND: &'static str;

    type Row: Tabled;

    fn row(&self) -> Self::Row;
    fn detail(&self) -> String;
}

fn id_of<T: Entity>(entity: &T) -> String {
    entity.id().unwrap_or("-").to_owned()
}

fn opt(value: Option<&str>) -> String {
    value.unwrap_or("-").to_owned()
}

fn detail_lines(pairs: &[(&str, String)]) -> String {
    let mut out = String::new();
    for (key, value) in pairs {
        let _ = writeln!(out, "{key:<14} {value}");
    }
    out.trim_end().to_owned()
}

// ── Row types ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub struct ConnectionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Connector")]
    connector: String,
    #[tabled(rename = "Derived")]
    derived: String,
    #[tabled(rename = "Tags")]
    tags: String,
}

impl Resource for Connection {
    const NOUN: &'static str = "connection";
    const COMMAND: &'static str = "connections";
    type Row = ConnectionRow;

    fn row(&self) -> ConnectionRow {
        ConnectionRow {
            id: id_of(self),
            name: self.name.clone(),
            connector: opt(self.connector_id.as_deref()),
            derived: if self.derived.unwrap_or(false) { "yes" } else { "no" }.into(),
            tags: self.tags.join(", "),
        }
    }

    fn detail(&self) -> String {
        let mut pairs = vec![
            ("ID", id_of(self)),
            ("Name", self.name.clone()),
            ("Description", opt(self.description.as_deref())),
            ("Connector", opt(self.connector_id.as_deref())),
            ("Derived", self.derived.unwrap_or(false).to_string()),
            ("Tags", self.tags.join(", ")),
        ];
        // Property values may be secrets; show names only.
        if !self.configured_properties.is_empty() {
            let keys: Vec<&str> = self.configured_properties.keys().map(String::as_str).collect();
            pairs.push(("Properties", keys.join(", ")));
        }
        detail_lines(&pairs)
    }
}

#[derive(Tabled)]
pub struct IntegrationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Steps")]
    steps: usize,
    #[tabled(rename = "Updated")]
    updated: String,
}

fn format_millis(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or_else(
            || "-".into(),
            |ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        )
}

impl Resource for Integration {
    const NOUN: &'static str = "integration";
    const COMMAND: &'static str = "integrations";
    type Row = IntegrationRow;

    fn row(&self) -> IntegrationRow {
        IntegrationRow {
            id: id_of(self),
            name: self.name.clone(),
            state: opt(self.current_state.as_deref()),
            version: self.version.map_or_else(|| "-".into(), |v| v.to_string()),
            steps: self.primary_steps().len(),
            updated: format_millis(self.updated_at),
        }
    }

    fn detail(&self) -> String {
        let steps: Vec<String> = self
            .primary_steps()
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let kind = step.step_kind.as_deref().unwrap_or("?");
                match step.name.as_deref() {
                    Some(name) => format!("{i}: {kind} ({name})"),
                    None => format!("{i}: {kind}"),
                }
            })
            .collect();
        detail_lines(&[
            ("ID", id_of(self)),
            ("Name", self.name.clone()),
            ("Description", opt(self.description.as_deref())),
            ("State", opt(self.current_state.as_deref())),
            ("Version", self.version.map_or_else(|| "-".into(), |v| v.to_string())),
            ("Updated", format_millis(self.updated_at)),
            ("Flows", self.flows.len().to_string()),
            ("Steps", steps.join("\n               ")),
        ])
    }
}

#[derive(Tabled)]
pub struct ActionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    action_type: String,
    #[tabled(rename = "Pattern")]
    pattern: String,
    #[tabled(rename = "In")]
    input: String,
    #[tabled(rename = "Out")]
    output: String,
}

fn shape_label(shape: Option<&DataShape>) -> String {
    shape.map_or_else(|| "-".into(), |s| s.kind.to_string())
}

impl Resource for Action {
    const NOUN: &'static str = "action";
    const COMMAND: &'static str = "actions";
    type Row = ActionRow;

    fn row(&self) -> ActionRow {
        ActionRow {
            id: id_of(self),
            name: self.name.clone(),
            action_type: opt(self.action_type.as_deref()),
            pattern: opt(self.pattern.as_deref()),
            input: shape_label(self.input_shape()),
            output: shape_label(self.output_shape()),
        }
    }

    fn detail(&self) -> String {
        detail_lines(&[
            ("ID", id_of(self)),
            ("Name", self.name.clone()),
            ("Description", opt(self.description.as_deref())),
            ("Type", opt(self.action_type.as_deref())),
            ("Pattern", opt(self.pattern.as_deref())),
            ("Input shape", shape_label(self.input_shape())),
            ("Output shape", shape_label(self.output_shape())),
            ("Tags", self.tags.join(", ")),
        ])
    }
}

#[derive(Tabled)]
pub struct OAuthAppRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Configured")]
    configured: String,
}

impl Resource for OAuthApp {
    const NOUN: &'static str = "OAuth app";
    const COMMAND: &'static str = "oauth-apps";
    type Row = OAuthAppRow;

    fn row(&self) -> OAuthAppRow {
        OAuthAppRow {
            id: id_of(self),
            name: self.name.clone(),
            configured: if self.is_configured() { "yes" } else { "no" }.into(),
        }
    }

    fn detail(&self) -> String {
        detail_lines(&[
            ("ID", id_of(self)),
            ("Name", self.name.clone()),
            ("Icon", opt(self.icon.as_deref())),
            ("Configured", self.is_configured().to_string()),
        ])
    }
}

#[derive(Tabled)]
pub struct TemplateRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Flows")]
    flows: usize,
    #[tabled(rename = "Description")]
    description: String,
}

impl Resource for IntegrationTemplate {
    const NOUN: &'static str = "template";
    const COMMAND: &'static str = "templates";
    type Row = TemplateRow;

    fn row(&self) -> TemplateRow {
        TemplateRow {
            id: id_of(self),
            name: self.name.clone(),
            flows: self.flows.len(),
            description: opt(self.description.as_deref()),
        }
    }

    fn detail(&self) -> String {
        detail_lines(&[
            ("ID", id_of(self)),
            ("Name", self.name.clone()),
            ("Description", opt(self.description.as_deref())),
            ("Flows", self.flows.len().to_string()),
        ])
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle<T: Resource>(
    session: &Session,
    store: &Store<T>,
    args: ResourceArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        ResourceCommand::List(list) => {
            store.load_all(list.refresh).await?;
            let items = store.list_where(&filter_for(&list));
            print_list(&items, global);
            Ok(())
        }

        ResourceCommand::Get { id } => {
            let entity = store.get(&id).await?.ok_or_else(|| not_found::<T>(&id))?;
            print_single(&*entity, global);
            Ok(())
        }

        ResourceCommand::Create { from_file } => {
            let value = util::read_json_file(&from_file)?;
            let entity: T = serde_json::from_value(value)?;
            let created = store
                .create(&entity)
                .await?
                .ok_or_else(|| not_found::<T>("(new)"))?;
            if !global.quiet {
                eprintln!("✓ Created {} '{}'", T::NOUN, id_of(&*created));
            }
            print_single(&*created, global);
            Ok(())
        }

        ResourceCommand::Update { id, from_file } => {
            let mut value = util::read_json_file(&from_file)?;
            let Some(object) = value.as_object_mut() else {
                return Err(CliError::Validation {
                    field: "from-file".into(),
                    reason: "expected a JSON object".into(),
                });
            };
            object.insert("id".into(), serde_json::Value::String(id.clone()));
            let entity: T = serde_json::from_value(value)?;
            let updated = store
                .update(&entity)
                .await?
                .ok_or_else(|| not_found::<T>(&id))?;
            if !global.quiet {
                eprintln!("✓ Updated {} '{id}'", T::NOUN);
            }
            print_single(&*updated, global);
            Ok(())
        }

        ResourceCommand::Delete { id } => {
            if !util::confirm(&format!("Delete {} '{id}'?", T::NOUN), global.yes)? {
                return Err(CliError::NotConfirmed {
                    action: format!("delete {} {id}", T::NOUN),
                });
            }
            store.delete(&id).await?;
            if !global.quiet {
                eprintln!("✓ Deleted {} '{id}'", T::NOUN);
            }
            Ok(())
        }

        ResourceCommand::Watch(list) => watch(session, store, &list, global).await,
    }
}

fn filter_for<T: Entity>(list: &ListArgs) -> EntityFilter<T> {
    match list.filter {
        Some(ref text) => EntityFilter::NameContains(text.clone()),
        None => EntityFilter::All,
    }
}

fn not_found<T: Resource>(id: &str) -> CliError {
    CliError::NotFound {
        resource_type: T::NOUN.into(),
        identifier: id.into(),
        list_command: format!("{} list", T::COMMAND),
    }
}

fn print_list<T: Resource>(items: &[Arc<T>], global: &GlobalOpts) {
    let out = output::render_list(
        &global.output,
        items,
        |item| item.row(),
        |item| id_of::<T>(item),
    );
    output::print_output(&out, global.quiet);
}

fn print_single<T: Resource>(entity: &T, global: &GlobalOpts) {
    let out = output::render_single(&global.output, entity, T::detail, id_of::<T>);
    output::print_output(&out, global.quiet);
}

// ── Watch ───────────────────────────────────────────────────────────

/// Follow a collection through the event stream until Ctrl-C.
async fn watch<T: Resource>(
    session: &Session,
    store: &Store<T>,
    list: &ListArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    session.connect();
    let filter = filter_for(list);
    let mut stream = store.subscribe();

    // The initial load lands in the view; failures are shown there too.
    let loader = store.clone();
    tokio::spawn(async move {
        if let Err(e) = loader.load_all(false).await {
            tracing::debug!(error = %e, "initial load failed");
        }
    });

    render_view(stream.current(), &filter, global);
    loop {
        tokio::select! {
            view = stream.changed() => {
                let Some(view) = view else { break };
                render_view(&view, &filter, global);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn render_view<T: Resource>(view: &StoreView<T>, filter: &EntityFilter<T>, global: &GlobalOpts) {
    // Nothing to show until the first load settles.
    if view.last_loaded.is_none() && view.error.is_none() {
        return;
    }
    let items: Vec<Arc<T>> = view
        .snapshot
        .iter()
        .filter(|item| filter.matches(item))
        .cloned()
        .collect();

    if matches!(global.output, OutputFormat::Table) && !global.quiet {
        let stamp = view
            .last_loaded
            .map_or_else(|| "-".into(), |ts| ts.with_timezone(&Local).format("%H:%M:%S").to_string());
        eprintln!(
            "── {} ({}) · {} · loaded {stamp}",
            T::COMMAND,
            items.len(),
            view.load_state
        );
        if let Some(ref err) = view.error {
            eprintln!("   ! {err}");
        }
    }
    print_list(&items, global);
}
