//! Integration steps and the catalog of step kinds a user may insert.
//!
//! Whether a step kind is offered at a position depends on the steps
//! around it: a data mapper needs data flowing in and out, an aggregate
//! needs an open split, and so on. Each catalog entry carries a
//! [`Visibility`] rule evaluated by [`Visibility::is_visible`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::action::{Action, ActionDescriptor, DataShape, DataShapeKind};
use super::connection::Connection;
use super::Extra;

/// Well-known `stepKind` values.
pub mod kinds {
    pub const ENDPOINT: &str = "endpoint";
    pub const EXTENSION: &str = "extension";
    pub const MAPPER: &str = "mapper";
    pub const BASIC_FILTER: &str = "ruleFilter";
    pub const ADVANCED_FILTER: &str = "expressionFilter";
    pub const TEMPLATE: &str = "template";
    pub const CHOICE: &str = "choice";
    pub const LOG: &str = "log";
    pub const SPLIT: &str = "split";
    pub const AGGREGATE: &str = "aggregate";
}

// ── Step ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configured_properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl Step {
    pub fn of_kind(kind: &str) -> Self {
        Self {
            step_kind: Some(kind.to_owned()),
            ..Self::default()
        }
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.step_kind.as_deref() == Some(kind)
    }

    fn output_shape(&self) -> Option<&DataShape> {
        self.action.as_ref()?.output_shape()
    }

    fn input_shape(&self) -> Option<&DataShape> {
        self.action.as_ref()?.input_shape()
    }

    fn has_concrete_output(&self) -> bool {
        self.output_shape().is_some_and(DataShape::is_concrete)
    }

    fn has_concrete_input(&self) -> bool {
        self.input_shape().is_some_and(DataShape::is_concrete)
    }
}

/// Extension bundle contributing custom step actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(flatten)]
    pub extra: Extra,
}

// ── Visibility ──────────────────────────────────────────────────────

/// Rule deciding whether a step kind can be inserted at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Always,
    /// Some previous step produces data.
    RequiresOutputDataShape { no_collection_support: bool },
    /// Data flows in from before and out to after.
    ///
    /// With `any_previous == false` only the nearest previous step that
    /// declares an output shape is considered; with `any_subsequent ==
    /// false` only the next step that declares an input shape.
    RequiresInputOutputDataShapes {
        any_previous: bool,
        any_subsequent: bool,
    },
    /// Hidden right after a step producing a collection.
    NoCollectionSupport,
    /// Only inside an open split, and only where closing it keeps the
    /// split/aggregate pairs balanced.
    ConsistentSplitAggregate,
}

impl Visibility {
    pub fn is_visible(self, _position: usize, previous: &[Step], subsequent: &[Step]) -> bool {
        match self {
            Self::Always => true,
            Self::RequiresOutputDataShape {
                no_collection_support,
            } => {
                previous.iter().any(Step::has_concrete_output)
                    && !(no_collection_support && has_preceding_collection(previous))
            }
            Self::RequiresInputOutputDataShapes {
                any_previous,
                any_subsequent,
            } => {
                let has_output = if any_previous {
                    previous.iter().any(Step::has_concrete_output)
                } else {
                    previous
                        .iter()
                        .rev()
                        .find(|s| s.output_shape().is_some())
                        .is_some_and(Step::has_concrete_output)
                };
                let has_input = if any_subsequent {
                    subsequent.iter().any(Step::has_concrete_input)
                } else {
                    subsequent
                        .iter()
                        .find(|s| s.input_shape().is_some())
                        .is_some_and(Step::has_concrete_input)
                };
                has_output && has_input
            }
            Self::NoCollectionSupport => !has_preceding_collection(previous),
            Self::ConsistentSplitAggregate => consistent_split_aggregate(previous, subsequent),
        }
    }
}

/// Nearest previous step with an output shape produces a collection.
fn has_preceding_collection(previous: &[Step]) -> bool {
    previous
        .iter()
        .rev()
        .find_map(Step::output_shape)
        .is_some_and(DataShape::is_collection)
}

fn consistent_split_aggregate(previous: &[Step], subsequent: &[Step]) -> bool {
    let splits = previous.iter().filter(|s| s.is_kind(kinds::SPLIT)).count();
    let aggregates = previous.iter().filter(|s| s.is_kind(kinds::AGGREGATE)).count();
    if splits <= aggregates {
        return false;
    }

    let next_split = subsequent.iter().position(|s| s.is_kind(kinds::SPLIT));
    let next_aggregate = subsequent.iter().position(|s| s.is_kind(kinds::AGGREGATE));
    match (next_split, next_aggregate) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(split), Some(aggregate)) => split < aggregate,
    }
}

// ── Catalog ─────────────────────────────────────────────────────────

/// An insertable step kind.
#[derive(Debug, Clone, PartialEq)]
pub struct StepKind {
    pub name: String,
    pub description: String,
    pub step_kind: String,
    pub visibility: Visibility,
    /// Step action for extension steps and built-ins that declare shapes.
    pub action: Option<Action>,
}

impl StepKind {
    fn builtin(name: &str, step_kind: &str, description: &str, visibility: Visibility) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            step_kind: step_kind.to_owned(),
            visibility,
            action: None,
        }
    }

    /// A blank step of this kind, ready to be inserted into a flow.
    pub fn to_step(&self) -> Step {
        Step {
            name: Some(self.name.clone()),
            step_kind: Some(self.step_kind.clone()),
            action: self.action.clone(),
            ..Step::default()
        }
    }
}

/// Built-in step kinds plus whatever extensions contribute.
#[derive(Debug, Clone)]
pub struct StepCatalog {
    builtins: Vec<StepKind>,
}

impl Default for StepCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StepCatalog {
    pub fn builtin() -> Self {
        let mut choice = StepKind::builtin(
            "Conditional Flows",
            kinds::CHOICE,
            "Sends the message to different flows based on condition evaluation",
            Visibility::RequiresOutputDataShape {
                no_collection_support: true,
            },
        );
        choice.action = Some(Action {
            action_type: Some("step".into()),
            descriptor: Some(ActionDescriptor {
                input_data_shape: Some(DataShape::of_kind(DataShapeKind::None)),
                output_data_shape: Some(DataShape::of_kind(DataShapeKind::Any)),
                ..Default::default()
            }),
            ..Action::default()
        });

        let builtins = vec![
            StepKind::builtin(
                "Data Mapper",
                kinds::MAPPER,
                "Map fields from the input type to the output type.",
                Visibility::RequiresInputOutputDataShapes {
                    any_previous: true,
                    any_subsequent: false,
                },
            ),
            StepKind::builtin(
                "Basic Filter",
                kinds::BASIC_FILTER,
                "Continue the integration only if criteria you specify in simple input fields are met.",
                Visibility::RequiresOutputDataShape {
                    no_collection_support: true,
                },
            ),
            StepKind::builtin(
                "Template",
                kinds::TEMPLATE,
                "Upload or create a Freemarker, Mustache or Velocity template to define consistent output data.",
                Visibility::RequiresOutputDataShape {
                    no_collection_support: false,
                },
            ),
            StepKind::builtin(
                "Advanced Filter",
                kinds::ADVANCED_FILTER,
                "Continue the integration only if criteria you define in scripting language expressions are met.",
                Visibility::NoCollectionSupport,
            ),
            choice,
            StepKind::builtin(
                "Log",
                kinds::LOG,
                "Send a message to the integration's log.",
                Visibility::Always,
            ),
            StepKind::builtin(
                "Split",
                kinds::SPLIT,
                "Process each item in a set of data individually",
                Visibility::RequiresOutputDataShape {
                    no_collection_support: false,
                },
            ),
            StepKind::builtin(
                "Aggregate",
                kinds::AGGREGATE,
                "End processing items in a foreach",
                Visibility::ConsistentSplitAggregate,
            ),
        ];

        Self { builtins }
    }

    pub fn get(&self, step_kind: &str) -> Option<&StepKind> {
        self.builtins.iter().find(|k| k.step_kind == step_kind)
    }

    /// Every step kind (built-ins plus extension `step` actions), sorted
    /// by name.
    pub fn all(&self, extensions: &[Extension]) -> Vec<StepKind> {
        let mut all = self.builtins.clone();
        all.extend(extensions.iter().flat_map(|ext| {
            ext.actions.iter().filter(|a| a.is_step()).map(|action| StepKind {
                name: action.name.clone(),
                description: action.description.clone().unwrap_or_default(),
                step_kind: kinds::EXTENSION.to_owned(),
                visibility: Visibility::Always,
                action: Some(action.clone()),
            })
        }));
        all.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });
        all
    }

    /// Step kinds that may be inserted at `position`, given the steps
    /// before and after it.
    pub fn visible_steps(
        &self,
        position: usize,
        previous: &[Step],
        subsequent: &[Step],
        extensions: &[Extension],
    ) -> Vec<StepKind> {
        self.all(extensions)
            .into_iter()
            .filter(|k| k.visibility.is_visible(position, previous, subsequent))
            .collect()
    }

    /// Convenience over [`visible_steps`](Self::visible_steps) that splits
    /// a flow at `position`.
    pub fn visible_in_flow(&self, flow: &[Step], position: usize, extensions: &[Extension]) -> Vec<StepKind> {
        let position = position.min(flow.len());
        let (previous, subsequent) = flow.split_at(position);
        self.visible_steps(position, previous, subsequent, extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn shape(kind: DataShapeKind, collection: bool) -> DataShape {
        let mut shape = DataShape::of_kind(kind);
        if collection {
            shape.metadata.insert("variant".into(), "collection".into());
        }
        shape
    }

    fn endpoint(input: Option<DataShape>, output: Option<DataShape>) -> Step {
        Step {
            step_kind: Some(kinds::ENDPOINT.into()),
            action: Some(Action {
                descriptor: Some(ActionDescriptor {
                    input_data_shape: input,
                    output_data_shape: output,
                    ..Default::default()
                }),
                ..Action::default()
            }),
            ..Step::default()
        }
    }

    fn json_out() -> Step {
        endpoint(None, Some(shape(DataShapeKind::JsonSchema, false)))
    }

    fn collection_out() -> Step {
        endpoint(None, Some(shape(DataShapeKind::JsonSchema, true)))
    }

    fn json_in() -> Step {
        endpoint(Some(shape(DataShapeKind::JsonSchema, false)), None)
    }

    fn names(kinds: &[StepKind]) -> Vec<&str> {
        kinds.iter().map(|k| k.name.as_str()).collect()
    }

    #[test]
    fn catalog_is_sorted_by_name() {
        let all = StepCatalog::builtin().all(&[]);
        assert_eq!(
            names(&all),
            vec![
                "Advanced Filter",
                "Aggregate",
                "Basic Filter",
                "Conditional Flows",
                "Data Mapper",
                "Log",
                "Split",
                "Template",
            ]
        );
    }

    #[test]
    fn nothing_before_only_shape_free_steps() {
        let visible = StepCatalog::builtin().visible_steps(0, &[], &[json_in()], &[]);
        assert_eq!(names(&visible), vec!["Advanced Filter", "Log"]);
    }

    #[test]
    fn data_flowing_through_enables_mapper() {
        let flow = [json_out(), json_in()];
        let visible = StepCatalog::builtin().visible_in_flow(&flow, 1, &[]);
        assert_eq!(
            names(&visible),
            vec![
                "Advanced Filter",
                "Basic Filter",
                "Conditional Flows",
                "Data Mapper",
                "Log",
                "Split",
                "Template",
            ]
        );
    }

    #[test]
    fn mapper_only_checks_next_declared_input() {
        let none_in = endpoint(Some(shape(DataShapeKind::None, false)), None);
        let vis = Visibility::RequiresInputOutputDataShapes {
            any_previous: true,
            any_subsequent: false,
        };
        assert!(!vis.is_visible(1, &[json_out()], &[none_in.clone(), json_in()]));
        assert!(vis.is_visible(1, &[json_out()], &[Step::of_kind(kinds::LOG), json_in(), none_in]));
    }

    #[test]
    fn collection_hides_filters() {
        let visible = StepCatalog::builtin().visible_in_flow(&[collection_out(), json_in()], 1, &[]);
        let visible = names(&visible);
        assert!(!visible.contains(&"Basic Filter"));
        assert!(!visible.contains(&"Advanced Filter"));
        assert!(!visible.contains(&"Conditional Flows"));
        assert!(visible.contains(&"Split"));
        assert!(visible.contains(&"Template"));
    }

    #[test]
    fn aggregate_requires_open_split() {
        let vis = Visibility::ConsistentSplitAggregate;
        let split = Step::of_kind(kinds::SPLIT);
        let aggregate = Step::of_kind(kinds::AGGREGATE);

        assert!(!vis.is_visible(1, &[json_out()], &[]));
        assert!(vis.is_visible(2, &[json_out(), split.clone()], &[]));
        // Already closed after this position.
        assert!(!vis.is_visible(2, &[json_out(), split.clone()], &[aggregate.clone()]));
        // A nested split opens before the next aggregate.
        assert!(vis.is_visible(
            2,
            &[json_out(), split.clone()],
            &[split.clone(), aggregate.clone()]
        ));
        assert!(!vis.is_visible(3, &[json_out(), split, aggregate], &[]));
    }

    #[test]
    fn extension_step_actions_join_the_catalog() {
        let ext = Extension {
            name: "Telemetry".into(),
            actions: vec![
                Action {
                    name: "Emit Metric".into(),
                    action_type: Some("step".into()),
                    ..Action::default()
                },
                Action {
                    name: "Connector Only".into(),
                    action_type: Some("connector".into()),
                    ..Action::default()
                },
            ],
            ..Extension::default()
        };
        let visible = StepCatalog::builtin().visible_steps(0, &[], &[], &[ext]);
        assert_eq!(names(&visible), vec!["Advanced Filter", "Emit Metric", "Log"]);
        assert_eq!(visible[1].step_kind, kinds::EXTENSION);
    }
}
