// ── Action and data shape types ──

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Entity, Extra};

/// Operation exposed by a connector or an extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `"connector"` or `"step"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    /// `"From"`, `"Pipe"` or `"To"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<ActionDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl Action {
    pub fn is_step(&self) -> bool {
        self.action_type.as_deref() == Some("step")
    }

    pub fn input_shape(&self) -> Option<&DataShape> {
        self.descriptor.as_ref()?.input_data_shape.as_ref()
    }

    pub fn output_shape(&self) -> Option<&DataShape> {
        self.descriptor.as_ref()?.output_data_shape.as_ref()
    }
}

impl Entity for Action {
    const KIND: &'static str = "action";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data_shape: Option<DataShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data_shape: Option<DataShape>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Description of the data an action consumes or produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataShape {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: DataShapeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specification: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl DataShape {
    pub fn of_kind(kind: DataShapeKind) -> Self {
        Self {
            name: kind.to_string(),
            kind,
            ..Self::default()
        }
    }

    /// A shape that actually describes data (neither `none` nor `any`).
    pub fn is_concrete(&self) -> bool {
        !matches!(self.kind, DataShapeKind::None | DataShapeKind::Any)
    }

    /// `metadata.variant == "collection"`
    pub fn is_collection(&self) -> bool {
        self.metadata.get("variant").map(String::as_str) == Some("collection")
    }
}

/// Data shape kind. Older servers send `JSON_SCHEMA`, newer ones
/// `json-schema`; both parse to the same variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataShapeKind {
    #[default]
    Any,
    None,
    Java,
    JsonSchema,
    JsonInstance,
    XmlSchema,
    XmlSchemaInspected,
    XmlInstance,
    Other(String),
}

impl From<String> for DataShapeKind {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().replace('_', "-").as_str() {
            "any" => Self::Any,
            "none" => Self::None,
            "java" => Self::Java,
            "json-schema" => Self::JsonSchema,
            "json-instance" => Self::JsonInstance,
            "xml-schema" => Self::XmlSchema,
            "xml-schema-inspected" => Self::XmlSchemaInspected,
            "xml-instance" => Self::XmlInstance,
            _ => Self::Other(raw),
        }
    }
}

impl From<DataShapeKind> for String {
    fn from(kind: DataShapeKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for DataShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Any => "any",
            Self::None => "none",
            Self::Java => "java",
            Self::JsonSchema => "json-schema",
            Self::JsonInstance => "json-instance",
            Self::XmlSchema => "xml-schema",
            Self::XmlSchemaInspected => "xml-schema-inspected",
            Self::XmlInstance => "xml-instance",
            Self::Other(raw) => raw,
        };
        f.write_str(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shape_kind_accepts_both_spellings() {
        let old: DataShape = serde_json::from_value(json!({"name": "x", "kind": "JSON_SCHEMA"})).unwrap();
        let new: DataShape = serde_json::from_value(json!({"name": "x", "kind": "json-schema"})).unwrap();
        assert_eq!(old.kind, DataShapeKind::JsonSchema);
        assert_eq!(old.kind, new.kind);
        assert!(old.is_concrete());
    }

    #[test]
    fn none_and_any_are_not_concrete() {
        assert!(!DataShape::of_kind(DataShapeKind::None).is_concrete());
        assert!(!DataShape::of_kind(DataShapeKind::Any).is_concrete());
    }

    #[test]
    fn collection_variant_comes_from_metadata() {
        let shape: DataShape = serde_json::from_value(json!({
            "kind": "json-instance",
            "metadata": { "variant": "collection" }
        }))
        .unwrap();
        assert!(shape.is_collection());
    }
}
