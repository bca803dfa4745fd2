// ── Connection domain type ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Entity, Extra};

/// A configured instance of a connector (credentials, endpoint options).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// `true` when the server created the connection from a connector
    /// default rather than a user edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configured_properties: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl Connection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Entity for Connection {
    const KIND: &'static str = "connection";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
