// ── Supporting domain types ──
//
// Smaller resources that share the generic store machinery.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::integration::Flow;
use super::{Entity, Extra};

/// OAuth client registration for a connector (client id / secret).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthApp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configured_properties: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl OAuthApp {
    /// An app counts as configured once a client id has been set.
    pub fn is_configured(&self) -> bool {
        self.configured_properties
            .get("clientId")
            .is_some_and(|v| !v.is_empty())
    }
}

impl Entity for OAuthApp {
    const KIND: &'static str = "oauth-app";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Prebuilt integration users can start from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flows: Vec<Flow>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl Entity for IntegrationTemplate {
    const KIND: &'static str = "integration-template";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
