//! Endpoint registry and path-template resolution.
//!
//! Endpoints are addressed by a logical key (`"connection"`) that maps to a
//! path template (`"/connections/{id}"`). The registry is an explicit object
//! owned by whoever composes the client; feature code may register more
//! keys at any time and the last registration for a key wins.
//!
//! Unknown keys are treated as literal paths, so `"/setup/oauth-apps"` works
//! without registration.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use url::form_urlencoded;

use crate::error::Error;

// ── Parameters ──────────────────────────────────────────────────────

/// Value bound to a named endpoint parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    One(String),
    /// Expands to a repeated query parameter (`k=a&k=b`), or a
    /// comma-joined value when used in a path placeholder.
    Many(Vec<String>),
}

/// Parameters used to fill an endpoint template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EndpointParams {
    #[default]
    None,
    /// `{name}` placeholders. Leftover names become query parameters.
    Named(Vec<(String, ParamValue)>),
    /// `{0}`, `{1}`, ... placeholders.
    Positional(Vec<String>),
}

/// A logical endpoint key (or literal path) plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    key: String,
    params: EndpointParams,
}

impl Endpoint {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            params: EndpointParams::None,
        }
    }

    /// Build an endpoint filled with positional parameters.
    pub fn positional<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            params: EndpointParams::Positional(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Bind a named parameter.
    pub fn param(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_named(name.into(), ParamValue::One(value.into()))
    }

    /// Bind a named parameter to several values.
    pub fn param_list<I, S>(self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_named(name.into(), ParamValue::Many(values))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn params(&self) -> &EndpointParams {
        &self.params
    }

    fn push_named(mut self, name: String, value: ParamValue) -> Self {
        match &mut self.params {
            EndpointParams::Named(list) => list.push((name, value)),
            other => *other = EndpointParams::Named(vec![(name, value)]),
        }
        self
    }
}

impl From<&str> for Endpoint {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for Endpoint {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Mutable map from logical endpoint key to path template.
///
/// Cheap to clone; clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    entries: Arc<DashMap<String, String>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single key. Replaces any previous template for the key.
    pub fn register(&self, key: impl Into<String>, template: impl Into<String>) {
        let key = key.into();
        let template = template.into();
        if let Some(previous) = self.entries.insert(key.clone(), template.clone()) {
            if previous != template {
                tracing::debug!(%key, %previous, %template, "endpoint template replaced");
            }
        }
    }

    /// Merge a batch of templates, last writer wins per key.
    pub fn merge<I, K, V>(&self, templates: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, template) in templates {
            self.register(key, template);
        }
    }

    pub fn template(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|t| t.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all registered templates.
    pub fn to_map(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Resolve an endpoint into a path (or absolute URL) with its query
    /// string. The base URL is not applied here.
    pub fn resolve(&self, endpoint: &Endpoint) -> Result<String, Error> {
        let template = self
            .template(endpoint.key())
            .unwrap_or_else(|| endpoint.key().to_owned());
        fill_template(&template, endpoint.params())
    }
}

// ── Template filling ────────────────────────────────────────────────

fn fill_template(template: &str, params: &EndpointParams) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len());
    let mut used: Vec<&str> = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|c| open + c) else {
            break;
        };
        out.push_str(&rest[..open]);
        let name = rest[open + 1..close].trim();
        let value = lookup(name, params).ok_or_else(|| Error::MissingParameter {
            endpoint: template.to_owned(),
            parameter: name.to_owned(),
        })?;
        out.push_str(&encode_component(&value));
        used.push(name);
        rest = &rest[close + 1..];
    }
    out.push_str(rest);

    if let EndpointParams::Named(list) = params {
        let query = list
            .iter()
            .filter(|(name, _)| !used.contains(&name.as_str()))
            .flat_map(|(name, value)| match value {
                ParamValue::One(v) => vec![query_pair(name, v)],
                ParamValue::Many(vs) => vs.iter().map(|v| query_pair(name, v)).collect(),
            })
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            out.push(if out.contains('?') { '&' } else { '?' });
            out.push_str(&query);
        }
    }

    Ok(out)
}

fn lookup(name: &str, params: &EndpointParams) -> Option<String> {
    match params {
        EndpointParams::None => None,
        EndpointParams::Named(list) => list.iter().find(|(n, _)| n == name).map(|(_, v)| match v {
            ParamValue::One(s) => s.clone(),
            ParamValue::Many(vs) => vs.join(","),
        }),
        EndpointParams::Positional(values) => {
            let index: usize = name.parse().ok()?;
            values.get(index).cloned()
        }
    }
}

fn query_pair(name: &str, value: &str) -> String {
    format!("{}={}", encode_component(name), encode_component(value))
}

/// Percent-encode a single path segment or query component.
///
/// `form_urlencoded` writes spaces as `+`, which is only valid in query
/// strings; literal `+` is already escaped as `%2B`, so swapping is safe.
pub(crate) fn encode_component(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> EndpointRegistry {
        let reg = EndpointRegistry::new();
        reg.merge([
            ("connections", "/connections"),
            ("connection", "/connections/{id}"),
            ("connectorAction", "/connectors/{0}/actions/{1}"),
            ("search", "/integrations?sort=name"),
        ]);
        reg
    }

    #[test]
    fn unknown_key_is_a_literal_path() {
        let path = registry().resolve(&Endpoint::new("/setup/oauth-apps")).unwrap();
        assert_eq!(path, "/setup/oauth-apps");
    }

    #[test]
    fn named_parameters_are_substituted_and_encoded() {
        let path = registry()
            .resolve(&Endpoint::new("connection").param("id", "a b/c"))
            .unwrap();
        assert_eq!(path, "/connections/a%20b%2Fc");
    }

    #[test]
    fn leftover_named_parameters_become_query_string() {
        let endpoint = Endpoint::new("connection")
            .param("id", "c1")
            .param("query", "kind=aws")
            .param_list("tag", ["x", "y"]);
        let path = registry().resolve(&endpoint).unwrap();
        assert_eq!(path, "/connections/c1?query=kind%3Daws&tag=x&tag=y");
    }

    #[test]
    fn query_remainder_appends_to_existing_query() {
        let path = registry()
            .resolve(&Endpoint::new("search").param("page", "2"))
            .unwrap();
        assert_eq!(path, "/integrations?sort=name&page=2");
    }

    #[test]
    fn positional_parameters_fill_by_index() {
        let path = registry()
            .resolve(&Endpoint::positional("connectorAction", ["twitter", "mention"]))
            .unwrap();
        assert_eq!(path, "/connectors/twitter/actions/mention");
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let err = registry().resolve(&Endpoint::new("connection")).unwrap_err();
        assert!(
            matches!(err, Error::MissingParameter { ref parameter, .. } if parameter == "id"),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn last_registration_wins() {
        let reg = registry();
        reg.register("connections", "/v2/connections");
        assert_eq!(reg.resolve(&Endpoint::new("connections")).unwrap(), "/v2/connections");
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn clones_share_registrations() {
        let reg = registry();
        let late = reg.clone();
        late.register("extensions", "/extensions");
        assert_eq!(reg.template("extensions").as_deref(), Some("/extensions"));
    }
}
