// ── Domain model ──
//
// Canonical types for the resources the stores cache. Every entity keeps
// the fields the server sends that we do not model, so a read-modify-write
// round trip never drops data.

pub mod action;
pub mod connection;
pub mod integration;
pub mod step;
pub mod supporting;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use action::{Action, ActionDescriptor, DataShape, DataShapeKind};
pub use connection::Connection;
pub use integration::{Flow, Integration};
pub use step::{Extension, Step, StepCatalog, StepKind, Visibility};
pub use supporting::{IntegrationTemplate, OAuthApp};

/// A record cached by an `EntityStore`.
pub trait Entity:
    Clone + std::fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Kind discriminator used by change events, e.g. `"connection"`.
    const KIND: &'static str;

    /// Server-assigned id. `None` for an entity that was never saved.
    fn id(&self) -> Option<&str>;

    /// Human-readable name.
    fn name(&self) -> &str;
}

/// Free-form fields the server returned that are not modelled.
pub type Extra = serde_json::Map<String, serde_json::Value>;
