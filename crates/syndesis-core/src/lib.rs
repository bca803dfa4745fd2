// syndesis-core: Entity store, change-event invalidation and polling between syndesis-api and consumers.

pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod session;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{SessionConfig, TlsVerification, XsrfSettings};
pub use error::CoreError;
pub use fetch::{FetchState, PollingFetch};
pub use session::{DEFAULT_ENDPOINTS, Session, Store, default_registry};
pub use store::{CollectionSnapshot, EntityStore, LoadState, RemoteSource, ResourceClient, StoreView};
pub use stream::{EntityFilter, EntityStream};

pub use model::{
    Action, ActionDescriptor, Connection, DataShape, DataShapeKind, Entity, Extension, Flow, Integration,
    IntegrationTemplate, OAuthApp, Step, StepCatalog, StepKind, Visibility,
};
