// ── Session ──
//
// Composition root: one REST client, one shared change-event stream and
// one entity store per kind. Nothing here is global; consumers construct a
// `Session` and pass it around.

use std::future::Future;
use std::sync::Arc;

use syndesis_api::{
    ApiClient, EndpointRegistry, EventStream, EventStreamConfig, ResourceEndpoints, StreamState,
    TransportConfig, XsrfConfig,
};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::model::{Action, Connection, Entity, Integration, IntegrationTemplate, OAuthApp};
use crate::store::{EntityStore, ResourceClient};

/// Store backed by the REST client.
pub type Store<T> = EntityStore<T, ResourceClient<T>>;

/// Built-in endpoint templates, relative to the API base.
pub const DEFAULT_ENDPOINTS: &[(&str, &str)] = &[
    ("connections", "/connections"),
    ("connection", "/connections/{id}"),
    ("integrations", "/integrations"),
    ("integration", "/integrations/{id}"),
    ("actions", "/actions"),
    ("action", "/actions/{id}"),
    ("oauthApps", "/setup/oauth-apps"),
    ("oauthApp", "/setup/oauth-apps/{id}"),
    ("integrationTemplates", "/integration-templates"),
    ("integrationTemplate", "/integration-templates/{id}"),
    ("extensions", "/extensions"),
    ("extension", "/extensions/{id}"),
    ("eventReservations", "/event/reservations"),
    ("eventsWebSocket", "/wsevents/{id}"),
    ("eventsSse", "/events/{id}"),
];

/// Registry seeded with [`DEFAULT_ENDPOINTS`].
pub fn default_registry() -> EndpointRegistry {
    let registry = EndpointRegistry::new();
    registry.merge(DEFAULT_ENDPOINTS.iter().copied());
    registry
}

/// Cheaply cloneable handle; clones share stores and the event stream.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    api: ApiClient,
    events: EventStream,
    connections: Store<Connection>,
    integrations: Store<Integration>,
    actions: Store<Action>,
    oauth_apps: Store<OAuthApp>,
    templates: Store<IntegrationTemplate>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.inner.config.url.as_str())
            .field("events", &self.inner.events)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Build the client, event stream and stores. Does not touch the
    /// network; call [`connect()`](Self::connect) to start the event stream.
    pub fn new(config: SessionConfig) -> Result<Self, CoreError> {
        let registry = default_registry();
        registry.merge(config.endpoints.clone());

        let transport = TransportConfig {
            tls: (&config.tls).into(),
            timeout: config.timeout,
            cookie_jar: None,
        }
        .with_cookie_jar();

        let defaults = XsrfConfig::default();
        let xsrf = XsrfConfig {
            cookie_name: config.xsrf.cookie_name.clone().unwrap_or(defaults.cookie_name),
            header_name: config.xsrf.header_name.clone().unwrap_or(defaults.header_name),
            fallback_token: config.xsrf.token.clone(),
        };

        let api = ApiClient::new(
            config.url.as_str(),
            config.token.as_ref(),
            &transport,
            registry,
            xsrf,
        )?;
        let events = EventStream::new(
            api.clone(),
            EventStreamConfig {
                transport: config.event_transport,
                reconnect: config.reconnect.clone(),
                ..EventStreamConfig::default()
            },
        );

        let inner = SessionInner {
            connections: store(&api, "connections", "connection"),
            integrations: store(&api, "integrations", "integration"),
            actions: store(&api, "actions", "action"),
            oauth_apps: store(&api, "oauthApps", "oauthApp"),
            templates: store(&api, "integrationTemplates", "integrationTemplate"),
            config,
            api,
            events,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the change-event stream (when enabled) and attach every store
    /// to it.
    pub fn connect(&self) {
        if !self.inner.config.events_enabled {
            debug!("event stream disabled, stores rely on explicit loads");
            return;
        }
        // Attach before starting so no reconnect generation is missed.
        let events = &self.inner.events;
        self.inner.connections.attach(events);
        self.inner.integrations.attach(events);
        self.inner.actions.attach(events);
        self.inner.oauth_apps.attach(events);
        self.inner.templates.attach(events);
        events.start();
        info!(url = %self.inner.config.url, transport = %self.inner.config.event_transport, "session connected");
    }

    /// Detach stores and stop the event stream. Idempotent.
    pub fn shutdown(&self) {
        self.inner.connections.detach();
        self.inner.integrations.detach();
        self.inner.actions.detach();
        self.inner.oauth_apps.detach();
        self.inner.templates.detach();
        self.inner.events.stop();
        debug!("session shut down");
    }

    /// Run one closure against a fresh session without the event stream.
    pub async fn oneshot<F, Fut, T>(config: SessionConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut config = config;
        config.events_enabled = false;
        let session = Session::new(config)?;
        let result = f(session.clone()).await;
        session.shutdown();
        result
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn events(&self) -> &EventStream {
        &self.inner.events
    }

    pub fn event_state(&self) -> watch::Receiver<StreamState> {
        self.inner.events.state()
    }

    pub fn connections(&self) -> &Store<Connection> {
        &self.inner.connections
    }

    pub fn integrations(&self) -> &Store<Integration> {
        &self.inner.integrations
    }

    pub fn actions(&self) -> &Store<Action> {
        &self.inner.actions
    }

    pub fn oauth_apps(&self) -> &Store<OAuthApp> {
        &self.inner.oauth_apps
    }

    pub fn templates(&self) -> &Store<IntegrationTemplate> {
        &self.inner.templates
    }
}

fn store<T: Entity>(api: &ApiClient, collection: &str, item: &str) -> Store<T> {
    EntityStore::new(ResourceClient::new(
        api.clone(),
        ResourceEndpoints::new(collection, item),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new("https://syndesis.example.com/api/v1".parse().unwrap())
    }

    #[test]
    fn default_map_resolves_item_endpoints() {
        let registry = default_registry();
        let path = registry
            .resolve(&syndesis_api::Endpoint::new("oauthApp").param("id", "twitter"))
            .unwrap();
        assert_eq!(path, "/setup/oauth-apps/twitter");
    }

    #[test]
    fn profile_endpoints_override_defaults() {
        let mut config = config();
        config
            .endpoints
            .insert("connections".into(), "/v2/connections".into());
        let session = Session::new(config).unwrap();
        let registry = session.api().registry();
        assert_eq!(registry.template("connections").as_deref(), Some("/v2/connections"));
        assert_eq!(registry.template("connection").as_deref(), Some("/connections/{id}"));
    }

    #[tokio::test]
    async fn oneshot_never_starts_the_event_stream() {
        let seen = Session::oneshot(config(), |session| async move {
            Ok(session.events().is_running())
        })
        .await
        .unwrap();
        assert!(!seen);
    }
}
