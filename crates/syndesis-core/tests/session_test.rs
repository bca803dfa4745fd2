#![allow(clippy::unwrap_used)]
// End-to-end: REST-backed stores and event-stream wiring, using wiremock.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use syndesis_api::{ChangeAction, ChangeEvent, EventTransport, ReconnectConfig};
use syndesis_core::{CoreError, Entity, LoadState, Session, SessionConfig};

async fn setup() -> (MockServer, SessionConfig) {
    let server = MockServer::start().await;
    let mut config = SessionConfig::new(format!("{}/api/v1", server.uri()).parse().unwrap());
    config.event_transport = EventTransport::ServerSentEvents;
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        max_retries: None,
    };
    (server, config)
}

async fn mount_event_stream(server: &MockServer, body: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v1/event/reservations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event": "uuid", "data": "r1"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/events/r1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn rest_store_round_trip() {
    let (server, config) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "c1", "name": "A", "connectorId": "twitter"},
                {"id": "c2", "name": "B", "icon": "fa-b"}
            ],
            "totalCount": 2
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connections/c9"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let session = Session::new(config).unwrap();
    let store = session.connections();

    let snapshot = store.load_all(false).await.unwrap();
    let names: Vec<&str> = snapshot.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["A", "B"]);
    assert_eq!(store.get("c1").await.unwrap().unwrap().connector_id.as_deref(), Some("twitter"));
    assert!(store.get("c9").await.unwrap().is_none());
    assert!(store.is_absent("c9"));
}

#[tokio::test]
async fn rest_store_maps_auth_errors() {
    let (server, config) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/integrations"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"userMsg": "login required"})))
        .mount(&server)
        .await;

    let session = Session::new(config).unwrap();
    let err = session.integrations().load_all(false).await.unwrap_err();

    assert!(matches!(err, CoreError::Unauthenticated { status: 401, .. }));
    assert_eq!(session.integrations().view().error, Some(err));
    assert_eq!(session.integrations().load_state(), LoadState::NeverLoaded);
}

#[tokio::test]
async fn stream_events_invalidate_attached_store() {
    let (server, config) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "c1", "name": "A"},
            {"id": "c2", "name": "B"}
        ])))
        .mount(&server)
        .await;

    let session = Session::new(config).unwrap();
    let store = session.connections();
    store.load_all(false).await.unwrap();
    let mut views = store.subscribe();

    // Injected events travel the same broadcast path as server events.
    store.attach(session.events());
    session
        .events()
        .inject(ChangeEvent::new("connection", "c1", ChangeAction::Deleted));

    let view = tokio::time::timeout(Duration::from_secs(5), views.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(view.snapshot.get("c1").is_none());
    assert!(store.is_absent("c1"));

    store.detach();
    assert!(!store.is_attached());
}

#[tokio::test]
async fn failed_initial_load_retries_on_reconnect() {
    let (server, mut config) = setup().await;
    config.timeout = Duration::from_millis(200);

    // The first list times out; later ones succeed.
    Mock::given(method("GET"))
        .and(path("/api/v1/connections"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "c1", "name": "A"}])))
        .mount(&server)
        .await;
    mount_event_stream(&server, ": keep-alive\n\n").await;

    let session = Session::new(config).unwrap();
    let store = session.connections().clone();

    let err = store.load_all(false).await.unwrap_err();
    assert!(err.is_transient(), "{err:?}");
    assert_eq!(store.load_state(), LoadState::NeverLoaded);

    let mut views = store.subscribe();
    session.connect();

    let view = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let view = views.changed().await.unwrap();
            if view.load_state == LoadState::Loaded {
                return view;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(view.snapshot.get("c1").unwrap().name(), "A");
    assert_eq!(view.error, None);

    session.shutdown();
    assert!(!store.is_attached());
}
