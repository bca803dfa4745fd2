#![allow(clippy::unwrap_used)]
// Entity store behaviour against an in-memory server with scripted latency.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use syndesis_api::{ChangeAction, ChangeEvent};
use syndesis_core::{Connection, CoreError, Entity, EntityFilter, EntityStore, LoadState, RemoteSource};

// ── Fake server ─────────────────────────────────────────────────────

#[derive(Default)]
struct FakeServer {
    items: Mutex<Vec<Connection>>,
    log: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    next_id: AtomicUsize,
    list_delays: Mutex<VecDeque<Duration>>,
    get_delays: Mutex<VecDeque<Duration>>,
    fail_lists: AtomicUsize,
    fail_gets: AtomicUsize,
    fail_writes: AtomicBool,
}

impl FakeServer {
    fn with(items: &[(&str, &str)]) -> Arc<Self> {
        let server = Self::default();
        *server.items.lock().unwrap() = items.iter().map(|(id, name)| conn(id, name)).collect();
        Arc::new(server)
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn rename(&self, id: &str, name: &str) {
        let mut items = self.items.lock().unwrap();
        if let Some(c) = items.iter_mut().find(|c| c.id() == Some(id)) {
            c.name = name.to_owned();
        }
    }

    fn push(&self, id: &str, name: &str) {
        self.items.lock().unwrap().push(conn(id, name));
    }

    fn delay_next_list(&self, delay: Duration) {
        self.list_delays.lock().unwrap().push_back(delay);
    }

    fn delay_next_get(&self, delay: Duration) {
        self.get_delays.lock().unwrap().push_back(delay);
    }

    fn server_error() -> CoreError {
        CoreError::Server {
            status: 500,
            message: "boom".into(),
            debug_message: None,
        }
    }
}

#[derive(Clone)]
struct FakeSource(Arc<FakeServer>);

impl RemoteSource<Connection> for FakeSource {
    async fn list(&self) -> Result<Vec<Connection>, CoreError> {
        let server = &self.0;
        server.list_calls.fetch_add(1, Ordering::SeqCst);
        server.record("list");
        // The response reflects the server at request time.
        let items = server.items.lock().unwrap().clone();
        let delay = server.list_delays.lock().unwrap().pop_front();
        tokio::time::sleep(delay.unwrap_or(Duration::from_millis(5))).await;
        server.record("list:done");

        if server
            .fail_lists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CoreError::Network {
                message: "connection refused".into(),
            });
        }
        Ok(items)
    }

    async fn get(&self, id: &str) -> Result<Connection, CoreError> {
        let server = &self.0;
        server.get_calls.fetch_add(1, Ordering::SeqCst);
        server.record(format!("get:{id}"));
        let found = server.items.lock().unwrap().iter().find(|c| c.id() == Some(id)).cloned();
        let delay = server.get_delays.lock().unwrap().pop_front();
        tokio::time::sleep(delay.unwrap_or(Duration::from_millis(5))).await;
        server.record(format!("get:{id}:done"));

        if server
            .fail_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FakeServer::server_error());
        }
        found.ok_or_else(|| CoreError::NotFound {
            kind: "connection".into(),
            id: id.to_owned(),
        })
    }

    async fn create(&self, entity: &Connection) -> Result<Connection, CoreError> {
        let server = &self.0;
        if server.fail_writes.load(Ordering::SeqCst) {
            return Err(FakeServer::server_error());
        }
        let n = server.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut created = entity.clone();
        created.id = Some(format!("new-{n}"));
        created.description = Some("rev 1".into());
        server.items.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: &str, entity: &Connection) -> Result<Connection, CoreError> {
        let server = &self.0;
        if server.fail_writes.load(Ordering::SeqCst) {
            return Err(FakeServer::server_error());
        }
        let mut items = server.items.lock().unwrap();
        let slot = items
            .iter_mut()
            .find(|c| c.id() == Some(id))
            .ok_or_else(|| CoreError::NotFound {
                kind: "connection".into(),
                id: id.to_owned(),
            })?;
        let revision = slot
            .description
            .as_deref()
            .and_then(|d| d.strip_prefix("rev "))
            .and_then(|n| n.parse::<u32>().ok())
            .unwrap_or(0);
        *slot = Connection {
            description: Some(format!("rev {}", revision + 1)),
            ..entity.clone()
        };
        Ok(slot.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), CoreError> {
        let server = &self.0;
        if server.fail_writes.load(Ordering::SeqCst) {
            return Err(FakeServer::server_error());
        }
        server.items.lock().unwrap().retain(|c| c.id() != Some(id));
        Ok(())
    }
}

fn conn(id: &str, name: &str) -> Connection {
    Connection {
        id: Some(id.to_owned()),
        ..Connection::new(name)
    }
}

fn store(server: &Arc<FakeServer>) -> EntityStore<Connection, FakeSource> {
    EntityStore::new(FakeSource(Arc::clone(server)))
}

fn names(store: &EntityStore<Connection, FakeSource>) -> Vec<String> {
    store.list().iter().map(|c| c.name.clone()).collect()
}

fn event(id: &str, action: ChangeAction) -> ChangeEvent {
    ChangeEvent::new("Connection", id, action)
}

// ── Loading ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn load_all_keeps_server_order() {
    let server = FakeServer::with(&[("c1", "A"), ("c2", "B")]);
    let store = store(&server);
    assert_eq!(store.load_state(), LoadState::NeverLoaded);

    store.load_all(false).await.unwrap();

    assert_eq!(names(&store), ["A", "B"]);
    assert_eq!(store.get("c1").await.unwrap().unwrap().name, "A");
    assert_eq!(store.load_state(), LoadState::Loaded);
    assert_eq!(server.get_calls.load(Ordering::SeqCst), 0);
    assert!(store.view().last_loaded.is_some());
}

#[tokio::test(start_paused = true)]
async fn concurrent_load_all_share_one_request() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);

    let (a, b) = tokio::join!(store.load_all(false), store.load_all(false));

    assert_eq!(server.list_calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
}

#[tokio::test(start_paused = true)]
async fn loaded_store_answers_from_cache() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);

    let first = store.load_all(false).await.unwrap();
    let second = store.load_all(false).await.unwrap();

    assert_eq!(server.list_calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));

    store.load_all(true).await.unwrap();
    assert_eq!(server.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_supersedes_pending_load() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);
    server.delay_next_list(Duration::from_millis(100));
    server.delay_next_list(Duration::from_millis(10));

    let stale = tokio::spawn({
        let store = store.clone();
        async move { store.load_all(false).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    server.push("c2", "B");
    let fresh = store.load_all(true).await.unwrap();

    // The first caller follows the newer request.
    let followed = stale.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&fresh, &followed));
    assert_eq!(fresh.len(), 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(names(&store), ["A", "B"], "superseded response is discarded");
}

#[tokio::test(start_paused = true)]
async fn duplicate_ids_keep_first_occurrence() {
    let server = FakeServer::with(&[("c1", "first"), ("c1", "second"), ("c2", "B")]);
    let store = store(&server);

    store.load_all(false).await.unwrap();
    assert_eq!(names(&store), ["first", "B"]);
}

#[tokio::test(start_paused = true)]
async fn failed_initial_load_publishes_error() {
    let server = FakeServer::with(&[("c1", "A")]);
    server.fail_lists.store(1, Ordering::SeqCst);
    let store = store(&server);
    let mut stream = store.subscribe();

    let err = store.load_all(false).await.unwrap_err();
    assert!(err.is_transient());

    let view = stream.latest();
    assert_eq!(view.load_state, LoadState::NeverLoaded);
    assert_eq!(view.error, Some(err));
    assert!(stream.changed().await.is_some());

    // The next successful load clears the error slot.
    store.load_all(false).await.unwrap();
    assert_eq!(store.view().error, None);
    assert_eq!(store.load_state(), LoadState::Loaded);
}

// ── Point fetches ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn point_fetch_error_clears_on_next_success() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);
    store.load_all(false).await.unwrap();
    server.push("x9", "X");

    server.fail_gets.store(1, Ordering::SeqCst);
    assert!(store.get("x9").await.is_err());
    assert_eq!(store.view().error, Some(FakeServer::server_error()));

    let x9 = store.get("x9").await.unwrap().unwrap();
    assert_eq!(x9.name, "X");
    assert_eq!(store.view().error, None);

    // A write also clears a point error.
    server.fail_gets.store(1, Ordering::SeqCst);
    assert!(store.refresh("c1").await.is_err());
    assert!(store.view().error.is_some());
    store.create(&Connection::new("B")).await.unwrap();
    assert_eq!(store.view().error, None);
}

#[tokio::test(start_paused = true)]
async fn point_fetch_success_keeps_list_error() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);
    server.fail_lists.store(1, Ordering::SeqCst);
    let err = store.load_all(false).await.unwrap_err();

    store.get("c1").await.unwrap().unwrap();
    assert_eq!(store.view().error, Some(err));
}

#[tokio::test(start_paused = true)]
async fn concurrent_gets_share_one_request() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);

    let (a, b, c) = tokio::join!(store.get("c1"), store.get("c1"), store.get("c1"));

    assert_eq!(server.get_calls.load(Ordering::SeqCst), 1);
    let a = a.unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &b.unwrap().unwrap()));
    assert!(Arc::ptr_eq(&a, &c.unwrap().unwrap()));
}

#[tokio::test(start_paused = true)]
async fn missing_entity_is_marked_absent() {
    let server = FakeServer::with(&[]);
    let store = store(&server);

    assert!(store.get("ghost").await.unwrap().is_none());
    assert!(store.is_absent("ghost"));

    // The marker answers without another request.
    assert!(store.get("ghost").await.unwrap().is_none());
    assert_eq!(server.get_calls.load(Ordering::SeqCst), 1);

    // Reappearing in a bulk load clears it.
    server.push("ghost", "back");
    store.load_all(true).await.unwrap();
    assert!(!store.is_absent("ghost"));
    assert_eq!(store.get("ghost").await.unwrap().unwrap().name, "back");
}

#[tokio::test(start_paused = true)]
async fn dropped_caller_still_populates_cache() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);

    let caller = tokio::spawn({
        let store = store.clone();
        async move { store.get("c1").await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    caller.abort();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.get_cached("c1").unwrap().name, "A");
}

// ── Mutations ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn create_warms_the_cache() {
    let server = FakeServer::with(&[]);
    let store = store(&server);

    let created = store.create(&Connection::new("Twitter")).await.unwrap().unwrap();
    let id = created.id().unwrap().to_owned();

    let cached = store.get(&id).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&created, &cached));
    assert_eq!(server.get_calls.load(Ordering::SeqCst), 0);
    assert_eq!(server.list_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn update_reflects_server_representation() {
    let server = FakeServer::with(&[]);
    let store = store(&server);

    let created = store.create(&Connection::new("Twitter")).await.unwrap().unwrap();
    let id = created.id().unwrap().to_owned();
    assert_eq!(store.get(&id).await.unwrap().unwrap().description.as_deref(), Some("rev 1"));

    let mut edited = (*created).clone();
    edited.name = "Twitter (prod)".into();
    store.update(&edited).await.unwrap();

    let fetched = store.get(&id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "Twitter (prod)");
    assert_eq!(fetched.description.as_deref(), Some("rev 2"));
    assert_eq!(server.get_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn update_replaces_in_place() {
    let server = FakeServer::with(&[("c1", "A"), ("c2", "B"), ("c3", "C")]);
    let store = store(&server);
    store.load_all(false).await.unwrap();

    store.update(&conn("c2", "B2")).await.unwrap();
    assert_eq!(names(&store), ["A", "B2", "C"]);
}

#[tokio::test(start_paused = true)]
async fn update_without_id_is_rejected() {
    let server = FakeServer::with(&[]);
    let store = store(&server);

    let err = store.update(&Connection::new("unsaved")).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
}

#[tokio::test(start_paused = true)]
async fn delete_removes_and_marks_absent() {
    let server = FakeServer::with(&[("c1", "A"), ("c2", "B")]);
    let store = store(&server);
    store.load_all(false).await.unwrap();

    store.delete("c1").await.unwrap();

    assert_eq!(names(&store), ["B"]);
    assert!(store.is_absent("c1"));
    assert!(store.get("c1").await.unwrap().is_none());
    assert_eq!(server.get_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_mutations_leave_cache_unchanged() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);
    store.load_all(false).await.unwrap();
    let before = store.list();

    server.fail_writes.store(true, Ordering::SeqCst);
    assert!(store.create(&Connection::new("B")).await.is_err());
    assert!(store.update(&conn("c1", "A2")).await.is_err());
    assert!(store.delete("c1").await.is_err());

    assert!(Arc::ptr_eq(&before, &store.list()));
    assert!(!store.is_absent("c1"));
}

#[tokio::test(start_paused = true)]
async fn create_during_list_survives_bulk_result() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);
    server.delay_next_list(Duration::from_millis(50));

    let loading = tokio::spawn({
        let store = store.clone();
        async move { store.load_all(false).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(store.load_state(), LoadState::Loading);

    // Created after the list request captured its response.
    let created = store.create(&Connection::new("B")).await.unwrap().unwrap();

    loading.await.unwrap().unwrap();
    assert_eq!(names(&store), ["A", "B"]);
    assert!(store.get_cached(created.id().unwrap()).is_some());
}

// ── Change events ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn deleted_event_makes_entity_absent() {
    let server = FakeServer::with(&[("c1", "A"), ("c2", "B")]);
    let store = store(&server);
    store.load_all(false).await.unwrap();

    store.handle_event(&event("c1", ChangeAction::Deleted));

    assert!(store.get("c1").await.unwrap().is_none());
    assert_eq!(names(&store), ["B"]);
    assert_eq!(server.get_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn updated_event_refetches_entity() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);
    store.load_all(false).await.unwrap();
    let mut stream = store.subscribe();

    server.rename("c1", "A2");
    store.handle_event(&event("c1", ChangeAction::Updated));

    let view = stream.changed().await.unwrap();
    assert_eq!(view.snapshot.get("c1").unwrap().name, "A2");
    assert_eq!(server.get_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn events_for_other_kinds_are_ignored() {
    let server = FakeServer::with(&[("c1", "A")]);
    let store = store(&server);
    store.load_all(false).await.unwrap();

    store.handle_event(&ChangeEvent::new("integration", "c1", ChangeAction::Deleted));

    assert_eq!(names(&store), ["A"]);
    assert!(!store.is_absent("c1"));
}

#[tokio::test(start_paused = true)]
async fn event_during_load_is_applied_after_bulk_result() {
    let server = FakeServer::with(&[("c1", "OLD")]);
    let store = store(&server);
    server.delay_next_list(Duration::from_millis(50));

    let loading = tokio::spawn({
        let store = store.clone();
        async move { store.load_all(false).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    server.rename("c1", "NEW");
    store.handle_event(&event("c1", ChangeAction::Updated));

    let bulk = loading.await.unwrap().unwrap();
    assert_eq!(bulk.get("c1").unwrap().name, "OLD");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.get("c1").await.unwrap().unwrap().name, "NEW");
    assert_eq!(server.log(), ["list", "list:done", "get:c1", "get:c1:done"]);
}

#[tokio::test(start_paused = true)]
async fn event_refetch_supersedes_pending_get() {
    let server = FakeServer::with(&[("c1", "OLD")]);
    let store = store(&server);
    server.delay_next_get(Duration::from_millis(100));
    server.delay_next_get(Duration::from_millis(10));

    let waiting = tokio::spawn({
        let store = store.clone();
        async move { store.get("c1").await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    server.rename("c1", "NEW");
    store.handle_event(&event("c1", ChangeAction::Updated));

    // The original caller receives the newer result.
    assert_eq!(waiting.await.unwrap().unwrap().unwrap().name, "NEW");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.get_cached("c1").unwrap().name, "NEW", "stale response is discarded");
}

// ── Derived views ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn list_where_filters_current_snapshot() {
    let server = FakeServer::with(&[("c1", "Twitter"), ("c2", "Salesforce"), ("c3", "twitter-dev")]);
    let store = store(&server);
    store.load_all(false).await.unwrap();

    let matched: Vec<String> = store
        .list_where(&EntityFilter::NameContains("TWITTER".into()))
        .iter()
        .map(|c| c.name.clone())
        .collect();
    assert_eq!(matched, ["Twitter", "twitter-dev"]);

    store.handle_event(&event("c3", ChangeAction::Deleted));
    assert_eq!(store.list_where(&EntityFilter::NameContains("twitter".into())).len(), 1);
}
