// ── Entity store ──
//
// Client-side cache for one entity kind, kept consistent with the server
// by explicit loads, mutation responses and change events.
//
// Locking: `state` is a short synchronous mutex, never held across an
// await. Point flights live in a DashMap but are only created, replaced or
// removed while `state` is held, so the two never disagree.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use syndesis_api::{ChangeAction, ChangeEvent, EventStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::snapshot::{CollectionSnapshot, LoadState, StoreView};
use super::source::RemoteSource;
use crate::error::CoreError;
use crate::model::Entity;
use crate::stream::{EntityFilter, EntityStream};

type SnapshotResult<T> = Result<Arc<CollectionSnapshot<T>>, CoreError>;
type EntityResult<T> = Result<Option<Arc<T>>, CoreError>;

/// Result of one fetch as seen by its waiters.
#[derive(Debug)]
enum Outcome<R> {
    /// The response was current and has been applied to the cache.
    Applied(R),
    /// A newer request replaced this one; waiters must follow it.
    Superseded,
}

impl<R: Clone> Clone for Outcome<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Applied(r) => Self::Applied(r.clone()),
            Self::Superseded => Self::Superseded,
        }
    }
}

type SharedFetch<R> = Shared<BoxFuture<'static, Outcome<R>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListOrigin {
    Caller,
    ReconnectRetry,
}

struct ListFlight<T> {
    request_id: u64,
    origin: ListOrigin,
    future: SharedFetch<SnapshotResult<T>>,
}

struct PointFlight<T> {
    request_id: u64,
    future: SharedFetch<EntityResult<T>>,
}

/// A cache write made while a list fetch was in flight, replayed on top of
/// the bulk result.
enum LocalWrite<T> {
    Upsert(String, Arc<T>),
    Remove(String),
}

struct State<T> {
    snapshot: Arc<CollectionSnapshot<T>>,
    load_state: LoadState,
    loaded_once: bool,
    error: Option<CoreError>,
    /// Set while `error` came from a point fetch rather than a list fetch.
    point_error: bool,
    last_loaded: Option<chrono::DateTime<Utc>>,
    absent: HashSet<String>,
    list_flight: Option<ListFlight<T>>,
    overlay: Vec<LocalWrite<T>>,
    queued_events: Vec<ChangeEvent>,
    retry_on_reconnect: bool,
}

impl<T: Entity> State<T> {
    fn new() -> Self {
        Self {
            snapshot: Arc::new(CollectionSnapshot::default()),
            load_state: LoadState::NeverLoaded,
            loaded_once: false,
            error: None,
            point_error: false,
            last_loaded: None,
            absent: HashSet::new(),
            list_flight: None,
            overlay: Vec::new(),
            queued_events: Vec::new(),
            retry_on_reconnect: false,
        }
    }

    fn view(&self) -> StoreView<T> {
        StoreView {
            snapshot: Arc::clone(&self.snapshot),
            load_state: self.load_state,
            error: self.error.clone(),
            last_loaded: self.last_loaded,
        }
    }

    fn upsert(&mut self, id: &str, entity: Arc<T>) {
        self.absent.remove(id);
        self.snapshot = Arc::new(self.snapshot.with_upsert(id, Arc::clone(&entity)));
        if self.list_flight.is_some() {
            self.overlay.push(LocalWrite::Upsert(id.to_owned(), entity));
        }
    }

    fn set_list_error(&mut self, error: Option<CoreError>) {
        self.error = error;
        self.point_error = false;
    }

    /// A successful point fetch or write clears an error left by an
    /// earlier point fetch. List errors stay until a list fetch succeeds.
    fn clear_point_error(&mut self) {
        if self.point_error {
            self.error = None;
            self.point_error = false;
        }
    }

    fn remove(&mut self, id: &str) {
        self.absent.insert(id.to_owned());
        if let Some(next) = self.snapshot.without(id) {
            self.snapshot = Arc::new(next);
        }
        if self.list_flight.is_some() {
            self.overlay.push(LocalWrite::Remove(id.to_owned()));
        }
    }
}

struct Inner<T, S> {
    source: S,
    state: Mutex<State<T>>,
    points: DashMap<String, PointFlight<T>>,
    view_tx: watch::Sender<StoreView<T>>,
    next_request_id: AtomicU64,
    attachment: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Cache and synchronization for one entity kind.
///
/// Cheap to clone; clones share the same cache.
pub struct EntityStore<T, S> {
    inner: Arc<Inner<T, S>>,
}

impl<T, S> Clone for EntityStore<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity, S: RemoteSource<T>> EntityStore<T, S> {
    pub fn new(source: S) -> Self {
        let (view_tx, _) = watch::channel(StoreView::default());
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(State::new()),
                points: DashMap::new(),
                view_tx,
                next_request_id: AtomicU64::new(1),
                attachment: Mutex::new(None),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        T::KIND
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Cached entity, or a point fetch shared with every concurrent caller
    /// for the same id. `Ok(None)` means the entity is known not to exist.
    pub async fn get(&self, id: &str) -> EntityResult<T> {
        loop {
            let flight = {
                let state = self.inner.lock();
                if let Some(entity) = state.snapshot.get(id) {
                    return Ok(Some(entity));
                }
                if state.absent.contains(id) {
                    return Ok(None);
                }
                self.inner.point_flight(id, false)
            };
            match flight.await {
                Outcome::Applied(result) => return result,
                Outcome::Superseded => trace!(kind = T::KIND, id, "point fetch superseded, following"),
            }
        }
    }

    /// Re-fetch `id` even if cached, superseding any pending fetch for it.
    pub async fn refresh(&self, id: &str) -> EntityResult<T> {
        let flight = {
            let _state = self.inner.lock();
            self.inner.point_flight(id, true)
        };
        match flight.await {
            Outcome::Applied(result) => result,
            Outcome::Superseded => self.get(id).await,
        }
    }

    /// The whole collection. Without `force`, a loaded store answers from
    /// cache; otherwise all concurrent callers share one list request.
    pub async fn load_all(&self, force: bool) -> SnapshotResult<T> {
        let mut force = force;
        loop {
            let flight = {
                let mut state = self.inner.lock();
                let pending = if force {
                    None
                } else {
                    state.list_flight.as_ref().map(|f| f.future.clone())
                };
                match pending {
                    Some(future) => future,
                    None if !force && state.load_state == LoadState::Loaded => {
                        return Ok(Arc::clone(&state.snapshot));
                    }
                    None => self.inner.start_list_flight(&mut state, ListOrigin::Caller),
                }
            };
            match flight.await {
                Outcome::Applied(result) => return result,
                Outcome::Superseded => {
                    trace!(kind = T::KIND, "list fetch superseded, following");
                    force = false;
                }
            }
        }
    }

    /// Current snapshot, without any network traffic.
    pub fn list(&self) -> Arc<CollectionSnapshot<T>> {
        Arc::clone(&self.inner.lock().snapshot)
    }

    /// Entities of the current snapshot matching `filter`.
    pub fn list_where(&self, filter: &EntityFilter<T>) -> Vec<Arc<T>> {
        self.list()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn get_cached(&self, id: &str) -> Option<Arc<T>> {
        self.inner.lock().snapshot.get(id)
    }

    pub fn is_absent(&self, id: &str) -> bool {
        self.inner.lock().absent.contains(id)
    }

    pub fn load_state(&self) -> LoadState {
        self.inner.lock().load_state
    }

    pub fn view(&self) -> StoreView<T> {
        self.inner.lock().view()
    }

    pub fn subscribe(&self) -> EntityStream<T> {
        EntityStream::new(self.inner.view_tx.subscribe())
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Create on the server and cache the returned representation.
    pub async fn create(&self, entity: &T) -> EntityResult<T> {
        let created = self.inner.source.create(entity).await?;
        let Some(id) = created.id().map(str::to_owned) else {
            return Err(CoreError::Internal(format!("created {} has no id", T::KIND)));
        };
        let created = Arc::new(created);
        self.inner.apply_write(&id, Some(Arc::clone(&created)));
        debug!(kind = T::KIND, %id, "created");
        Ok(Some(created))
    }

    /// Replace on the server and cache the returned representation.
    pub async fn update(&self, entity: &T) -> EntityResult<T> {
        let Some(id) = entity.id().map(str::to_owned) else {
            return Err(CoreError::Validation {
                message: format!("cannot update a {} without an id", T::KIND),
            });
        };
        let updated = Arc::new(self.inner.source.update(&id, entity).await?);
        self.inner.apply_write(&id, Some(Arc::clone(&updated)));
        debug!(kind = T::KIND, %id, "updated");
        Ok(Some(updated))
    }

    /// Delete on the server, then drop `id` from the cache and mark it
    /// absent.
    pub async fn delete(&self, id: &str) -> Result<(), CoreError> {
        self.inner.source.delete(id).await?;
        self.inner.apply_write(id, None);
        debug!(kind = T::KIND, id, "deleted");
        Ok(())
    }

    // ── Change events ────────────────────────────────────────────────

    /// Apply a change event. Events for other kinds are ignored.
    pub fn handle_event(&self, event: &ChangeEvent) {
        if event.is_kind(T::KIND) {
            self.inner.apply_event(event.clone());
        }
    }

    /// Follow `events`: invalidate on change events and retry a failed
    /// initial load once the stream reconnects. Replaces any previous
    /// attachment.
    pub fn attach(&self, events: &EventStream) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(event_task(
            Arc::clone(&self.inner),
            events.subscribe(),
            events.reconnects(),
            cancel.clone(),
        ));
        let previous = self
            .inner
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((cancel, task));
        if let Some((cancel, _)) = previous {
            cancel.cancel();
        }
    }

    pub fn detach(&self) {
        let attachment = self
            .inner
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((cancel, _task)) = attachment {
            cancel.cancel();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|(_, task)| !task.is_finished())
    }
}

// ── Internals ───────────────────────────────────────────────────────

impl<T: Entity, S: RemoteSource<T>> Inner<T, S> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &State<T>) {
        self.view_tx.send_replace(state.view());
    }

    fn request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Join or start the point fetch for `id`. Caller holds `state`.
    fn point_flight(self: &Arc<Self>, id: &str, supersede: bool) -> SharedFetch<EntityResult<T>> {
        if !supersede {
            if let Some(flight) = self.points.get(id) {
                return flight.future.clone();
            }
        }

        let request_id = self.request_id();
        trace!(kind = T::KIND, id, request_id, "point fetch");
        let inner = Arc::clone(self);
        let owned_id = id.to_owned();
        let task = tokio::spawn(async move {
            let result = inner.source.get(&owned_id).await;
            inner.finish_point(&owned_id, request_id, result)
        });
        let future = join_task(task);
        self.points.insert(
            id.to_owned(),
            PointFlight {
                request_id,
                future: future.clone(),
            },
        );
        future
    }

    fn finish_point(&self, id: &str, request_id: u64, result: Result<T, CoreError>) -> Outcome<EntityResult<T>> {
        let mut state = self.lock();
        let current = self.points.get(id).map(|f| f.request_id);
        if current != Some(request_id) {
            trace!(kind = T::KIND, id, request_id, "discarding superseded point response");
            return Outcome::Superseded;
        }
        self.points.remove(id);

        let outcome = match result {
            Ok(entity) => {
                let entity = Arc::new(entity);
                state.upsert(id, Arc::clone(&entity));
                state.clear_point_error();
                Ok(Some(entity))
            }
            Err(e) if e.is_not_found() => {
                debug!(kind = T::KIND, id, "entity does not exist, marking absent");
                state.remove(id);
                state.clear_point_error();
                Ok(None)
            }
            Err(e) => {
                warn!(kind = T::KIND, id, error = %e, "point fetch failed");
                if state.error.is_none() || state.point_error {
                    state.error = Some(e.clone());
                    state.point_error = true;
                }
                Err(e)
            }
        };
        self.publish(&state);
        Outcome::Applied(outcome)
    }

    /// Start a list fetch, superseding any pending one. Caller holds `state`.
    fn start_list_flight(self: &Arc<Self>, state: &mut State<T>, origin: ListOrigin) -> SharedFetch<SnapshotResult<T>> {
        let request_id = self.request_id();
        if let Some(previous) = state.list_flight.take() {
            debug!(
                kind = T::KIND,
                superseded = previous.request_id,
                request_id,
                "list fetch superseded"
            );
            state.overlay.clear();
        }
        trace!(kind = T::KIND, request_id, "list fetch");

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = inner.source.list().await;
            inner.finish_list(request_id, result)
        });
        let future = join_task(task);
        state.list_flight = Some(ListFlight {
            request_id,
            origin,
            future: future.clone(),
        });
        state.load_state = LoadState::Loading;
        self.publish(state);
        future
    }

    fn finish_list(self: &Arc<Self>, request_id: u64, result: Result<Vec<T>, CoreError>) -> Outcome<SnapshotResult<T>> {
        let (outcome, queued) = {
            let mut state = self.lock();
            let origin = match &state.list_flight {
                Some(flight) if flight.request_id == request_id => flight.origin,
                _ => {
                    trace!(kind = T::KIND, request_id, "discarding superseded list response");
                    return Outcome::Superseded;
                }
            };
            state.list_flight = None;
            let overlay = std::mem::take(&mut state.overlay);

            let outcome = match result {
                Ok(items) => {
                    let mut snapshot = CollectionSnapshot::from_items(items);
                    for id in snapshot.ids() {
                        state.absent.remove(id);
                    }
                    for write in overlay {
                        match write {
                            LocalWrite::Upsert(id, entity) => {
                                state.absent.remove(&id);
                                snapshot = snapshot.with_upsert(&id, entity);
                            }
                            LocalWrite::Remove(id) => {
                                if let Some(next) = snapshot.without(&id) {
                                    snapshot = next;
                                }
                                state.absent.insert(id);
                            }
                        }
                    }
                    let snapshot = Arc::new(snapshot);
                    debug!(kind = T::KIND, count = snapshot.len(), "collection loaded");
                    state.snapshot = Arc::clone(&snapshot);
                    state.load_state = LoadState::Loaded;
                    state.loaded_once = true;
                    state.set_list_error(None);
                    state.last_loaded = Some(Utc::now());
                    state.retry_on_reconnect = false;
                    Ok(snapshot)
                }
                Err(e) => {
                    warn!(kind = T::KIND, error = %e, "list fetch failed");
                    state.load_state = if state.loaded_once {
                        LoadState::Loaded
                    } else {
                        LoadState::NeverLoaded
                    };
                    state.retry_on_reconnect =
                        !state.loaded_once && e.is_transient() && origin == ListOrigin::Caller;
                    state.set_list_error(Some(e.clone()));
                    Err(e)
                }
            };
            self.publish(&state);
            (outcome, std::mem::take(&mut state.queued_events))
        };

        // Bulk first, then the targeted invalidations that arrived meanwhile.
        for event in queued {
            self.apply_event(event);
        }
        Outcome::Applied(outcome)
    }

    /// Cache a mutation result (`None` removes). Pending point fetches for
    /// the id are superseded.
    fn apply_write(&self, id: &str, entity: Option<Arc<T>>) {
        let mut state = self.lock();
        self.points.remove(id);
        match entity {
            Some(entity) => state.upsert(id, entity),
            None => state.remove(id),
        }
        state.clear_point_error();
        self.publish(&state);
    }

    fn apply_event(self: &Arc<Self>, event: ChangeEvent) {
        let mut state = self.lock();
        if state.list_flight.is_some() {
            trace!(kind = T::KIND, id = %event.id, action = %event.action, "queueing change event behind list fetch");
            state.queued_events.push(event);
            return;
        }

        match event.action {
            ChangeAction::Deleted => {
                debug!(kind = T::KIND, id = %event.id, "deleted on server");
                self.points.remove(&event.id);
                state.remove(&event.id);
                self.publish(&state);
            }
            ChangeAction::Created | ChangeAction::Updated => {
                debug!(kind = T::KIND, id = %event.id, action = %event.action, "re-fetching after change");
                // The flight applies its own result; nobody needs to await it.
                drop(self.point_flight(&event.id, true));
            }
        }
    }

    /// Event stream (re)connected: retry a failed initial load, once.
    fn on_reconnect(self: &Arc<Self>) {
        let mut state = self.lock();
        if !state.retry_on_reconnect || state.list_flight.is_some() {
            return;
        }
        state.retry_on_reconnect = false;
        debug!(kind = T::KIND, "retrying initial load after reconnect");
        drop(self.start_list_flight(&mut state, ListOrigin::ReconnectRetry));
    }

    /// Events were dropped; only a full reload restores consistency.
    fn on_lagged(self: &Arc<Self>, missed: u64) {
        let mut state = self.lock();
        warn!(kind = T::KIND, missed, "change events lagged");
        if state.loaded_once && state.list_flight.is_none() {
            drop(self.start_list_flight(&mut state, ListOrigin::Caller));
        }
    }
}

/// Await a spawned fetch; a panicked task becomes an internal error.
fn join_task<R>(task: JoinHandle<Outcome<Result<R, CoreError>>>) -> SharedFetch<Result<R, CoreError>>
where
    R: Clone + Send + Sync + 'static,
{
    async move {
        task.await.unwrap_or_else(|e| {
            Outcome::Applied(Err(CoreError::Internal(format!("fetch task failed: {e}"))))
        })
    }
    .boxed()
    .shared()
}

// ── Event task ──────────────────────────────────────────────────────

async fn event_task<T: Entity, S: RemoteSource<T>>(
    inner: Arc<Inner<T, S>>,
    mut events: broadcast::Receiver<Arc<ChangeEvent>>,
    mut reconnects: watch::Receiver<u64>,
    cancel: CancellationToken,
) {
    let mut watching_reconnects = true;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => {
                    if event.is_kind(T::KIND) {
                        inner.apply_event((*event).clone());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => inner.on_lagged(missed),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = reconnects.changed(), if watching_reconnects => {
                if changed.is_ok() {
                    inner.on_reconnect();
                } else {
                    watching_reconnects = false;
                }
            }
        }
    }
    trace!(kind = T::KIND, "store event task exiting");
}
