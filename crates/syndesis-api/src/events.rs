//! Change-event stream with auto-reconnect.
//!
//! Reserves a subscription with the server, then reads change events over a
//! WebSocket or a server-sent events stream and fans them out through a
//! [`tokio::sync::broadcast`] channel. A single background task owns the
//! connection and reconnects with exponential backoff + jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use syndesis_api::events::{EventStream, EventStreamConfig};
//!
//! let stream = EventStream::new(api.clone(), EventStreamConfig::default());
//! let mut rx = stream.subscribe();
//! stream.start();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{} {} {}", event.action, event.kind, event.id);
//! }
//!
//! stream.stop();
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::{ApiClient, error_from_status};
use crate::endpoints::Endpoint;
use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Envelope event name carrying a change notification.
pub const CHANGE_EVENT: &str = "change-event";

// ── ChangeEvent ──────────────────────────────────────────────────────

/// What happened to the entity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// A server-pushed notification that an entity changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Entity kind, e.g. `"connection"`.
    pub kind: String,
    pub id: String,
    pub action: ChangeAction,
}

impl ChangeEvent {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, action: ChangeAction) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            action,
        }
    }

    /// ASCII case-insensitive kind comparison.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.eq_ignore_ascii_case(kind)
    }
}

/// Wire shape of a change event; every field is optional on the wire.
#[derive(Debug, Deserialize)]
struct RawChangeEvent {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    action: Option<String>,
}

impl RawChangeEvent {
    fn into_event(self) -> Option<ChangeEvent> {
        let (Some(kind), Some(id), Some(action)) = (self.kind, self.id, self.action) else {
            tracing::debug!("change event without kind, id or action, dropping");
            return None;
        };
        match action.parse::<ChangeAction>() {
            Ok(action) => Some(ChangeEvent { kind, id, action }),
            Err(_) => {
                tracing::debug!(%action, %kind, %id, "unknown change action, dropping");
                None
            }
        }
    }
}

/// `{"event": ..., "data": ...}` envelope used for reservations and for
/// WebSocket messages.
#[derive(Debug, Deserialize)]
struct EventMessage {
    event: String,
    #[serde(default)]
    data: Value,
}

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Wire transport used after the reservation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum EventTransport {
    #[default]
    #[serde(rename = "websocket", alias = "ws")]
    #[strum(to_string = "websocket", serialize = "ws")]
    WebSocket,
    #[serde(rename = "sse", alias = "server-sent-events")]
    #[strum(to_string = "sse", serialize = "server-sent-events")]
    ServerSentEvents,
}

#[derive(Debug, Clone)]
pub struct EventStreamConfig {
    pub transport: EventTransport,
    pub reconnect: ReconnectConfig,
    /// Endpoint key for `POST` reservations.
    pub reservations_endpoint: String,
    /// Endpoint key for the WebSocket, with an `{id}` placeholder.
    pub websocket_endpoint: String,
    /// Endpoint key for the SSE stream, with an `{id}` placeholder.
    pub sse_endpoint: String,
    pub channel_capacity: usize,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            transport: EventTransport::default(),
            reconnect: ReconnectConfig::default(),
            reservations_endpoint: "eventReservations".into(),
            websocket_endpoint: "eventsWebSocket".into(),
            sse_endpoint: "eventsSse".into(),
            channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

// ── StreamState ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; only reached through [`EventStream::stop`].
    Stopped,
}

// ── EventStream ──────────────────────────────────────────────────────

/// Handle to the shared change-event stream.
///
/// Cheap to clone. All clones drive the same background task.
#[derive(Clone)]
pub struct EventStream {
    inner: Arc<Inner>,
}

struct Inner {
    api: ApiClient,
    config: EventStreamConfig,
    event_tx: broadcast::Sender<Arc<ChangeEvent>>,
    state_tx: watch::Sender<StreamState>,
    reconnect_tx: watch::Sender<u64>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("transport", &self.inner.config.transport)
            .field("state", &*self.inner.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl EventStream {
    pub fn new(api: ApiClient, config: EventStreamConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.channel_capacity.max(1));
        let (state_tx, _) = watch::channel(StreamState::Disconnected);
        let (reconnect_tx, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                api,
                config,
                event_tx,
                state_tx,
                reconnect_tx,
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Spawn the background connection task.
    ///
    /// Calling `start` while the task is running is a no-op, so there is
    /// never more than one connection. Must be called from within a tokio
    /// runtime.
    pub fn start(&self) {
        if self.inner.cancel.is_cancelled() {
            tracing::warn!("event stream was stopped, ignoring start");
            return;
        }
        let mut task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("event stream already running");
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move { event_loop(inner).await }));
    }

    /// Get a new receiver for change events.
    ///
    /// Receivers created before or after `start` see every event published
    /// while they exist. Slow receivers get
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.inner.event_tx.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.inner.state_tx.subscribe()
    }

    /// Generation counter bumped on every successful (re)connection.
    pub fn reconnects(&self) -> watch::Receiver<u64> {
        self.inner.reconnect_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stop the background task. Terminal: the stream cannot be restarted.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
        self.inner.state_tx.send_replace(StreamState::Stopped);
    }

    /// Publish an event locally, as if it came from the server.
    pub fn inject(&self, event: ChangeEvent) {
        // No receivers is fine.
        let _ = self.inner.event_tx.send(Arc::new(event));
    }
}

impl Inner {
    fn set_state(&self, state: StreamState) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!(from = %current, to = %state, "event stream state");
                *current = state;
                true
            }
        });
    }

    fn mark_connected(&self) {
        self.set_state(StreamState::Connected);
        self.reconnect_tx.send_modify(|generation| *generation += 1);
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            tracing::trace!(kind = %event.kind, id = %event.id, action = %event.action, "change event");
            let _ = self.event_tx.send(Arc::new(event));
        }
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: reserve → connect → read → on error, backoff → reconnect.
async fn event_loop(inner: Arc<Inner>) {
    let reconnect = inner.config.reconnect.clone();
    let mut attempt: u32 = 0;

    loop {
        inner.set_state(StreamState::Connecting);

        let result = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            result = connect_and_read(&inner) => result,
        };

        let delay = match result {
            // Clean disconnect: reset the attempt counter.
            Ok(()) => {
                tracing::info!("event stream disconnected cleanly, reconnecting");
                attempt = 0;
                reconnect.initial_delay
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "event stream error");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(max_retries = max, "event stream reconnection limit reached, giving up");
                        inner.set_state(StreamState::Disconnected);
                        break;
                    }
                }
                let delay = calculate_backoff(attempt, &reconnect);
                attempt = attempt.saturating_add(1);
                delay
            }
        };

        inner.set_state(StreamState::Disconnected);
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!("event stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_read(inner: &Inner) -> Result<(), Error> {
    let reservation = reserve(inner).await?;
    tracing::debug!(%reservation, "event reservation acquired");

    match inner.config.transport {
        EventTransport::WebSocket => read_websocket(inner, &reservation).await,
        EventTransport::ServerSentEvents => read_sse(inner, &reservation).await,
    }
}

/// `POST` a reservation; the response is `{"event":"uuid","data":"<id>"}`.
async fn reserve(inner: &Inner) -> Result<String, Error> {
    let endpoint = Endpoint::new(inner.config.reservations_endpoint.clone());
    let message: EventMessage = inner
        .api
        .request::<EventMessage, ()>(reqwest::Method::POST, &endpoint, None)
        .await
        .map_err(|e| match e {
            e @ (Error::Unauthenticated { .. } | Error::Timeout { .. }) => e,
            other => Error::EventStreamConnect(format!("reservation failed: {other}")),
        })?;

    match message.data {
        Value::String(id) if !id.is_empty() => Ok(id),
        other => Err(Error::EventStreamConnect(format!(
            "unexpected reservation response: event={} data={other}",
            message.event
        ))),
    }
}

async fn read_websocket(inner: &Inner, reservation: &str) -> Result<(), Error> {
    let endpoint = Endpoint::new(inner.config.websocket_endpoint.clone()).param("id", reservation);
    let http_url = inner.api.endpoint_url(&endpoint)?;
    let ws_url = websocket_url(&http_url)?;

    tracing::info!(url = %ws_url, "connecting to event websocket");

    let uri: tungstenite::http::Uri = ws_url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::EventStreamConnect(e.to_string()))?;
    let mut request = ClientRequestBuilder::new(uri);
    for (name, value) in inner.api.upgrade_headers(&http_url) {
        request = request.with_header(name, value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::EventStreamConnect(e.to_string()))?;

    inner.mark_connected();
    tracing::info!("event websocket connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        inner.publish(parse_text(&text));
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        tracing::trace!("websocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let Some(cf) = frame else {
                            tracing::info!("websocket close frame received (no payload)");
                            return Ok(());
                        };
                        let code = u16::from(cf.code);
                        tracing::info!(code, reason = %cf.reason, "websocket close frame received");
                        if code == 1000 {
                            return Ok(());
                        }
                        return Err(Error::EventStreamClosed { code, reason: cf.reason.to_string() });
                    }
                    Some(Err(e)) => return Err(Error::EventStreamConnect(e.to_string())),
                    None => {
                        tracing::info!("websocket stream ended");
                        return Ok(());
                    }
                    // Binary, Pong, Frame
                    _ => {}
                }
            }
        }
    }
}

async fn read_sse(inner: &Inner, reservation: &str) -> Result<(), Error> {
    let endpoint = Endpoint::new(inner.config.sse_endpoint.clone()).param("id", reservation);
    let url = inner.api.endpoint_url(&endpoint)?;

    tracing::info!(url = %url, "connecting to event stream");

    let resp = inner
        .api
        .streaming_client()?
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| Error::EventStreamConnect(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let path = resp.url().path().to_owned();
        let body = resp.text().await.unwrap_or_default();
        return Err(error_from_status(status.as_u16(), &path, &body));
    }

    inner.mark_connected();
    tracing::info!("event stream connected");

    let frames = sse_frames(resp.bytes_stream());
    futures_util::pin_mut!(frames);

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Ok(()),
            frame = frames.next() => {
                match frame {
                    Some(Ok(frame)) => inner.publish(parse_sse_frame(&frame)),
                    Some(Err(e)) => return Err(e),
                    None => {
                        tracing::info!("event stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn websocket_url(http_url: &Url) -> Result<Url, Error> {
    let mut url = http_url.clone();
    let scheme = match http_url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::EventStreamConnect(format!("cannot derive websocket URL from {http_url}")))?;
    Ok(url)
}

// ── Server-sent events framing ───────────────────────────────────────

/// One blank-line delimited server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder; feed it chunks, collect complete frames.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: String,
    current: SseFrame,
    has_data: bool,
}

impl SseDecoder {
    pub(crate) fn feed(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if self.has_data || self.current.event.is_some() {
                    frames.push(std::mem::take(&mut self.current));
                }
                self.has_data = false;
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => self.current.event = Some(value.to_owned()),
                "data" => {
                    if self.has_data {
                        self.current.data.push('\n');
                    }
                    self.current.data.push_str(value);
                    self.has_data = true;
                }
                // id, retry and unknown fields
                _ => {}
            }
        }

        frames
    }
}

/// Turn a byte stream into SSE frames.
fn sse_frames<S, B>(bytes: S) -> impl Stream<Item = Result<SseFrame, Error>>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut decoder = SseDecoder::default();
        let mut pending: Vec<u8> = Vec::new();
        futures_util::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err::<SseFrame, Error>(Error::from(e));
                    return;
                }
            };
            pending.extend_from_slice(chunk.as_ref());
            let text = drain_utf8(&mut pending);
            for frame in decoder.feed(&text) {
                yield Ok(frame);
            }
        }
    }
}

/// Take the decodable prefix of `pending` as text.
///
/// Invalid byte sequences are skipped. A truncated sequence at the end is
/// left in `pending` until the next chunk completes it.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut start = 0;
    while start < pending.len() {
        match std::str::from_utf8(&pending[start..]) {
            Ok(rest) => {
                text.push_str(rest);
                start = pending.len();
            }
            Err(e) => {
                let valid = start + e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[start..valid]));
                match e.error_len() {
                    Some(skip) => {
                        tracing::debug!(bytes = skip, "skipping invalid UTF-8 in event stream");
                        start = valid + skip;
                    }
                    None => {
                        start = valid;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..start);
    text
}

// ── Message parsing ──────────────────────────────────────────────────

fn parse_sse_frame(frame: &SseFrame) -> Vec<ChangeEvent> {
    match frame.event.as_deref() {
        Some(CHANGE_EVENT) => parse_change(&frame.data).into_iter().collect(),
        None | Some("message") => parse_text(&frame.data),
        Some(other) => {
            tracing::trace!(event = other, data = %frame.data, "ignoring event");
            Vec::new()
        }
    }
}

/// Parse a text payload: one envelope, or newline-delimited JSON objects.
/// Malformed lines are logged and skipped.
pub fn parse_text(text: &str) -> Vec<ChangeEvent> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Option<ChangeEvent> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, line, "dropping malformed event message");
            return None;
        }
    };

    if value.get("event").is_some() {
        let message: EventMessage = match serde_json::from_value(value) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed event envelope");
                return None;
            }
        };
        if message.event != CHANGE_EVENT {
            tracing::trace!(event = %message.event, data = %message.data, "ignoring event");
            return None;
        }
        return match message.data {
            Value::String(data) => parse_change(&data),
            other => change_from_value(other),
        };
    }

    change_from_value(value)
}

fn parse_change(data: &str) -> Option<ChangeEvent> {
    match serde_json::from_str::<Value>(data) {
        Ok(value) => change_from_value(value),
        Err(e) => {
            tracing::debug!(error = %e, data, "dropping malformed change event");
            None
        }
    }
}

fn change_from_value(value: Value) -> Option<ChangeEvent> {
    match serde_json::from_value::<RawChangeEvent>(value) {
        Ok(raw) => raw.into_event(),
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed change event");
            None
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
///
/// The jitter is deterministic in the attempt number.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
