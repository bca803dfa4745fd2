// ── Polling fetch ──
//
// Runs one fetcher immediately and then on a fixed interval, publishing
// `{loading, error, data}` to a single consumer. A tick that arrives while
// a fetch is still pending drops that fetch and starts a new one.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::de::DeserializeOwned;
use syndesis_api::{ApiClient, Endpoint};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::CoreError;

/// What the consumer of a `PollingFetch` sees.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<T> {
    pub loading: bool,
    /// Last failure; cleared by the next success.
    pub error: Option<CoreError>,
    /// Last good value, or the default until the first success.
    pub data: T,
}

/// Handle to a running fetch loop. Stopping or dropping it cancels the
/// timer and any pending fetch.
pub struct PollingFetch<T> {
    state_rx: watch::Receiver<FetchState<T>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<T: Clone + Send + Sync + 'static> PollingFetch<T> {
    /// Start fetching. With `poll` unset the fetcher runs exactly once.
    pub fn start<F, Fut>(fetcher: F, poll: Option<Duration>, default: T) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(FetchState {
            loading: false,
            error: None,
            data: default,
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(fetch_loop(fetcher, poll, state_tx, cancel.clone()));
        Self {
            state_rx,
            cancel,
            task,
        }
    }

    /// Poll a GET endpoint through the REST client.
    pub fn endpoint(api: ApiClient, endpoint: Endpoint, poll: Option<Duration>, default: T) -> Self
    where
        T: DeserializeOwned,
    {
        Self::start(
            move || {
                let api = api.clone();
                let endpoint = endpoint.clone();
                async move { api.get::<T>(&endpoint).await.map_err(CoreError::from) }
            },
            poll,
            default,
        )
    }

    pub fn state(&self) -> FetchState<T> {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.state_rx.clone()
    }

    /// Wait for the next published state. Returns `None` once the loop has
    /// ended.
    pub async fn changed(&mut self) -> Option<FetchState<T>> {
        self.state_rx.changed().await.ok()?;
        Some(self.state_rx.borrow_and_update().clone())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }
}

impl<T> Drop for PollingFetch<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn fetch_loop<T, F, Fut>(
    fetcher: F,
    poll: Option<Duration>,
    state_tx: watch::Sender<FetchState<T>>,
    cancel: CancellationToken,
) where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
{
    let mut ticker = poll.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let mut pending = Some(begin(&fetcher, &state_tx));

    while pending.is_some() || ticker.is_some() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = settle(&mut pending) => {
                pending = None;
                apply(&state_tx, result);
            }
            () = next_tick(&mut ticker) => {
                if pending.is_some() {
                    debug!("poll tick superseded a pending fetch");
                }
                pending = Some(begin(&fetcher, &state_tx));
            }
        }
    }

    state_tx.send_if_modified(|state| std::mem::replace(&mut state.loading, false));
    trace!("polling fetch stopped");
}

fn begin<T, F, Fut>(fetcher: &F, state_tx: &watch::Sender<FetchState<T>>) -> Pin<Box<Fut>>
where
    F: Fn() -> Fut,
{
    state_tx.send_if_modified(|state| !std::mem::replace(&mut state.loading, true));
    Box::pin(fetcher())
}

fn apply<T>(state_tx: &watch::Sender<FetchState<T>>, result: Result<T, CoreError>) {
    state_tx.send_modify(|state| {
        state.loading = false;
        match result {
            Ok(data) => {
                state.data = data;
                state.error = None;
            }
            Err(e) => {
                warn!(error = %e, "polled fetch failed");
                state.error = Some(e);
            }
        }
    });
}

async fn settle<F: Future + Unpin>(pending: &mut Option<F>) -> F::Output {
    match pending {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_fetcher(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl Fn() -> Pin<Box<dyn Future<Output = Result<usize, CoreError>> + Send>> + Send + 'static
    {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(n)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_stopped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = PollingFetch::start(
            counting_fetcher(&calls, Duration::ZERO),
            Some(Duration::from_millis(1000)),
            0,
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetch.state().data, 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // t = 1500ms
        tokio::time::sleep(Duration::from_millis(490)).await;
        fetch.stop();
        assert!(fetch.is_stopped());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "no fetch after stop");
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_the_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = PollingFetch::start(
            counting_fetcher(&calls, Duration::ZERO),
            Some(Duration::from_millis(100)),
            0,
        );
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(fetch);
        let seen = calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_is_superseded_by_the_next_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        // Each fetch takes longer than the poll interval, so none completes.
        let fetch = PollingFetch::start(
            counting_fetcher(&calls, Duration::from_millis(1500)),
            Some(Duration::from_millis(1000)),
            0,
        );

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let state = fetch.state();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(state.loading);
        assert_eq!(state.data, 0, "stale results never land");
    }

    #[tokio::test(start_paused = true)]
    async fn errors_keep_the_last_good_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetch = PollingFetch::start(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok("first".to_owned())
                    } else {
                        Err(CoreError::Network {
                            message: "connection refused".into(),
                        })
                    }
                }
            },
            Some(Duration::from_millis(100)),
            String::new(),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        let state = fetch.state();
        assert_eq!(state.data, "first");
        assert!(!state.loading);
        assert!(matches!(state.error, Some(CoreError::Network { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn without_poll_fetches_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut fetch = PollingFetch::start(counting_fetcher(&calls, Duration::ZERO), None, 0);

        let mut state = fetch.state();
        while state.loading || state.data == 0 {
            state = fetch.changed().await.unwrap();
        }
        assert_eq!(state.data, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(fetch.is_stopped());
    }
}
