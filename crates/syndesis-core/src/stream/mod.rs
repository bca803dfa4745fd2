// ── Reactive store views ──
//
// Subscription types for consuming store changes.

mod filter;

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::store::StoreView;

pub use filter::EntityFilter;

/// A subscription to one entity store.
///
/// Provides point-in-time access and change notification via `changed()`
/// or by converting to a `Stream`. Every view carries the snapshot, load
/// state and last error together.
pub struct EntityStream<T: Send + Sync + 'static> {
    current: StoreView<T>,
    receiver: watch::Receiver<StoreView<T>>,
}

impl<T: Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<StoreView<T>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The view captured at creation (or at the last `changed()`).
    pub fn current(&self) -> &StoreView<T> {
        &self.current
    }

    /// The latest view, which may be newer than `current()`.
    pub fn latest(&self) -> StoreView<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<StoreView<T>> {
        self.receiver.changed().await.ok()?;
        let view = self.receiver.borrow_and_update().clone();
        self.current = view.clone();
        Some(view)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> EntityWatchStream<T> {
        EntityWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`; yields the current view
/// first, then one per change.
pub struct EntityWatchStream<T: Send + Sync + 'static> {
    inner: WatchStream<StoreView<T>>,
}

impl<T: Send + Sync + 'static> Stream for EntityWatchStream<T> {
    type Item = StoreView<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
