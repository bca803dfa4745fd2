// ── Entity store ──
//
// Per-kind caches with request coalescing and change-event invalidation.

mod entity_store;
mod snapshot;
mod source;

pub use entity_store::EntityStore;
pub use snapshot::{CollectionSnapshot, LoadState, StoreView};
pub use source::{RemoteSource, ResourceClient};
