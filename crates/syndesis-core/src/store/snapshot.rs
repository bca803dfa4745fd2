// ── Immutable collection snapshots ──
//
// Ordered entities plus an id index, rebuilt as a whole on every change so
// the ordering and the map can never disagree. Subscribers hold `Arc`s to
// old snapshots for as long as they like.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::model::Entity;

/// Ordered, de-duplicated entities of one kind.
#[derive(Debug)]
pub struct CollectionSnapshot<T> {
    items: Vec<Arc<T>>,
    index: HashMap<String, usize>,
}

impl<T> Default for CollectionSnapshot<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Entity> CollectionSnapshot<T> {
    /// Build from a server list, keeping server order. The first
    /// occurrence of a repeated id wins; entities without an id are
    /// skipped.
    pub fn from_items(items: Vec<T>) -> Self {
        let mut snapshot = Self {
            items: Vec::with_capacity(items.len()),
            index: HashMap::with_capacity(items.len()),
        };
        for item in items {
            let Some(id) = item.id().map(str::to_owned) else {
                tracing::warn!(kind = T::KIND, name = item.name(), "list entry without id, skipping");
                continue;
            };
            if snapshot.index.contains_key(&id) {
                tracing::warn!(kind = T::KIND, %id, "duplicate id in list response, keeping first");
                continue;
            }
            snapshot.index.insert(id, snapshot.items.len());
            snapshot.items.push(Arc::new(item));
        }
        snapshot
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.index.get(id).and_then(|&i| self.items.get(i)).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn items(&self) -> &[Arc<T>] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.items.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|e| e.id())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy with `entity` replacing `id` in place, or appended if new.
    pub(crate) fn with_upsert(&self, id: &str, entity: Arc<T>) -> Self {
        let mut items = self.items.clone();
        let mut index = self.index.clone();
        if let Some(slot) = self.index.get(id).and_then(|&i| items.get_mut(i)) {
            *slot = entity;
        } else {
            index.insert(id.to_owned(), items.len());
            items.push(entity);
        }
        Self { items, index }
    }

    /// Copy without `id`. Returns `None` when `id` was not present.
    pub(crate) fn without(&self, id: &str) -> Option<Self> {
        let position = *self.index.get(id)?;
        let mut items = self.items.clone();
        items.remove(position);
        let index = items
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.id().map(|id| (id.to_owned(), i)))
            .collect();
        Some(Self { items, index })
    }
}

// ── Store view ──────────────────────────────────────────────────────

/// Whether a bulk load has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LoadState {
    NeverLoaded,
    Loading,
    Loaded,
}

/// What subscribers of a store receive.
#[derive(Debug)]
pub struct StoreView<T> {
    pub snapshot: Arc<CollectionSnapshot<T>>,
    pub load_state: LoadState,
    /// Last fetch failure; cleared by the next successful bulk load.
    pub error: Option<CoreError>,
    pub last_loaded: Option<DateTime<Utc>>,
}

impl<T> Clone for StoreView<T> {
    fn clone(&self) -> Self {
        Self {
            snapshot: Arc::clone(&self.snapshot),
            load_state: self.load_state,
            error: self.error.clone(),
            last_loaded: self.last_loaded,
        }
    }
}

impl<T> Default for StoreView<T> {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(CollectionSnapshot::default()),
            load_state: LoadState::NeverLoaded,
            error: None,
            last_loaded: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Connection;
    use pretty_assertions::assert_eq;

    fn conn(id: &str, name: &str) -> Connection {
        Connection {
            id: Some(id.into()),
            ..Connection::new(name)
        }
    }

    fn names(snapshot: &CollectionSnapshot<Connection>) -> Vec<&str> {
        snapshot.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn first_occurrence_of_duplicate_id_wins() {
        let snapshot = CollectionSnapshot::from_items(vec![
            conn("c1", "A"),
            conn("c2", "B"),
            conn("c1", "A again"),
            Connection::new("unsaved"),
        ]);
        assert_eq!(names(&snapshot), vec!["A", "B"]);
        assert_eq!(snapshot.get("c1").unwrap().name, "A");
    }

    #[test]
    fn upsert_replaces_in_place_and_appends_new() {
        let snapshot = CollectionSnapshot::from_items(vec![conn("c1", "A"), conn("c2", "B")]);
        let snapshot = snapshot.with_upsert("c1", Arc::new(conn("c1", "A2")));
        let snapshot = snapshot.with_upsert("c3", Arc::new(conn("c3", "C")));
        assert_eq!(names(&snapshot), vec!["A2", "B", "C"]);
        assert_eq!(snapshot.get("c3").unwrap().name, "C");
    }

    #[test]
    fn removal_reindexes() {
        let snapshot =
            CollectionSnapshot::from_items(vec![conn("c1", "A"), conn("c2", "B"), conn("c3", "C")]);
        let snapshot = snapshot.without("c1").unwrap();
        assert_eq!(names(&snapshot), vec!["B", "C"]);
        assert_eq!(snapshot.get("c3").unwrap().name, "C");
        assert!(snapshot.without("c1").is_none());
    }
}
