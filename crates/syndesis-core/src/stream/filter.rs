// ── Filter predicates for store views ──

use crate::model::Entity;

/// Filter predicate over any entity kind.
pub enum EntityFilter<T> {
    All,
    Ids(Vec<String>),
    /// Case-insensitive substring of the display name.
    NameContains(String),
    Custom(Box<dyn Fn(&T) -> bool + Send + Sync>),
}

impl<T: Entity> EntityFilter<T> {
    pub fn matches(&self, entity: &T) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => entity.id().is_some_and(|id| ids.iter().any(|i| i == id)),
            Self::NameContains(needle) => entity
                .name()
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            Self::Custom(f) => f(entity),
        }
    }
}
