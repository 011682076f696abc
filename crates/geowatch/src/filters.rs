//! Search predicates.
//!
//! A filter is a total predicate over [`Object`]; a search returns an object
//! iff every filter in the chain accepts it. The distinguished filters here
//! separate caller data from subscription sentinel boxes and support
//! self-exclusion in [`crate::Index::search_by_object`].

use std::sync::Arc;

use crate::object::Object;

/// A shared predicate applied to search results. `true` accepts the object.
pub type Filter<V> = Arc<dyn Fn(&Object<V>) -> bool + Send + Sync>;

/// Accepts only subscription sentinel boxes.
pub fn sentinels_only<V>() -> Filter<V> {
    Arc::new(|object| object.value().is_sentinel())
}

/// Accepts only caller data objects.
pub fn data_only<V>() -> Filter<V> {
    Arc::new(|object| !object.value().is_sentinel())
}

/// Accepts every object whose id differs from `id`.
pub fn id_not_equal<V>(id: impl Into<String>) -> Filter<V> {
    let id = id.into();
    Arc::new(move |object| object.id() != id)
}

pub(crate) fn accept_all<V>(filters: &[Filter<V>], object: &Object<V>) -> bool {
    filters.iter().all(|filter| filter(object))
}
