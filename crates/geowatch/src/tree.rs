//! R-tree storage for objects, keyed by their bounding rectangles.

use std::sync::Arc;

use rstar::{
    RStarInsertionStrategy,
    RTree,
    RTreeObject,
    RTreeParams,
    AABB,
};

use crate::{
    filters::{
        self,
        Filter,
    },
    object::Object,
    rect::Rect,
};

/// Node fan-out of the backing R-tree.
pub(crate) struct NodeParams;

impl RTreeParams for NodeParams {
    const MIN_SIZE: usize = 25;
    const MAX_SIZE: usize = 50;
    const REINSERTION_COUNT: usize = 16;
    type DefaultInsertionStrategy = RStarInsertionStrategy;
}

/// A stored object together with its precomputed envelope.
///
/// Entry identity is the same shared allocation, or failing that an equal
/// `(id, bounds)` pair; this is what removal matches on.
struct TreeEntry<V> {
    envelope: AABB<[f64; 2]>,
    object: Arc<Object<V>>,
}

impl<V> TreeEntry<V> {
    fn new(object: Arc<Object<V>>) -> Self {
        Self {
            envelope: object.bounds().envelope(),
            object,
        }
    }
}

impl<V> RTreeObject for TreeEntry<V> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl<V> PartialEq for TreeEntry<V> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
            || (self.object.id() == other.object.id()
                && self.object.bounds() == other.object.bounds())
    }
}

/// A 2-D spatial index over shared objects, with filter-chain search.
pub(crate) struct SpatialTree<V> {
    tree: RTree<TreeEntry<V>, NodeParams>,
}

impl<V> SpatialTree<V> {
    pub fn new() -> Self {
        Self {
            tree: RTree::new_with_params(),
        }
    }

    pub fn insert(&mut self, object: Arc<Object<V>>) {
        self.tree.insert(TreeEntry::new(object));
    }

    /// Removes the entry for `object`, returning whether one was found.
    pub fn remove(&mut self, object: &Arc<Object<V>>) -> bool {
        self.tree.remove(&TreeEntry::new(Arc::clone(object))).is_some()
    }

    /// Every stored object whose rectangle intersects `rect` and which all
    /// `filters` accept. Ordering is unspecified.
    pub fn search(&self, rect: &Rect, search_filters: &[Filter<V>]) -> Vec<Arc<Object<V>>> {
        self.tree
            .locate_in_envelope_intersecting(&rect.envelope())
            .filter(|entry| filters::accept_all(search_filters, &entry.object))
            .map(|entry| Arc::clone(&entry.object))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }
}
