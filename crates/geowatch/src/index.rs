//! The thread-safe index façade: object storage, subscription registry, and
//! event fan-out on mutation.

use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::Arc,
    thread,
};

use crossbeam_channel::{
    bounded,
    unbounded,
};
use parking_lot::RwLock;
use tracing::{
    debug,
    trace,
};

use crate::{
    filters::{
        self,
        Filter,
    },
    object::{
        Object,
        SubscriptionId,
    },
    rect::Rect,
    subscription::{
        run_dispatcher,
        Event,
        EventKind,
        Outbound,
        SubscriberEntry,
        Subscription,
    },
    tree::SpatialTree,
};

/// A concurrent geo-spatial index with live subscriptions.
///
/// The handle is cheap to clone and share across threads. All state sits
/// behind a single reader-writer lock: reads (searches, id lookups) take the
/// shared lock, mutations and subscription changes the exclusive lock.
/// Subscribers receive [`Event`]s describing every change to the set of
/// objects visible to them.
pub struct Index<V> {
    pub(crate) inner: Arc<IndexInner<V>>,
}

impl<V> Clone for Index<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct IndexInner<V> {
    pub(crate) state: RwLock<State<V>>,
}

/// Everything the index lock protects.
pub(crate) struct State<V> {
    pub(crate) tree: SpatialTree<V>,
    /// id → live object; holds sentinel boxes as well as data objects, in
    /// step with the tree.
    pub(crate) objects: HashMap<String, Arc<Object<V>>>,
    pub(crate) subs: HashMap<SubscriptionId, SubscriberEntry<V>>,
    /// object id → subscriptions explicitly tracking it.
    pub(crate) id_subs: HashMap<String, HashSet<SubscriptionId>>,
    /// subscription → object ids it explicitly tracks.
    pub(crate) sub_ids: HashMap<SubscriptionId, HashSet<String>>,
}

impl<V: Send + Sync + 'static> Index<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(IndexInner {
                state: RwLock::new(State {
                    tree: SpatialTree::new(),
                    objects: HashMap::new(),
                    subs: HashMap::new(),
                    id_subs: HashMap::new(),
                    sub_ids: HashMap::new(),
                }),
            }),
        }
    }

    /// Inserts `object`, replacing any previous object with the same id, and
    /// notifies every subscription whose region intersects the new bounds or
    /// which tracks the object's id.
    pub fn upsert(&self, object: Object<V>) {
        let object = Arc::new(object);
        let mut state = self.inner.state.write();
        state.apply_upsert(Arc::clone(&object));
        state.notify(&object, EventKind::Set);
    }

    /// [`Index::upsert`] without the notification step.
    pub fn upsert_no_notify(&self, object: Object<V>) {
        self.inner.state.write().apply_upsert(Arc::new(object));
    }

    /// Removes the live object stored under `object`'s id, if any, and
    /// notifies every subscription that could see it. The notification uses
    /// the live object's bounds, which may differ from the caller's copy.
    pub fn delete(&self, object: &Object<V>) {
        let mut state = self.inner.state.write();
        if let Some(live) = state.apply_delete(object.id()) {
            state.notify(&live, EventKind::Delete);
        }
    }

    /// [`Index::delete`] without the notification step.
    pub fn delete_no_notify(&self, object: &Object<V>) {
        self.inner.state.write().apply_delete(object.id());
    }

    /// Every object intersecting `rect` and accepted by all `filters`.
    /// Ordering is unspecified. Sentinel boxes are returned unless filtered
    /// out with [`filters::data_only`].
    pub fn search_by_rect(&self, rect: Rect, search_filters: &[Filter<V>]) -> Vec<Arc<Object<V>>> {
        self.inner.state.read().tree.search(&rect, search_filters)
    }

    /// Searches `object`'s own bounds, excluding the object itself from the
    /// result.
    pub fn search_by_object(
        &self,
        object: &Object<V>,
        search_filters: &[Filter<V>],
    ) -> Vec<Arc<Object<V>>> {
        let mut chain = search_filters.to_vec();
        chain.push(filters::id_not_equal(object.id()));
        self.search_by_rect(object.bounds(), &chain)
    }

    /// [`Index::search_by_object`] for the live object stored under `id`;
    /// empty when the id is unknown.
    pub fn search_by_object_id(&self, id: &str, search_filters: &[Filter<V>]) -> Vec<Arc<Object<V>>> {
        let Some(object) = self.get_object_by_id(id) else {
            return Vec::new();
        };
        self.search_by_object(&object, search_filters)
    }

    pub fn get_object_by_id(&self, id: &str) -> Option<Arc<Object<V>>> {
        self.inner.state.read().objects.get(id).cloned()
    }

    /// Number of live objects, sentinel boxes included.
    pub fn len(&self) -> usize {
        self.inner.state.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a new subscription with an event channel of the given
    /// capacity. The subscription starts with no region, no filters, and no
    /// tracked ids, so it observes nothing until configured.
    pub fn subscribe(&self, capacity: usize) -> Subscription<V> {
        let id = SubscriptionId::generate();
        let (events_tx, events_rx) = bounded(capacity);
        let (queue_tx, queue_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded(0);

        let dispatcher = thread::Builder::new()
            .name(format!("geowatch-dispatch-{id}"))
            .spawn(move || run_dispatcher(queue_rx, events_tx, stop_rx))
            .expect("failed to spawn dispatcher thread");

        let entry = SubscriberEntry {
            boxes: Vec::new(),
            filters: Vec::new(),
            outbound: Outbound {
                queue: queue_tx,
                stop: stop_tx,
                dispatcher,
            },
        };
        self.inner.state.write().subs.insert(id, entry);
        debug!(%id, capacity, "subscription registered");
        Subscription::new(id, Arc::downgrade(&self.inner), events_rx)
    }

    /// Releases `subscription`: its sentinel boxes leave the tree, its
    /// tracking entries are cleared, and its event channel disconnects. Once
    /// this returns no further event can be observed. Releasing an already
    /// released subscription is a no-op.
    pub fn unsubscribe(&self, subscription: &Subscription<V>) {
        self.inner.release(subscription.id());
    }
}

impl<V> IndexInner<V> {
    pub(crate) fn release(&self, id: SubscriptionId) {
        let entry = {
            let mut state = self.state.write();
            let Some(mut entry) = state.subs.remove(&id) else {
                return;
            };
            for sentinel in std::mem::take(&mut entry.boxes) {
                state.apply_delete(sentinel.id());
            }
            state.clear_tracking(id);
            entry
        };
        // The dispatcher is joined outside the lock; it exits even mid-send
        // once the queue and stop channels disconnect.
        entry.outbound.shutdown();
        debug!(%id, "subscription released");
    }
}

impl<V> State<V> {
    pub(crate) fn apply_upsert(&mut self, object: Arc<Object<V>>) {
        if let Some(previous) = self.objects.remove(object.id()) {
            self.tree.remove(&previous);
        }
        self.tree.insert(Arc::clone(&object));
        self.objects.insert(object.id().to_owned(), object);
    }

    pub(crate) fn apply_delete(&mut self, id: &str) -> Option<Arc<Object<V>>> {
        let live = self.objects.remove(id)?;
        self.tree.remove(&live);
        Some(live)
    }

    /// Fans an event for `object` out to every subscription whose region
    /// intersects its bounds, plus those tracking its id. Each target's
    /// filter chain is applied before delivery; a rejected object produces no
    /// event for that subscriber.
    pub(crate) fn notify(&self, object: &Arc<Object<V>>, kind: EventKind) {
        let mut targets: HashSet<SubscriptionId> = HashSet::new();
        for hit in self
            .tree
            .search(&object.bounds(), &[filters::sentinels_only()])
        {
            if let Some(owner) = hit.value().sentinel_owner() {
                targets.insert(owner);
            }
        }
        if let Some(tracking) = self.id_subs.get(object.id()) {
            targets.extend(tracking.iter().copied());
        }
        trace!(id = object.id(), ?kind, subscribers = targets.len(), "fan-out");

        for target in targets {
            if let Some(entry) = self.subs.get(&target) {
                if entry.accepts(object) {
                    entry.outbound.enqueue(Event::new(kind, Arc::clone(object)));
                }
            }
        }
    }

    /// Inserts `object_id ↔ sub` into both tracking maps.
    pub(crate) fn insert_tracking(&mut self, sub: SubscriptionId, object_id: &str) {
        self.id_subs
            .entry(object_id.to_owned())
            .or_default()
            .insert(sub);
        self.sub_ids
            .entry(sub)
            .or_default()
            .insert(object_id.to_owned());
    }

    /// Removes `object_id ↔ sub` from both tracking maps, pruning empty sets.
    pub(crate) fn remove_tracking(&mut self, sub: SubscriptionId, object_id: &str) {
        if let Some(tracking) = self.id_subs.get_mut(object_id) {
            tracking.remove(&sub);
            if tracking.is_empty() {
                self.id_subs.remove(object_id);
            }
        }
        if let Some(tracked) = self.sub_ids.get_mut(&sub) {
            tracked.remove(object_id);
            if tracked.is_empty() {
                self.sub_ids.remove(&sub);
            }
        }
    }

    /// Drops every tracking entry of `sub`.
    pub(crate) fn clear_tracking(&mut self, sub: SubscriptionId) {
        let Some(tracked) = self.sub_ids.remove(&sub) else {
            return;
        };
        for object_id in tracked {
            if let Some(tracking) = self.id_subs.get_mut(&object_id) {
                tracking.remove(&sub);
                if tracking.is_empty() {
                    self.id_subs.remove(&object_id);
                }
            }
        }
    }
}
