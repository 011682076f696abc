//! Live subscriptions: per-subscriber state, visible-set deltas, and event
//! dispatch.
//!
//! A subscription's region is realized as sentinel boxes stored in the same
//! tree as caller data, so a data mutation finds its affected subscribers
//! with one intersection search. All subscription state lives under the index
//! lock; the public [`Subscription`] handle takes that lock exactly once at
//! each method boundary and never re-enters it.
//!
//! Delivery runs through a dedicated dispatcher thread per subscription:
//! mutators enqueue onto an unbounded queue while holding the lock (which
//! never blocks, and preserves the linearization order per subscriber), and
//! the dispatcher forwards into the bounded consumer channel, absorbing
//! backpressure from slow consumers without stalling writers.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        Weak,
    },
    thread::JoinHandle,
};

use crossbeam_channel::{
    select,
    Receiver,
    Sender,
};
use serde::{
    ser::SerializeStruct,
    Serialize,
    Serializer,
};

use crate::{
    filters::{
        self,
        Filter,
    },
    index::{
        IndexInner,
        State,
    },
    object::{
        Object,
        SubscriptionId,
    },
    rect::Rect,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The object is now visible to the subscriber, or mutated while
    /// visible. A re-upsert of an unchanged id is delivered again on
    /// purpose: it is the signal that the object may have changed.
    Set,
    /// The object is no longer visible to the subscriber.
    Delete,
}

/// A change notification delivered to one subscriber.
#[derive(Debug)]
pub struct Event<V> {
    kind: EventKind,
    object: Arc<Object<V>>,
}

impl<V> Event<V> {
    pub(crate) fn new(kind: EventKind, object: Arc<Object<V>>) -> Self {
        Self { kind, object }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn object(&self) -> &Object<V> {
        &self.object
    }
}

impl<V> Clone for Event<V> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            object: Arc::clone(&self.object),
        }
    }
}

impl<V: Serialize> Serialize for Event<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Event", 2)?;
        state.serialize_field("type", &self.kind)?;
        state.serialize_field("obj", &*self.object)?;
        state.end()
    }
}

/// Registry-side state of one subscription, owned by the index lock.
pub(crate) struct SubscriberEntry<V> {
    /// Sentinel boxes currently realizing the region, one per split part.
    pub(crate) boxes: Vec<Arc<Object<V>>>,
    pub(crate) filters: Vec<Filter<V>>,
    pub(crate) outbound: Outbound<V>,
}

impl<V> SubscriberEntry<V> {
    pub(crate) fn accepts(&self, object: &Object<V>) -> bool {
        filters::accept_all(&self.filters, object)
    }
}

/// The sending half of a subscription's delivery pipeline.
pub(crate) struct Outbound<V> {
    pub(crate) queue: Sender<Event<V>>,
    pub(crate) stop: Sender<()>,
    pub(crate) dispatcher: JoinHandle<()>,
}

impl<V> Outbound<V> {
    pub(crate) fn enqueue(&self, event: Event<V>) {
        // The queue is unbounded, so this never blocks; an error means
        // teardown already disconnected the dispatcher and the event is
        // dropped.
        let _ = self.queue.send(event);
    }

    /// Disconnects the dispatcher and waits for it to exit, which drops the
    /// consumer-side sender and closes the event stream. Events still queued
    /// at this point are discarded.
    pub(crate) fn shutdown(self) {
        let Outbound {
            queue,
            stop,
            dispatcher,
        } = self;
        drop(queue);
        drop(stop);
        let _ = dispatcher.join();
    }
}

/// Forwards events from the unbounded queue into the bounded consumer
/// channel. The stop channel is watched even mid-send, so a blocked delivery
/// never outlives the subscription.
pub(crate) fn run_dispatcher<V>(
    queue: Receiver<Event<V>>,
    events: Sender<Event<V>>,
    stop: Receiver<()>,
) {
    loop {
        let event = select! {
            recv(queue) -> msg => match msg {
                Ok(event) => event,
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        };
        select! {
            send(events, event) -> result => {
                if result.is_err() {
                    // Consumer dropped the receiver; nothing left to deliver.
                    break;
                }
            },
            recv(stop) -> _ => break,
        }
    }
}

/// A live subscription handle.
///
/// Obtained from [`crate::Index::subscribe`]. Configure the region with
/// [`Subscription::set_bounds`], optionally narrow it with
/// [`Subscription::set_filters`], and pin individual ids with
/// [`Subscription::track_id`]. Each state change emits the exact visible-set
/// delta: `set` events for objects entering the view, then `delete` events
/// for objects leaving it.
///
/// Dropping the handle releases the subscription as if
/// [`crate::Index::unsubscribe`] had been called.
pub struct Subscription<V> {
    id: SubscriptionId,
    inner: Weak<IndexInner<V>>,
    events: Receiver<Event<V>>,
}

impl<V> Subscription<V> {
    pub(crate) fn new(
        id: SubscriptionId,
        inner: Weak<IndexInner<V>>,
        events: Receiver<Event<V>>,
    ) -> Self {
        Self { id, inner, events }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The event stream. Disconnects exactly when the subscription is
    /// released.
    pub fn events(&self) -> &Receiver<Event<V>> {
        &self.events
    }

    /// Replaces the region of interest. The rectangle may cross the
    /// antimeridian or a pole; it is split into normal parts before entering
    /// the tree. Emits the visible-set delta against the previous region.
    pub fn set_bounds(&self, bounds: Rect) {
        if let Some(inner) = self.inner.upgrade() {
            inner.state.write().set_bounds(self.id, bounds);
        }
    }

    /// Replaces the filter list and emits the resulting visible-set delta.
    /// An object is visible only if every filter accepts it.
    pub fn set_filters(&self, filters: Vec<Filter<V>>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.state.write().set_filters(self.id, filters);
        }
    }

    pub fn clear_filters(&self) {
        self.set_filters(Vec::new());
    }

    /// Keeps `object_id` visible even when it is outside the region. Emits a
    /// `set` event if this makes the object visible now.
    pub fn track_id(&self, object_id: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.state.write().track_id(self.id, object_id);
        }
    }

    pub fn untrack_id(&self, object_id: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.state.write().untrack_id(self.id, object_id);
        }
    }
}

impl<V> Drop for Subscription<V> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.release(self.id);
        }
    }
}

// Subscription-state mutations. Each one is a single critical section:
// snapshot the visible ids, apply the change, snapshot again, emit the
// delta.
impl<V> State<V> {
    pub(crate) fn set_bounds(&mut self, sub: SubscriptionId, bounds: Rect) {
        let Some(entry) = self.subs.get(&sub) else {
            return;
        };
        let before = self.visible_ids(sub, &entry.boxes, &entry.filters);

        let old_boxes = entry.boxes.clone();
        for sentinel in &old_boxes {
            self.apply_delete(sentinel.id());
        }
        let boxes: Vec<Arc<Object<V>>> = bounds
            .split()
            .into_iter()
            .enumerate()
            .map(|(i, part)| Arc::new(Object::sentinel(format!("{sub}:{i}"), part, sub)))
            .collect();
        for sentinel in &boxes {
            self.apply_upsert(Arc::clone(sentinel));
        }
        if let Some(entry) = self.subs.get_mut(&sub) {
            entry.boxes = boxes;
        }

        let Some(entry) = self.subs.get(&sub) else {
            return;
        };
        let after = self.visible_ids(sub, &entry.boxes, &entry.filters);
        self.emit_delta(sub, &before, &after);
    }

    pub(crate) fn set_filters(&mut self, sub: SubscriptionId, new_filters: Vec<Filter<V>>) {
        let Some(entry) = self.subs.get(&sub) else {
            return;
        };
        let before = self.visible_ids(sub, &entry.boxes, &entry.filters);
        if let Some(entry) = self.subs.get_mut(&sub) {
            entry.filters = new_filters;
        }
        let Some(entry) = self.subs.get(&sub) else {
            return;
        };
        let after = self.visible_ids(sub, &entry.boxes, &entry.filters);
        self.emit_delta(sub, &before, &after);
    }

    pub(crate) fn track_id(&mut self, sub: SubscriptionId, object_id: &str) {
        let Some(entry) = self.subs.get(&sub) else {
            return;
        };
        let before = self.visible_ids(sub, &entry.boxes, &entry.filters);
        self.insert_tracking(sub, object_id);
        let Some(entry) = self.subs.get(&sub) else {
            return;
        };
        let after = self.visible_ids(sub, &entry.boxes, &entry.filters);
        self.emit_delta(sub, &before, &after);
    }

    pub(crate) fn untrack_id(&mut self, sub: SubscriptionId, object_id: &str) {
        let Some(entry) = self.subs.get(&sub) else {
            return;
        };
        let before = self.visible_ids(sub, &entry.boxes, &entry.filters);
        self.remove_tracking(sub, object_id);
        let Some(entry) = self.subs.get(&sub) else {
            return;
        };
        let after = self.visible_ids(sub, &entry.boxes, &entry.filters);
        self.emit_delta(sub, &before, &after);
    }

    /// The set of object ids currently visible to the subscription: data
    /// objects intersecting any of its sentinel boxes and accepted by its
    /// filter chain, plus every explicitly tracked id. Tracked ids bypass
    /// the filter chain here; the live upsert/delete path still applies it.
    fn visible_ids(
        &self,
        sub: SubscriptionId,
        boxes: &[Arc<Object<V>>],
        sub_filters: &[Filter<V>],
    ) -> HashSet<String> {
        let mut chain: Vec<Filter<V>> = Vec::with_capacity(sub_filters.len() + 1);
        chain.push(filters::data_only());
        chain.extend(sub_filters.iter().cloned());

        let mut ids = HashSet::new();
        for sentinel in boxes {
            for object in self.tree.search(&sentinel.bounds(), &chain) {
                ids.insert(object.id().to_owned());
            }
        }
        if let Some(tracked) = self.sub_ids.get(&sub) {
            ids.extend(tracked.iter().cloned());
        }
        ids
    }

    /// Emits `set` for ids entering the visible set, then `delete` for ids
    /// leaving it. Ids that no longer resolve to a live object are skipped.
    fn emit_delta(&self, sub: SubscriptionId, before: &HashSet<String>, after: &HashSet<String>) {
        let Some(entry) = self.subs.get(&sub) else {
            return;
        };
        for id in after.difference(before) {
            if let Some(object) = self.objects.get(id) {
                entry
                    .outbound
                    .enqueue(Event::new(EventKind::Set, Arc::clone(object)));
            }
        }
        for id in before.difference(after) {
            if let Some(object) = self.objects.get(id) {
                entry
                    .outbound
                    .enqueue(Event::new(EventKind::Delete, Arc::clone(object)));
            }
        }
    }
}
