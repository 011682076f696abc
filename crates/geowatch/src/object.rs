use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::rect::Rect;

/// Identifier of a registered subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The payload of an [`Object`].
///
/// `Data` carries the caller's opaque value; the engine never inspects it.
/// `Sentinel` marks an object as part of a subscription's region and names
/// the subscription that owns it. The kind of an object is derived from this
/// value alone.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ObjectValue<V> {
    Data(V),
    Sentinel(SubscriptionId),
}

impl<V> ObjectValue<V> {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, ObjectValue::Sentinel(_))
    }

    pub fn data(&self) -> Option<&V> {
        match self {
            ObjectValue::Data(value) => Some(value),
            ObjectValue::Sentinel(_) => None,
        }
    }

    pub(crate) fn sentinel_owner(&self) -> Option<SubscriptionId> {
        match self {
            ObjectValue::Data(_) => None,
            ObjectValue::Sentinel(id) => Some(*id),
        }
    }
}

/// A geo-located object: a string id, a bounding rectangle, and a payload.
///
/// Objects are immutable once constructed; mutating one means upserting a
/// replacement under the same id. The engine shares objects between the tree,
/// the id map, and emitted events as `Arc<Object<V>>`.
#[derive(Clone, Debug, Serialize)]
pub struct Object<V> {
    id: String,
    bounds: Rect,
    value: ObjectValue<V>,
}

impl<V> Object<V> {
    /// Builds a data object carrying `value`.
    pub fn new(id: impl Into<String>, bounds: Rect, value: V) -> Self {
        Self {
            id: id.into(),
            bounds,
            value: ObjectValue::Data(value),
        }
    }

    /// Builds one sentinel box of a subscription's region.
    pub(crate) fn sentinel(id: String, bounds: Rect, owner: SubscriptionId) -> Self {
        Self {
            id,
            bounds,
            value: ObjectValue::Sentinel(owner),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn value(&self) -> &ObjectValue<V> {
        &self.value
    }

    /// The caller payload, or `None` for a sentinel box.
    pub fn data(&self) -> Option<&V> {
        self.value.data()
    }
}
