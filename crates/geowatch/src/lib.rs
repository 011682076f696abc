//! An in-memory geo-spatial index with live subscriptions.
//!
//! Callers upsert and delete [`Object`]s, each an opaque payload under a
//! string id with a bounding [`Rect`] in (longitude, latitude) degrees, and
//! query them by rectangle intersection. On top of that sits a subscription
//! engine: a [`Subscription`] carries a region of interest (which may cross
//! the antimeridian or a pole), an optional [`Filter`] chain, and a set of
//! explicitly tracked ids, and receives an ordered stream of `set`/`delete`
//! [`Event`]s for every object entering, leaving, or mutating within its
//! view.
//!
//! Subscription regions are stored as sentinel objects in the same R-tree as
//! the data, so finding the subscribers affected by a mutation is a single
//! intersection search. Every change to a subscription's region, filters, or
//! tracked ids emits the exact set-difference delta between the old and new
//! visible sets, `set` events first, then `delete` events.
//!
//! The index handle is `Clone` and safe to share across threads. Event
//! delivery is decoupled from mutators by a per-subscription dispatcher, so
//! a slow consumer applies backpressure only to its own stream.

mod index;
mod object;
mod rect;
mod subscription;
mod tree;

pub mod filters;

#[cfg(test)]
mod tests;

pub use crossbeam_channel::Receiver;

pub use crate::{
    filters::Filter,
    index::Index,
    object::{
        Object,
        ObjectValue,
        SubscriptionId,
    },
    rect::{
        Point,
        Rect,
        EASTMOST_LONGITUDE,
        NORTHMOST_LATITUDE,
    },
    subscription::{
        Event,
        EventKind,
        Subscription,
    },
};
