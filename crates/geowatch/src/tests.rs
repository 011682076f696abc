//! Model-based random traces across the whole engine.
//!
//! Each case runs a random action sequence against both the real index and a
//! naive model of one subscription's visible set, and checks that the event
//! stream is exactly the delta the model predicts, `set` events first.

use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    sync::Arc,
    time::Duration,
};

use proptest::prelude::*;

use crate::{
    EventKind,
    Index,
    Object,
    Rect,
    Subscription,
};

/// Ids are drawn from a small pool so actions collide; the payload is the
/// numeric id, which keeps the parity filter stable across re-upserts.
const ID_POOL: u8 = 6;

#[derive(Debug, Clone, proptest_derive::Arbitrary)]
enum Action {
    Upsert { id: u8, lon: i8, lat: i8, w: u8, h: u8 },
    Delete { id: u8 },
    SetBounds { lon: i8, lat: i8, w: u8, h: u8 },
    SetFilter { on: bool },
    Track { id: u8 },
    Untrack { id: u8 },
}

fn id_name(raw: u8) -> String {
    (raw % ID_POOL).to_string()
}

fn id_value(raw: u8) -> i64 {
    (raw % ID_POOL) as i64
}

fn small_rect(lon: i8, lat: i8, w: u8, h: u8) -> Rect {
    let min_lon = (lon % 5) as f64;
    let min_lat = (lat % 5) as f64;
    Rect::new(
        min_lon,
        min_lat,
        min_lon + (w % 4) as f64,
        min_lat + (h % 4) as f64,
    )
}

/// What the subscription should currently see.
#[derive(Default)]
struct Model {
    objects: BTreeMap<String, (Rect, i64)>,
    bounds: Option<Rect>,
    parity_filter: bool,
    tracked: BTreeSet<String>,
}

impl Model {
    fn passes(&self, value: i64) -> bool {
        !self.parity_filter || value % 2 == 0
    }

    /// Region hits pass the filter chain; tracked ids are unconditional,
    /// mirroring the engine's visible-set computation.
    fn visible(&self) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = self
            .objects
            .iter()
            .filter(|(_, (rect, value))| {
                self.bounds.is_some_and(|bounds| bounds.intersects(rect)) && self.passes(*value)
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.extend(self.tracked.iter().cloned());
        ids
    }

    fn notified(&self, id: &str, rect: &Rect) -> bool {
        self.bounds.is_some_and(|bounds| bounds.intersects(rect)) || self.tracked.contains(id)
    }
}

struct Harness {
    index: Index<i64>,
    sub: Subscription<i64>,
    model: Model,
}

impl Harness {
    fn new() -> Self {
        let index = Index::new();
        let sub = index.subscribe(4096);
        Self {
            index,
            sub,
            model: Model::default(),
        }
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::Upsert { id, lon, lat, w, h } => {
                let name = id_name(id);
                let value = id_value(id);
                let rect = small_rect(lon, lat, w, h);
                self.index.upsert(Object::new(name.clone(), rect, value));

                let emits = self.model.notified(&name, &rect) && self.model.passes(value);
                self.model.objects.insert(name.clone(), (rect, value));
                if emits {
                    self.expect(&[(EventKind::Set, name)]);
                }
            }
            Action::Delete { id } => {
                let name = id_name(id);
                match self.model.objects.get(&name).copied() {
                    Some((rect, value)) => {
                        self.index.delete(&Object::new(name.clone(), rect, value));
                        let emits = self.model.notified(&name, &rect) && self.model.passes(value);
                        self.model.objects.remove(&name);
                        if emits {
                            self.expect(&[(EventKind::Delete, name)]);
                        }
                    }
                    None => {
                        // Deleting an unknown id is absorbed silently.
                        self.index
                            .delete(&Object::new(name, Rect::new(0.0, 0.0, 0.0, 0.0), 0));
                    }
                }
            }
            Action::SetBounds { lon, lat, w, h } => {
                let rect = small_rect(lon, lat, w, h);
                let before = self.model.visible();
                self.sub.set_bounds(rect);
                self.model.bounds = Some(rect);
                self.expect_delta(&before, &self.model.visible());
            }
            Action::SetFilter { on } => {
                let before = self.model.visible();
                if on {
                    self.sub.set_filters(vec![Arc::new(|object: &Object<i64>| {
                        object.data().is_none_or(|value| value % 2 == 0)
                    })]);
                } else {
                    self.sub.clear_filters();
                }
                self.model.parity_filter = on;
                self.expect_delta(&before, &self.model.visible());
            }
            Action::Track { id } => {
                let name = id_name(id);
                let before = self.model.visible();
                self.sub.track_id(&name);
                self.model.tracked.insert(name);
                self.expect_delta(&before, &self.model.visible());
            }
            Action::Untrack { id } => {
                let name = id_name(id);
                let before = self.model.visible();
                self.sub.untrack_id(&name);
                self.model.tracked.remove(&name);
                self.expect_delta(&before, &self.model.visible());
            }
        }
    }

    /// Receives exactly the expected events, in order.
    fn expect(&self, expected: &[(EventKind, String)]) {
        for (kind, id) in expected {
            let event = self
                .sub
                .events()
                .recv_timeout(Duration::from_secs(5))
                .expect("missing event");
            assert_eq!(event.kind(), *kind);
            assert_eq!(event.object().id(), id);
        }
    }

    /// Receives a subscription-state delta: the `set` batch, then the
    /// `delete` batch, each unordered internally. Ids that do not resolve to
    /// a live object are suppressed by the engine, so the model skips them
    /// too.
    fn expect_delta(&self, before: &BTreeSet<String>, after: &BTreeSet<String>) {
        let adds: BTreeSet<String> = after
            .difference(before)
            .filter(|id| self.model.objects.contains_key(*id))
            .cloned()
            .collect();
        let removes: BTreeSet<String> = before
            .difference(after)
            .filter(|id| self.model.objects.contains_key(*id))
            .cloned()
            .collect();

        let mut seen_adds = BTreeSet::new();
        for _ in 0..adds.len() {
            let event = self
                .sub
                .events()
                .recv_timeout(Duration::from_secs(5))
                .expect("missing set event");
            assert_eq!(event.kind(), EventKind::Set);
            seen_adds.insert(event.object().id().to_owned());
        }
        assert_eq!(seen_adds, adds);

        let mut seen_removes = BTreeSet::new();
        for _ in 0..removes.len() {
            let event = self
                .sub
                .events()
                .recv_timeout(Duration::from_secs(5))
                .expect("missing delete event");
            assert_eq!(event.kind(), EventKind::Delete);
            seen_removes.insert(event.object().id().to_owned());
        }
        assert_eq!(seen_removes, removes);
    }

    fn finish(self) {
        // No stragglers.
        assert!(self
            .sub
            .events()
            .recv_timeout(Duration::from_millis(50))
            .is_err());

        let state = self.index.inner.state.read();

        // The id map matches the model, modulo this subscription's sentinel
        // boxes, and the tree mirrors the id map.
        let sentinel_prefix = format!("{}:", self.sub.id());
        let data_ids: BTreeSet<String> = state
            .objects
            .keys()
            .filter(|id| !id.starts_with(&sentinel_prefix))
            .cloned()
            .collect();
        let model_ids: BTreeSet<String> = self.model.objects.keys().cloned().collect();
        assert_eq!(data_ids, model_ids);
        assert_eq!(state.tree.len(), state.objects.len());

        // Tracking maps are mutually consistent.
        for (id, subs) in &state.id_subs {
            for sub in subs {
                assert!(state
                    .sub_ids
                    .get(sub)
                    .is_some_and(|tracked| tracked.contains(id)));
            }
        }
        for (sub, tracked) in &state.sub_ids {
            for id in tracked {
                assert!(state
                    .id_subs
                    .get(id)
                    .is_some_and(|subs| subs.contains(sub)));
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn random_traces_match_the_model(actions in prop::collection::vec(any::<Action>(), 1..24)) {
        let mut harness = Harness::new();
        for action in actions {
            harness.execute(action);
        }
        harness.finish();
    }
}
