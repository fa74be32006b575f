//! Per device-handle pass-through state and hand-off replay.
//!
//! The cache remembers, for every device handle, which way its events flow,
//! which keys are held, and the last absolute position it reported. When a
//! handle starts flowing out, the held keys and position are replayed once
//! toward the new owner so its first real event lands in the right context.

use std::collections::HashMap;
use std::sync::Arc;

use cooperate_types::{DhId, DhIdState, SeedEvent, SessionId};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::collab::EventForwarder;

#[derive(Default)]
struct CacheState {
    through: HashMap<DhId, DhIdState>,
    /// Held keys, oldest assertion first.
    key_down: HashMap<DhId, Vec<i32>>,
    abs_position: HashMap<DhId, (i32, i32)>,
}

pub struct DeviceHandleStateCache {
    state: Mutex<CacheState>,
    forwarder: Arc<dyn EventForwarder>,
}

impl DeviceHandleStateCache {
    pub fn new(forwarder: Arc<dyn EventForwarder>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            forwarder,
        }
    }

    /// Mark `dh_ids` with `through`.
    ///
    /// Handles marked [`DhIdState::ThroughOut`] have their held keys and
    /// cached position consumed and forwarded on `session`. Returns the
    /// number of seed events forwarded.
    pub fn record_dh_ids(&self, dh_ids: &[DhId], through: DhIdState, session: SessionId) -> usize {
        let seeds = {
            let mut state = self.state.lock();
            let mut seeds = Vec::new();
            for dh_id in dh_ids {
                state.through.insert(dh_id.clone(), through);
                if through != DhIdState::ThroughOut {
                    continue;
                }
                for key_code in state.key_down.remove(dh_id).unwrap_or_default() {
                    seeds.push(SeedEvent::Key {
                        dh_id: dh_id.clone(),
                        key_code,
                        pressed: true,
                    });
                }
                if let Some((x, y)) = state.abs_position.remove(dh_id) {
                    seeds.push(SeedEvent::AbsPosition {
                        dh_id: dh_id.clone(),
                        x,
                        y,
                    });
                }
            }
            seeds
        };
        debug!(count = dh_ids.len(), ?through, seeds = seeds.len(), "recorded device handles");
        if !seeds.is_empty() {
            self.forwarder.forward(session, &seeds);
        }
        seeds.len()
    }

    /// Forget the pass-through state of `dh_ids`.
    pub fn remove_dh_ids(&self, dh_ids: &[DhId]) {
        let mut state = self.state.lock();
        for dh_id in dh_ids {
            state.through.remove(dh_id);
        }
        debug!(count = dh_ids.len(), "removed device handles");
    }

    pub fn dh_id_state(&self, dh_id: &DhId) -> Option<DhIdState> {
        self.state.lock().through.get(dh_id).copied()
    }

    /// Every handle currently passing through, in either direction.
    pub fn recorded_dh_ids(&self) -> Vec<DhId> {
        let mut ids: Vec<DhId> = self.state.lock().through.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Note a key press. A key already held moves to the end.
    pub fn add_key_down_state(&self, dh_id: &DhId, key_code: i32) {
        let mut state = self.state.lock();
        let keys = state.key_down.entry(dh_id.clone()).or_default();
        keys.retain(|k| *k != key_code);
        keys.push(key_code);
        trace!(dh_id = %dh_id, key_code, "key down");
    }

    pub fn remove_key_down_state(&self, dh_id: &DhId, key_code: i32) {
        let mut state = self.state.lock();
        if let Some(keys) = state.key_down.get_mut(dh_id) {
            keys.retain(|k| *k != key_code);
            if keys.is_empty() {
                state.key_down.remove(dh_id);
            }
        }
        trace!(dh_id = %dh_id, key_code, "key up");
    }

    /// Auto-repeat re-asserts a held key: move it to the end. Keys that are
    /// not held are ignored.
    pub fn on_key_repeat(&self, dh_id: &DhId, key_code: i32) {
        let mut state = self.state.lock();
        let Some(keys) = state.key_down.get_mut(dh_id) else {
            return;
        };
        if let Some(pos) = keys.iter().position(|k| *k == key_code) {
            let key = keys.remove(pos);
            keys.push(key);
        }
    }

    /// Held keys of `dh_id`, oldest assertion first.
    pub fn key_down_state(&self, dh_id: &DhId) -> Vec<i32> {
        self.state
            .lock()
            .key_down
            .get(dh_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn refresh_abs_position(&self, dh_id: &DhId, x: i32, y: i32) {
        self.state.lock().abs_position.insert(dh_id.clone(), (x, y));
    }

    /// Take the cached position. A second call without a refresh returns
    /// `None`.
    pub fn consume_abs_position(&self, dh_id: &DhId) -> Option<(i32, i32)> {
        self.state.lock().abs_position.remove(dh_id)
    }

    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        state.through.clear();
        state.key_down.clear();
        state.abs_position.clear();
        debug!("device handle cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingForwarder;

    fn cache() -> (DeviceHandleStateCache, Arc<RecordingForwarder>) {
        let forwarder = Arc::new(RecordingForwarder::new());
        (DeviceHandleStateCache::new(forwarder.clone()), forwarder)
    }

    #[test]
    fn position_is_consumed_once() {
        let (cache, _) = cache();
        let pad = DhId::from("pad");

        assert_eq!(cache.consume_abs_position(&pad), None);
        cache.refresh_abs_position(&pad, 3, 4);
        cache.refresh_abs_position(&pad, 10, 20);
        assert_eq!(cache.consume_abs_position(&pad), Some((10, 20)));
        assert_eq!(cache.consume_abs_position(&pad), None);

        cache.refresh_abs_position(&pad, 1, 1);
        assert_eq!(cache.consume_abs_position(&pad), Some((1, 1)));
    }

    #[test]
    fn repeat_moves_key_to_end() {
        let (cache, _) = cache();
        let kbd = DhId::from("kbd");
        let (a, b) = (30, 48);

        cache.add_key_down_state(&kbd, a);
        cache.add_key_down_state(&kbd, b);
        cache.on_key_repeat(&kbd, a);
        assert_eq!(cache.key_down_state(&kbd), vec![b, a]);

        // Repeat of a key that is not held inserts nothing.
        cache.on_key_repeat(&kbd, 99);
        assert_eq!(cache.key_down_state(&kbd), vec![b, a]);

        cache.remove_key_down_state(&kbd, b);
        assert_eq!(cache.key_down_state(&kbd), vec![a]);
    }

    #[test]
    fn pressing_held_key_again_does_not_duplicate() {
        let (cache, _) = cache();
        let kbd = DhId::from("kbd");
        cache.add_key_down_state(&kbd, 1);
        cache.add_key_down_state(&kbd, 2);
        cache.add_key_down_state(&kbd, 1);
        assert_eq!(cache.key_down_state(&kbd), vec![2, 1]);
    }

    #[test]
    fn through_out_replays_held_state_once() {
        let (cache, forwarder) = cache();
        let d1 = DhId::from("d1");
        cache.add_key_down_state(&d1, 2045);
        cache.refresh_abs_position(&d1, 10, 20);

        let sent = cache.record_dh_ids(&[d1.clone()], DhIdState::ThroughOut, SessionId(7));
        assert_eq!(sent, 2);
        assert_eq!(
            forwarder.events(),
            vec![
                (
                    SessionId(7),
                    SeedEvent::Key {
                        dh_id: d1.clone(),
                        key_code: 2045,
                        pressed: true
                    }
                ),
                (
                    SessionId(7),
                    SeedEvent::AbsPosition {
                        dh_id: d1.clone(),
                        x: 10,
                        y: 20
                    }
                ),
            ]
        );
        assert_eq!(cache.consume_abs_position(&d1), None);
        assert!(cache.key_down_state(&d1).is_empty());
        assert_eq!(cache.dh_id_state(&d1), Some(DhIdState::ThroughOut));

        // Nothing left to replay.
        assert_eq!(cache.record_dh_ids(&[d1], DhIdState::ThroughOut, SessionId(7)), 0);
        assert_eq!(forwarder.events().len(), 2);
    }

    #[test]
    fn through_in_does_not_replay() {
        let (cache, forwarder) = cache();
        let d1 = DhId::from("d1");
        cache.refresh_abs_position(&d1, 5, 5);

        assert_eq!(cache.record_dh_ids(&[d1.clone()], DhIdState::ThroughIn, SessionId(1)), 0);
        assert!(forwarder.events().is_empty());
        assert_eq!(cache.consume_abs_position(&d1), Some((5, 5)));
    }

    #[test]
    fn remove_keeps_key_state_and_clear_all_wipes_everything() {
        let (cache, forwarder) = cache();
        let kbd = DhId::from("kbd");
        let pad = DhId::from("pad");
        cache.record_dh_ids(&[kbd.clone(), pad.clone()], DhIdState::ThroughIn, SessionId(1));
        cache.add_key_down_state(&kbd, 4);
        cache.refresh_abs_position(&pad, 1, 2);

        cache.remove_dh_ids(&[kbd.clone()]);
        assert_eq!(cache.dh_id_state(&kbd), None);
        assert_eq!(cache.recorded_dh_ids(), vec![pad.clone()]);
        assert_eq!(cache.key_down_state(&kbd), vec![4]);
        assert!(forwarder.events().is_empty());

        cache.clear_all();
        assert!(cache.recorded_dh_ids().is_empty());
        assert!(cache.key_down_state(&kbd).is_empty());
        assert_eq!(cache.consume_abs_position(&pad), None);
    }
}
