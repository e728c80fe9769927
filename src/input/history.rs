//! Per-Frame Input History
//!
//! Ring buffer of per-frame, per-client input records. Entries are either
//! CONFIRMED (validated against the relay's ordered stream) or PREDICTED
//! (filled locally by a prediction strategy). A confirmed entry is never
//! downgraded; `confirm` reports whether the relayed data differed from
//! the prediction, which is what triggers a rollback upstream.
//!
//! Slot for frame `f` is `f mod capacity`; writing frame `f` evicts any
//! resident slot holding a different frame.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::action::InputData;
use super::ClientId;

/// How inputs for clients with no stored entry are synthesized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStrategy {
    /// Predict an empty input.
    Idle,
    /// Predict the client's last known input (empty if none).
    #[default]
    RepeatLast,
}

/// One stored input with its confirmation state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputEntry {
    /// The input data.
    pub data: InputData,
    /// Whether the relay confirmed this entry.
    pub confirmed: bool,
}

/// A diagnostic view of one stored record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputRecord {
    /// Frame the record belongs to.
    pub frame: u32,
    /// Owning client.
    pub client: ClientId,
    /// Confirmation state at dump time.
    pub confirmed: bool,
    /// The stored data.
    pub data: InputData,
}

#[derive(Clone, Debug, Default)]
struct FrameSlot {
    frame: u32,
    entries: BTreeMap<ClientId, InputEntry>,
    confirmed_flag: bool,
}

/// Ring buffer of per-frame, per-client inputs.
#[derive(Debug)]
pub struct InputHistory {
    slots: Vec<Option<FrameSlot>>,
    mask: usize,
    /// Floor below which writes are rejected; only moves forward.
    floor: u32,
    strategy: PredictionStrategy,
    active_clients: BTreeSet<ClientId>,
    local_client: Option<ClientId>,
    last_known: BTreeMap<ClientId, InputData>,
}

impl InputHistory {
    /// Create a history ring. Capacity must be a power of two ≥ 64.
    pub fn new(capacity: usize, strategy: PredictionStrategy) -> Self {
        debug_assert!(capacity.is_power_of_two() && capacity >= 64);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            mask: capacity - 1,
            floor: 0,
            strategy,
            active_clients: BTreeSet::new(),
            local_client: None,
            last_known: BTreeMap::new(),
        }
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // =========================================================================
    // ACTIVE-CLIENT SET
    // =========================================================================

    /// Set (and activate) the local client id.
    pub fn set_local_client(&mut self, id: ClientId) {
        self.active_clients.insert(id.clone());
        self.local_client = Some(id);
    }

    /// The local client id, if one was set.
    pub fn local_client(&self) -> Option<&ClientId> {
        self.local_client.as_ref()
    }

    /// Add a client to the active set.
    pub fn add_client(&mut self, id: ClientId) {
        self.active_clients.insert(id);
    }

    /// Remove a client from the active set (drops its last-known record).
    pub fn remove_client(&mut self, id: &ClientId) {
        self.active_clients.remove(id);
        self.last_known.remove(id);
    }

    /// The active clients in ascending (lexicographic) order.
    pub fn active_clients(&self) -> impl Iterator<Item = &ClientId> {
        self.active_clients.iter()
    }

    /// Number of active clients.
    pub fn active_client_count(&self) -> usize {
        self.active_clients.len()
    }

    /// Whether a client is in the active set.
    pub fn is_active(&self, id: &ClientId) -> bool {
        self.active_clients.contains(id)
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Store a CONFIRMED input and refresh the client's last-known record.
    pub fn store_local(&mut self, frame: u32, client: &ClientId, data: InputData) {
        if frame < self.floor {
            return;
        }
        self.last_known.insert(client.clone(), data.clone());
        let slot = self.slot_for_write(frame);
        slot.entries.insert(
            client.clone(),
            InputEntry {
                data,
                confirmed: true,
            },
        );
    }

    /// Store a PREDICTED input IFF no CONFIRMED input occupies the slot.
    pub fn store_predicted(&mut self, frame: u32, client: &ClientId, data: InputData) {
        if frame < self.floor {
            return;
        }
        let slot = self.slot_for_write(frame);
        match slot.entries.get(client) {
            Some(entry) if entry.confirmed => {}
            _ => {
                slot.entries.insert(
                    client.clone(),
                    InputEntry {
                        data,
                        confirmed: false,
                    },
                );
            }
        }
    }

    /// Confirm relayed data against the stored entry.
    ///
    /// Returns `true` IFF a PREDICTED entry existed and its data differed
    /// from the relayed data (a misprediction). A missing entry stores the
    /// data as CONFIRMED and returns `false`; an already-CONFIRMED entry
    /// is left untouched and returns `false`.
    pub fn confirm(&mut self, frame: u32, client: &ClientId, data: InputData) -> bool {
        if frame < self.floor {
            return false;
        }
        self.last_known.insert(client.clone(), data.clone());
        let slot = self.slot_for_write(frame);
        match slot.entries.get(client) {
            None => {
                slot.entries.insert(
                    client.clone(),
                    InputEntry {
                        data,
                        confirmed: true,
                    },
                );
                false
            }
            Some(entry) if entry.confirmed => false,
            Some(entry) => {
                // shallow equality: same key set, per-key ==
                let mispredicted = entry.data != data;
                slot.entries.insert(
                    client.clone(),
                    InputEntry {
                        data,
                        confirmed: true,
                    },
                );
                mispredicted
            }
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Inputs for every active client at `frame`: stored entries as-is,
    /// missing clients synthesized by the prediction strategy.
    ///
    /// The caller decides whether synthesized inputs are written back via
    /// [`store_predicted`](Self::store_predicted); this accessor is pure.
    pub fn get_frame_inputs(&self, frame: u32) -> BTreeMap<ClientId, InputData> {
        let slot = self.slot_for_read(frame);
        let mut out = BTreeMap::new();
        for client in &self.active_clients {
            let data = match slot.and_then(|s| s.entries.get(client)) {
                Some(entry) => entry.data.clone(),
                None => self.predict_for(client),
            };
            out.insert(client.clone(), data);
        }
        out
    }

    /// The prediction the strategy would produce for one client at `frame`
    /// (the stored entry if one exists).
    pub fn get_predicted_input(&self, frame: u32, client: &ClientId) -> InputData {
        match self.slot_for_read(frame).and_then(|s| s.entries.get(client)) {
            Some(entry) => entry.data.clone(),
            None => self.predict_for(client),
        }
    }

    /// Whether an entry is stored for (frame, client).
    pub fn has_entry(&self, frame: u32, client: &ClientId) -> bool {
        self.slot_for_read(frame)
            .map(|s| s.entries.contains_key(client))
            .unwrap_or(false)
    }

    /// Whether the stored entry for (frame, client) is confirmed.
    pub fn is_entry_confirmed(&self, frame: u32, client: &ClientId) -> bool {
        self.slot_for_read(frame)
            .and_then(|s| s.entries.get(client))
            .map(|e| e.confirmed)
            .unwrap_or(false)
    }

    /// Explicitly mark a whole frame confirmed.
    pub fn mark_frame_confirmed(&mut self, frame: u32) {
        if frame < self.floor {
            return;
        }
        self.slot_for_write(frame).confirmed_flag = true;
    }

    /// A frame is confirmed iff its explicit flag is set OR every present
    /// entry is CONFIRMED. Unknown frames are not confirmed.
    pub fn is_frame_confirmed(&self, frame: u32) -> bool {
        match self.slot_for_read(frame) {
            None => false,
            Some(slot) => slot.confirmed_flag || slot.entries.values().all(|e| e.confirmed),
        }
    }

    /// Lowest live frame with any non-confirmed entry, or None.
    pub fn oldest_unconfirmed(&self) -> Option<u32> {
        let mut frames: Vec<u32> = self
            .slots
            .iter()
            .flatten()
            .map(|slot| slot.frame)
            .collect();
        frames.sort_unstable();
        for frame in frames {
            if let Some(slot) = self.slot_for_read(frame) {
                if slot.confirmed_flag {
                    continue;
                }
                if slot.entries.values().any(|e| !e.confirmed) {
                    return Some(frame);
                }
            }
        }
        None
    }

    /// Oldest frame this history still covers: the lowest live slot, or
    /// the clear floor when nothing is stored.
    pub fn oldest_frame(&self) -> u32 {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.frame)
            .min()
            .unwrap_or(self.floor)
    }

    /// Most recent `k` records in (frame, client) order, for diagnostics.
    pub fn recent_records(&self, k: usize) -> Vec<InputRecord> {
        let mut records: Vec<InputRecord> = self
            .slots
            .iter()
            .flatten()
            .flat_map(|slot| {
                slot.entries.iter().map(|(client, entry)| InputRecord {
                    frame: slot.frame,
                    client: client.clone(),
                    confirmed: entry.confirmed || slot.confirmed_flag,
                    data: entry.data.clone(),
                })
            })
            .collect();
        records.sort_by(|a, b| (a.frame, &a.client).cmp(&(b.frame, &b.client)));
        if records.len() > k {
            records.drain(..records.len() - k);
        }
        records
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    /// Drop all slots strictly older than `frame` and advance the write
    /// floor. The floor never regresses.
    pub fn clear_old(&mut self, frame: u32) {
        self.floor = self.floor.max(frame);
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|s| s.frame < frame) {
                *slot = None;
            }
        }
    }

    /// Clear all state, keeping only the local client in the active set.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.floor = 0;
        self.active_clients.clear();
        self.last_known.clear();
        if let Some(local) = self.local_client.clone() {
            self.active_clients.insert(local);
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn predict_for(&self, client: &ClientId) -> InputData {
        match self.strategy {
            PredictionStrategy::Idle => InputData::new(),
            PredictionStrategy::RepeatLast => {
                self.last_known.get(client).cloned().unwrap_or_default()
            }
        }
    }

    fn slot_for_read(&self, frame: u32) -> Option<&FrameSlot> {
        self.slots[frame as usize & self.mask]
            .as_ref()
            .filter(|s| s.frame == frame)
    }

    /// Resident slot for `frame`, evicting any slot holding another frame.
    fn slot_for_write(&mut self, frame: u32) -> &mut FrameSlot {
        let idx = frame as usize & self.mask;
        let slot = self.slots[idx].get_or_insert_with(|| FrameSlot {
            frame,
            entries: BTreeMap::new(),
            confirmed_flag: false,
        });
        if slot.frame != frame {
            *slot = FrameSlot {
                frame,
                entries: BTreeMap::new(),
                confirmed_flag: false,
            };
        }
        slot
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::FIXED_ONE;
    use crate::input::action::{ActionId, ActionValue};
    use proptest::prelude::*;

    fn data(x: i32) -> InputData {
        let mut d = InputData::new();
        d.set(ActionId(0), ActionValue::Scalar(x));
        d
    }

    fn history() -> InputHistory {
        InputHistory::new(64, PredictionStrategy::RepeatLast)
    }

    #[test]
    fn test_store_local_confirms_and_updates_last_known() {
        let mut h = history();
        let c = ClientId::new("p1");
        h.set_local_client(c.clone());
        h.store_local(5, &c, data(1));

        assert!(h.is_entry_confirmed(5, &c));
        // repeat-last picks up the stored input at an unknown frame
        assert_eq!(h.get_predicted_input(9, &c), data(1));
    }

    #[test]
    fn test_predicted_never_overwrites_confirmed() {
        let mut h = history();
        let c = ClientId::new("p1");
        h.add_client(c.clone());
        h.store_local(3, &c, data(7));
        h.store_predicted(3, &c, data(9));
        assert_eq!(h.get_predicted_input(3, &c), data(7));
        assert!(h.is_entry_confirmed(3, &c));
    }

    #[test]
    fn test_confirm_detects_misprediction() {
        let mut h = history();
        let c = ClientId::new("p1");
        h.add_client(c.clone());

        // R2: same data → false, different data → true
        h.store_predicted(4, &c, data(1));
        assert!(!h.confirm(4, &c, data(1)));

        h.store_predicted(5, &c, data(1));
        assert!(h.confirm(5, &c, data(2)));
        assert_eq!(h.get_predicted_input(5, &c), data(2));

        // confirming an already-confirmed slot is a no-op
        assert!(!h.confirm(5, &c, data(3)));
        assert_eq!(h.get_predicted_input(5, &c), data(2));
    }

    #[test]
    fn test_confirm_on_empty_slot_stores_confirmed() {
        let mut h = history();
        let c = ClientId::new("p1");
        h.add_client(c.clone());
        assert!(!h.confirm(2, &c, data(4)));
        assert!(h.is_entry_confirmed(2, &c));
        assert_eq!(h.get_predicted_input(2, &c), data(4));
    }

    #[test]
    fn test_frame_inputs_with_strategies() {
        let mut idle = InputHistory::new(64, PredictionStrategy::Idle);
        let mut repeat = InputHistory::new(64, PredictionStrategy::RepeatLast);
        let a = ClientId::new("a");
        let b = ClientId::new("b");
        for h in [&mut idle, &mut repeat] {
            h.add_client(a.clone());
            h.add_client(b.clone());
            h.store_local(1, &a, data(5));
        }

        // frame 2 has no entries; a is repeated or idled, b always empty
        let idle_inputs = idle.get_frame_inputs(2);
        assert_eq!(idle_inputs[&a], InputData::new());
        assert_eq!(idle_inputs[&b], InputData::new());

        let repeat_inputs = repeat.get_frame_inputs(2);
        assert_eq!(repeat_inputs[&a], data(5));
        assert_eq!(repeat_inputs[&b], InputData::new());

        // clients iterate in lexicographic order
        let order: Vec<&ClientId> = repeat_inputs.keys().collect();
        assert_eq!(order, vec![&a, &b]);
    }

    #[test]
    fn test_frame_confirmation() {
        let mut h = history();
        let a = ClientId::new("a");
        let b = ClientId::new("b");
        h.add_client(a.clone());
        h.add_client(b.clone());

        assert!(!h.is_frame_confirmed(7), "unknown frame is unconfirmed");

        h.store_predicted(7, &a, data(1));
        h.store_local(7, &b, data(2));
        assert!(!h.is_frame_confirmed(7));
        assert_eq!(h.oldest_unconfirmed(), Some(7));

        h.confirm(7, &a, data(1));
        assert!(h.is_frame_confirmed(7));
        assert_eq!(h.oldest_unconfirmed(), None);

        // explicit flag wins over entry states
        h.store_predicted(8, &a, data(1));
        h.mark_frame_confirmed(8);
        assert!(h.is_frame_confirmed(8));
        assert_eq!(h.oldest_unconfirmed(), None);
    }

    #[test]
    fn test_ring_eviction() {
        // B1: writing at frame f evicts the slot holding f - capacity
        let mut h = history();
        let c = ClientId::new("p1");
        h.add_client(c.clone());
        h.store_local(1, &c, data(1));
        assert!(h.has_entry(1, &c));

        h.store_local(65, &c, data(2)); // 65 & 63 == 1
        assert!(!h.has_entry(1, &c));
        assert!(h.has_entry(65, &c));
        assert_eq!(h.oldest_frame(), 65);
    }

    #[test]
    fn test_clear_old_floor() {
        // B2: clear_old(K) then a write below K leaves oldest_frame = K
        let mut h = history();
        let c = ClientId::new("p1");
        h.add_client(c.clone());
        h.store_local(10, &c, data(1));
        h.store_local(20, &c, data(2));

        h.clear_old(15);
        assert!(!h.has_entry(10, &c));
        assert!(h.has_entry(20, &c));

        h.store_predicted(14, &c, data(3));
        assert!(!h.has_entry(14, &c), "write below floor is rejected");

        h.clear_old(25);
        assert_eq!(h.oldest_frame(), 25);
        h.store_predicted(24, &c, data(3));
        assert_eq!(h.oldest_frame(), 25, "oldest_frame never regresses");

        // clear_old going backwards is a no-op on the floor
        h.clear_old(5);
        assert_eq!(h.oldest_frame(), 25);
    }

    #[test]
    fn test_reset_keeps_local_client() {
        let mut h = history();
        let local = ClientId::new("local-x");
        let other = ClientId::new("peer");
        h.set_local_client(local.clone());
        h.add_client(other.clone());
        h.store_local(1, &local, data(1));

        h.reset();
        assert!(h.is_active(&local));
        assert!(!h.is_active(&other));
        assert!(!h.has_entry(1, &local));
        assert_eq!(h.get_predicted_input(1, &local), InputData::new());
    }

    #[test]
    fn test_recent_records_dump() {
        let mut h = history();
        let a = ClientId::new("a");
        let b = ClientId::new("b");
        h.add_client(a.clone());
        h.add_client(b.clone());
        for f in 0..5 {
            h.store_local(f, &a, data(f as i32));
            h.store_predicted(f, &b, data(-(f as i32)));
        }
        let records = h.recent_records(4);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].frame, 3);
        assert_eq!(records[3].frame, 4);
        assert!(records.windows(2).all(|w| w[0].frame <= w[1].frame));
    }

    proptest! {
        // P2: once confirmed, a slot never reports unconfirmed again
        #[test]
        fn prop_confirmed_is_sticky(ops in proptest::collection::vec((0u32..32, 0i32..4, 0u8..3), 1..200)) {
            let mut h = history();
            let c = ClientId::new("p1");
            h.add_client(c.clone());
            let mut confirmed_frames: Vec<u32> = Vec::new();

            for (frame, value, op) in ops {
                match op {
                    0 => h.store_predicted(frame, &c, data(value)),
                    1 => {
                        h.store_local(frame, &c, data(value));
                        confirmed_frames.push(frame);
                    }
                    _ => {
                        h.confirm(frame, &c, data(value));
                        confirmed_frames.push(frame);
                    }
                }
                for f in &confirmed_frames {
                    prop_assert!(h.is_entry_confirmed(*f, &c));
                }
            }
        }

        // R2 as a law over arbitrary scalar payloads
        #[test]
        fn prop_confirm_flags_only_real_mispredictions(a in -1000i32..1000, b in -1000i32..1000) {
            let mut h = history();
            let c = ClientId::new("p1");
            h.add_client(c.clone());
            h.store_predicted(3, &c, data(a));
            let mispredicted = h.confirm(3, &c, data(b));
            prop_assert_eq!(mispredicted, a != b);
        }

        // scalar inputs survive the ring unchanged within capacity
        #[test]
        fn prop_within_capacity_roundtrip(frame in 0u32..64, value in -100i32..100) {
            let mut h = history();
            let c = ClientId::new("p1");
            h.add_client(c.clone());
            h.store_local(frame, &c, data(value));
            prop_assert_eq!(h.get_predicted_input(frame, &c), data(value));
        }
    }

    #[test]
    fn test_vector_inputs_roundtrip() {
        let mut h = history();
        let c = ClientId::new("p1");
        h.add_client(c.clone());
        let mut d = InputData::new();
        d.set(ActionId(1), ActionValue::Vector { x: FIXED_ONE, y: -FIXED_ONE });
        h.store_local(2, &c, d.clone());
        assert_eq!(h.get_predicted_input(2, &c), d);
    }
}
