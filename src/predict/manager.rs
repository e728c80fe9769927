//! Prediction Manager
//!
//! Owns the input history and a ring of per-frame snapshots; speculates
//! ahead of relay confirmation and rolls the store back when a confirmed
//! input disagrees with what was predicted.
//!
//! Frame convention: `local_frame` is the last simulated frame (0 before
//! any tick). The ring snapshot tagged `k` is the world state at frame
//! `k`, taken before the tick for `k + 1` runs, so restoring tag `k` and
//! resimulating `k+1..=L` re-executes exactly the ticks whose inputs may
//! have changed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::input::action::{InputData, InputPayload};
use crate::input::history::{InputHistory, PredictionStrategy};
use crate::input::ClientId;
use crate::store::snapshot::Snapshot;
use crate::store::Store;

/// Kind of a lifecycle transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    /// Participant joined.
    Join,
    /// Participant left.
    Leave,
}

/// A join/leave ordered by the relay at a specific frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Transition kind.
    pub kind: LifecycleKind,
    /// The client joining or leaving.
    pub client: ClientId,
    /// Frame the relay ordered the transition at.
    pub frame: u32,
}

/// One relayed input as delivered inside a tick envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedInput {
    /// Client-id string as the relay knows it.
    pub client: String,
    /// Lifecycle transition or game input.
    pub payload: InputPayload,
}

/// Session-side capabilities the manager calls back into.
///
/// Lifecycle effects (spawn/destroy player entities, active-client set
/// maintenance) belong to the session and its user callbacks; they run
/// inside the tick so they participate in rollback via snapshots.
pub trait PredictHooks {
    /// Apply a lifecycle event (join: add client, spawn; leave: remove,
    /// despawn). Runs during live application and during resimulation.
    fn lifecycle_apply(&mut self, store: &mut Store, event: &LifecycleEvent) -> EngineResult<()>;

    /// Unwind the session-level effect of a lifecycle event before the
    /// snapshot restore rewinds the store itself.
    fn lifecycle_undo(&mut self, store: &mut Store, event: &LifecycleEvent);

    /// A lifecycle event for a frame not yet simulated: adjust the
    /// active-client set immediately (the simulation effect is recorded
    /// and applied when the frame is reached).
    fn lifecycle_deferred(&mut self, event: &LifecycleEvent);

    /// A frame was re-simulated during rollback; observers (state sync)
    /// rebuild their per-frame hashes here.
    fn frame_resimulated(&mut self, store: &Store, frame: u32);
}

/// Rolling rollback statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStats {
    /// Rollbacks executed.
    pub rollback_count: u32,
    /// Deepest rollback (frames rewound).
    pub max_rollback_depth: u32,
    /// Total frames re-simulated across all rollbacks.
    pub frames_resimulated: u64,
}

/// Maps relay client-id strings to engine client ids.
pub type ClientResolver = Box<dyn Fn(&str) -> Option<ClientId>>;

/// The prediction manager.
pub struct PredictionManager {
    history: InputHistory,
    ring: Vec<Option<Snapshot>>,
    enabled: bool,
    local_frame: u32,
    confirmed_frame: u32,
    max_prediction_frames: u32,
    input_delay_frames: u32,
    lifecycle_log: BTreeMap<u32, Vec<LifecycleEvent>>,
    resolver: Option<ClientResolver>,
    stats: RollbackStats,
}

impl PredictionManager {
    /// Create a manager. `history_capacity` must be a power of two;
    /// `ring_capacity` bounds how deep a rollback can reach.
    pub fn new(
        history_capacity: usize,
        strategy: PredictionStrategy,
        ring_capacity: usize,
        max_prediction_frames: u32,
        input_delay_frames: u32,
    ) -> Self {
        Self {
            history: InputHistory::new(history_capacity, strategy),
            ring: (0..ring_capacity).map(|_| None).collect(),
            enabled: false,
            local_frame: 0,
            confirmed_frame: 0,
            max_prediction_frames,
            input_delay_frames,
            lifecycle_log: BTreeMap::new(),
            resolver: None,
            stats: RollbackStats::default(),
        }
    }

    /// Enable or disable speculation (disabled in offline mode).
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether speculation is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Install the client-id resolver used for relayed game inputs.
    pub fn set_resolver(&mut self, resolver: ClientResolver) {
        self.resolver = Some(resolver);
    }

    /// The input history (active-client management, diagnostics).
    pub fn history(&self) -> &InputHistory {
        &self.history
    }

    /// Mutable input history.
    pub fn history_mut(&mut self) -> &mut InputHistory {
        &mut self.history
    }

    /// Last simulated frame.
    pub fn local_frame(&self) -> u32 {
        self.local_frame
    }

    /// Highest relay-confirmed frame.
    pub fn confirmed_frame(&self) -> u32 {
        self.confirmed_frame
    }

    /// How far speculation is ahead of confirmation (0 when the
    /// confirmed stream is ahead of simulation).
    pub fn prediction_depth(&self) -> u32 {
        self.local_frame.saturating_sub(self.confirmed_frame)
    }

    /// Rollback statistics.
    pub fn stats(&self) -> RollbackStats {
        self.stats
    }

    /// Configured input delay in frames.
    pub fn input_delay_frames(&self) -> u32 {
        self.input_delay_frames
    }

    /// Re-baseline after a full snapshot load: counters move to `frame`,
    /// the ring restarts from the store's current state and stale
    /// history below `frame` is dropped.
    pub fn initialize(&mut self, store: &mut Store, frame: u32) {
        self.local_frame = frame;
        self.confirmed_frame = frame;
        for slot in &mut self.ring {
            *slot = None;
        }
        self.lifecycle_log = self.lifecycle_log.split_off(&(frame + 1));
        self.history.clear_old(frame);
        let baseline = store.sparse_snapshot(true);
        self.save_to_ring(frame, baseline);
        debug!(frame, "prediction manager re-baselined");
    }

    /// Queue a local input as CONFIRMED at the input-delayed frame.
    ///
    /// The delay shifts inputs forward so other participants observe them
    /// in lockstep with minimal mispredictions. Returns the frame used.
    pub fn queue_local_input(&mut self, data: InputData) -> EngineResult<u32> {
        let local = self
            .history
            .local_client()
            .cloned()
            .ok_or_else(|| EngineError::Programmer("no local client set".into()))?;
        // the next tick to simulate is local_frame + 1
        let frame = self.local_frame + 1 + self.input_delay_frames;
        self.history.store_local(frame, &local, data);
        Ok(frame)
    }

    /// Speculatively advance one frame. No-op (returning false) when
    /// disabled or when `max_prediction_frames` ahead of confirmation.
    pub fn advance_frame(
        &mut self,
        store: &mut Store,
        hooks: &mut dyn PredictHooks,
    ) -> EngineResult<bool> {
        if !self.enabled {
            return Ok(false);
        }
        if self.prediction_depth() >= self.max_prediction_frames {
            return Ok(false);
        }

        let pre_tick = store.sparse_snapshot(true);
        self.save_to_ring(self.local_frame, pre_tick);

        let frame = self.local_frame + 1;
        // lifecycle transitions recorded for this frame land before it
        if let Some(events) = self.lifecycle_log.get(&frame).cloned() {
            for event in &events {
                self.apply_lifecycle(store, event, hooks)?;
            }
        }
        let inputs = self.collect_inputs(frame);
        match store.tick(frame, inputs) {
            Ok(()) => {
                self.local_frame = frame;
                Ok(true)
            }
            Err(err) => {
                // frame aborted: restore the pre-tick state
                if let Some(snapshot) = self.ring_get(self.local_frame) {
                    let snapshot = snapshot.clone();
                    store.load_sparse_snapshot(&snapshot)?;
                }
                Err(err)
            }
        }
    }

    /// Ingest a confirmed tick from the relay.
    ///
    /// Returns true iff a rollback was executed.
    pub fn receive_server_tick(
        &mut self,
        store: &mut Store,
        frame: u32,
        inputs: &[RelayedInput],
        hooks: &mut dyn PredictHooks,
    ) -> EngineResult<bool> {
        if !self.enabled {
            return Ok(false);
        }

        let mut lifecycle: Vec<LifecycleEvent> = Vec::new();
        let mut game: Vec<(ClientId, InputData)> = Vec::new();
        for input in inputs {
            match &input.payload {
                InputPayload::Join => lifecycle.push(LifecycleEvent {
                    kind: LifecycleKind::Join,
                    client: ClientId::new(&*input.client),
                    frame,
                }),
                InputPayload::Leave => lifecycle.push(LifecycleEvent {
                    kind: LifecycleKind::Leave,
                    client: ClientId::new(&*input.client),
                    frame,
                }),
                InputPayload::Game(data) => {
                    let resolver = self.resolver.as_ref().ok_or_else(|| {
                        EngineError::Programmer(
                            "client-id resolver required for relayed game inputs".into(),
                        )
                    })?;
                    let client = resolver(&input.client).ok_or_else(|| {
                        EngineError::Programmer(format!(
                            "client-id resolver rejected '{}'",
                            input.client
                        ))
                    })?;
                    game.push((client, data.clone()));
                }
            }
        }

        if frame > self.local_frame {
            // not simulated yet: adjust the active set now, remember the
            // simulation effects for when the frame is reached
            for event in lifecycle {
                match event.kind {
                    LifecycleKind::Join => self.history.add_client(event.client.clone()),
                    LifecycleKind::Leave => self.history.remove_client(&event.client),
                }
                hooks.lifecycle_deferred(&event);
                self.lifecycle_log.entry(frame).or_default().push(event);
            }
            for (client, data) in game {
                self.history.confirm(frame, &client, data);
            }
            self.history.mark_frame_confirmed(frame);
            // the ordered stream confirms everything up to this frame
            self.confirmed_frame = self.confirmed_frame.max(frame);
            return Ok(false);
        }

        let mut needs_rollback = false;
        for (client, data) in game {
            if self.history.confirm(frame, &client, data) {
                needs_rollback = true;
            }
        }
        let genesis = frame == 0 && self.local_frame == 0;
        for event in lifecycle {
            if genesis {
                // nothing simulated yet: apply directly; the effect is
                // captured by the first ring snapshot
                self.apply_lifecycle(store, &event, hooks)?;
            } else {
                needs_rollback = true;
                self.lifecycle_log.entry(frame).or_default().push(event);
            }
        }
        self.confirmed_frame = self.confirmed_frame.max(frame);
        self.history.mark_frame_confirmed(frame);

        if needs_rollback {
            // the corrected inputs feed the tick at `frame`, so the last
            // trusted state is `frame - 1`
            let target = frame.checked_sub(1).ok_or_else(|| {
                EngineError::Resource("lifecycle correction at frame 0 after simulation".into())
            })?;
            self.execute_rollback(store, target, hooks)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Roll back to `to_frame` and resimulate through `local_frame`.
    ///
    /// Fails with a Resource error when `to_frame` is older than the
    /// oldest ring snapshot; the caller must then request a full resync
    /// and re-baseline via [`initialize`](Self::initialize).
    pub fn execute_rollback(
        &mut self,
        store: &mut Store,
        to_frame: u32,
        hooks: &mut dyn PredictHooks,
    ) -> EngineResult<()> {
        if to_frame >= self.local_frame {
            return Ok(());
        }
        let resim_from = to_frame + 1;
        let resim_to = self.local_frame;

        // unwind session-level lifecycle effects, newest first
        let undo_frames: Vec<u32> = self
            .lifecycle_log
            .range(resim_from..=resim_to)
            .map(|(f, _)| *f)
            .collect();
        for f in undo_frames.into_iter().rev() {
            if let Some(events) = self.lifecycle_log.get(&f).cloned() {
                for event in events.iter().rev() {
                    self.undo_lifecycle(store, event, hooks);
                }
            }
        }

        let snapshot = self
            .ring_get(to_frame)
            .cloned()
            .ok_or_else(|| {
                EngineError::Resource(format!(
                    "rollback target {} older than snapshot ring",
                    to_frame
                ))
            })?;
        store.load_sparse_snapshot(&snapshot)?;

        let depth = resim_to - to_frame;
        warn!(to_frame, resim_to, depth, "rollback");

        for f in resim_from..=resim_to {
            // refresh the ring along the corrected timeline; the snapshot
            // precedes the frame's lifecycle effects so a later rollback
            // re-applies them exactly once
            let pre_tick = store.sparse_snapshot(true);
            self.save_to_ring(f - 1, pre_tick);

            if let Some(events) = self.lifecycle_log.get(&f).cloned() {
                for event in &events {
                    self.apply_lifecycle(store, event, hooks)?;
                }
            }
            let inputs = self.collect_inputs(f);
            store.tick(f, inputs)?;
            hooks.frame_resimulated(store, f);
        }

        self.stats.rollback_count += 1;
        self.stats.max_rollback_depth = self.stats.max_rollback_depth.max(depth);
        self.stats.frames_resimulated += depth as u64;
        Ok(())
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Maintain the active-client set, then hand the event to the
    /// session's callbacks.
    fn apply_lifecycle(
        &mut self,
        store: &mut Store,
        event: &LifecycleEvent,
        hooks: &mut dyn PredictHooks,
    ) -> EngineResult<()> {
        match event.kind {
            LifecycleKind::Join => self.history.add_client(event.client.clone()),
            LifecycleKind::Leave => self.history.remove_client(&event.client),
        }
        hooks.lifecycle_apply(store, event)
    }

    /// Reverse the active-set change of an event being rolled over.
    fn undo_lifecycle(
        &mut self,
        store: &mut Store,
        event: &LifecycleEvent,
        hooks: &mut dyn PredictHooks,
    ) {
        match event.kind {
            LifecycleKind::Join => self.history.remove_client(&event.client),
            LifecycleKind::Leave => self.history.add_client(event.client.clone()),
        }
        hooks.lifecycle_undo(store, event);
    }

    /// Inputs for `frame`, with synthesized predictions written back so
    /// later confirmation can compare against them.
    fn collect_inputs(&mut self, frame: u32) -> BTreeMap<ClientId, InputData> {
        let inputs = self.history.get_frame_inputs(frame);
        for (client, data) in &inputs {
            if !self.history.has_entry(frame, client) {
                self.history.store_predicted(frame, client, data.clone());
            }
        }
        inputs
    }

    fn save_to_ring(&mut self, tag: u32, mut snapshot: Snapshot) {
        let idx = tag as usize % self.ring.len();
        snapshot.frame = tag;
        self.ring[idx] = Some(snapshot);
    }

    fn ring_get(&self, tag: u32) -> Option<&Snapshot> {
        self.ring[tag as usize % self.ring.len()]
            .as_ref()
            .filter(|s| s.frame == tag)
    }
}

// =============================================================================
// TESTS
// =============================================================================
