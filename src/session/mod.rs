//! Session Orchestrator
//!
//! Wires input history → store → prediction → state sync, owns the
//! transport endpoint and the lifecycle state machine, and exposes the
//! participant-facing API game authors use.
//!
//! ```text
//! OFFLINE ──start()──▶ LOCAL ──connect()──▶ CONNECTING ──▶ CONNECTED
//!     │                  │                      │              │
//!     └──────────────────┴───────── stop() ─────┴──────────────┴──▶ STOPPED
//! ```
//!
//! Offline mode runs the store directly with local inputs confirmed and
//! no speculation; online mode speculates via the prediction manager and
//! participates in hash consensus.

pub mod config;

use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::rng::DeterministicRng;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::input::action::{ActionId, ActionKind, InputData, InputPayload};
use crate::input::ClientId;
use crate::net::protocol::{FromRelay, SnapshotEnvelope, TickEnvelope, ToRelay};
use crate::net::relay::Transport;
use crate::predict::manager::{PredictHooks, PredictionManager, RelayedInput};
use crate::predict::timesync::{TimeSync, RATE_ONE_PPM};
use crate::predict::{LifecycleEvent, LifecycleKind, RollbackStats};
use crate::store::component::FieldDef;
use crate::store::entity::AllocatorState;
use crate::store::snapshot::Snapshot;
use crate::store::store::EntityTypeBuilder;
use crate::store::{Phase, Store};
use crate::sync::engine::{StateSync, SyncStats};
use crate::sync::{diff_snapshots, DesyncReport};

pub use config::SessionConfig;

/// Clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Unrecoverable desync.
pub const EXIT_DESYNC: i32 = 1;
/// Protocol version mismatch.
pub const EXIT_PROTOCOL: i32 = 2;
/// Transport closed by the peer (or retries exhausted).
pub const EXIT_TRANSPORT: i32 = 3;

/// Resync requests before the session gives up with [`EXIT_DESYNC`].
const MAX_RESYNC_ATTEMPTS: u32 = 5;

/// Transient transport failures tolerated before [`EXIT_TRANSPORT`].
const MAX_TRANSIENT_FAILURES: u32 = 5;

/// Session lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not started.
    Offline,
    /// Ticking locally, no relay.
    Local,
    /// Transport attached, awaiting identity/baseline.
    Connecting,
    /// In the room, speculating and syncing.
    Connected,
    /// Halted; probes remain readable.
    Stopped,
}

/// User callbacks behind the session's capability set.
#[derive(Default)]
pub struct SessionCallbacks {
    on_room_create: Option<Box<dyn FnMut(&mut Store) -> EngineResult<()>>>,
    on_connect: Option<Box<dyn FnMut(&mut Store, &ClientId) -> EngineResult<()>>>,
    on_disconnect: Option<Box<dyn FnMut(&mut Store, &ClientId) -> EngineResult<()>>>,
    on_tick: Option<Box<dyn FnMut(&Store, u32)>>,
}

impl SessionCallbacks {
    /// No callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// World setup when a room is created.
    pub fn on_room_create(
        mut self,
        f: impl FnMut(&mut Store) -> EngineResult<()> + 'static,
    ) -> Self {
        self.on_room_create = Some(Box::new(f));
        self
    }

    /// A client joined (spawn its player entity here).
    pub fn on_connect(
        mut self,
        f: impl FnMut(&mut Store, &ClientId) -> EngineResult<()> + 'static,
    ) -> Self {
        self.on_connect = Some(Box::new(f));
        self
    }

    /// A client left (despawn its entities here).
    pub fn on_disconnect(
        mut self,
        f: impl FnMut(&mut Store, &ClientId) -> EngineResult<()> + 'static,
    ) -> Self {
        self.on_disconnect = Some(Box::new(f));
        self
    }

    /// Observer invoked after every completed tick.
    pub fn on_tick(mut self, f: impl FnMut(&Store, u32) + 'static) -> Self {
        self.on_tick = Some(Box::new(f));
        self
    }
}

/// External collaborator attached via [`Session::add_plugin`] (renderer,
/// physics, input capture).
pub trait Plugin {
    /// Diagnostic name.
    fn name(&self) -> &str;
    /// Register systems, components and actions on the session.
    fn install(&mut self, session: &mut Session) -> EngineResult<()>;
}

/// Diagnostic bundle exposed by [`Session::get_drift_stats`].
#[derive(Clone, Debug)]
pub struct DriftStats {
    /// Rollback counters.
    pub rollback: RollbackStats,
    /// Sync state and pass rate.
    pub sync: SyncStats,
    /// Last desync report, if any was produced.
    pub last_desync: Option<DesyncReport>,
}

/// Bridges prediction-manager callbacks onto session state.
struct SessionHooks<'a> {
    callbacks: &'a mut SessionCallbacks,
    sync: &'a mut StateSync,
}

impl PredictHooks for SessionHooks<'_> {
    fn lifecycle_apply(&mut self, store: &mut Store, event: &LifecycleEvent) -> EngineResult<()> {
        match event.kind {
            LifecycleKind::Join => {
                debug!(client = %event.client, frame = event.frame, "join");
                if let Some(cb) = self.callbacks.on_connect.as_mut() {
                    cb(store, &event.client)?;
                }
            }
            LifecycleKind::Leave => {
                debug!(client = %event.client, frame = event.frame, "leave");
                if let Some(cb) = self.callbacks.on_disconnect.as_mut() {
                    cb(store, &event.client)?;
                }
            }
        }
        Ok(())
    }

    fn lifecycle_undo(&mut self, _store: &mut Store, event: &LifecycleEvent) {
        // entity effects are unwound by the snapshot restore; only the
        // active-set change (handled by the manager) needs reversing
        debug!(client = %event.client, frame = event.frame, "lifecycle unwound");
    }

    fn lifecycle_deferred(&mut self, event: &LifecycleEvent) {
        debug!(client = %event.client, frame = event.frame, "lifecycle deferred");
    }

    fn frame_resimulated(&mut self, store: &Store, frame: u32) {
        self.sync.record_resimulated(frame, store.state_hash());
    }
}

/// One participant of a room (or an offline world).
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    store: Store,
    predict: PredictionManager,
    sync: StateSync,
    callbacks: SessionCallbacks,
    transport: Option<Box<dyn Transport>>,
    timesync: TimeSync,

    local_client: ClientId,
    epoch: Instant,
    room_start_ms: i64,
    rate_ppm: u32,
    last_envelope_seq: u64,
    last_envelope_at_ms: Option<i64>,
    relay_frame: u32,
    awaiting_snapshot: bool,
    resync_attempts: u32,
    transient_failures: u32,
    exit_code: Option<i32>,
}

impl Session {
    /// Create a session from a validated configuration.
    pub fn new(config: SessionConfig) -> EngineResult<Self> {
        config.validate()?;
        let store = Store::new(config.max_entities, config.seed)?;
        let predict = PredictionManager::new(
            config.input_history_capacity,
            config.prediction_strategy,
            config.snapshot_ring_capacity,
            config.max_prediction_frames,
            config.input_delay_frames,
        );
        let sync = StateSync::new(config.hash_window);
        Ok(Self {
            config,
            state: SessionState::Offline,
            store,
            predict,
            sync,
            callbacks: SessionCallbacks::default(),
            transport: None,
            timesync: TimeSync::new(),
            local_client: ClientId::local(),
            epoch: Instant::now(),
            room_start_ms: 0,
            rate_ppm: RATE_ONE_PPM,
            last_envelope_seq: 0,
            last_envelope_at_ms: None,
            relay_frame: 0,
            awaiting_snapshot: false,
            resync_attempts: 0,
            transient_failures: 0,
            exit_code: None,
        })
    }

    // =========================================================================
    // REGISTRATION SURFACE
    // =========================================================================

    /// Register a component on the world.
    pub fn register_component(&mut self, name: &str, fields: Vec<FieldDef>) -> EngineResult<u16> {
        self.store.register_component(name, fields)
    }

    /// Begin defining an entity type.
    pub fn define_entity(&mut self, name: &str) -> EntityTypeBuilder<'_> {
        self.store.define_entity(name)
    }

    /// Declare an input action.
    pub fn register_action(&mut self, name: &str, kind: ActionKind) -> EngineResult<ActionId> {
        self.store.register_action(name, kind)
    }

    /// Register a simulation system.
    pub fn register_system(
        &mut self,
        phase: Phase,
        name: impl Into<String>,
        run: impl FnMut(&mut Store) -> EngineResult<()> + 'static,
    ) {
        self.store.register_system(phase, name, run);
    }

    /// Attach an external collaborator (renderer, physics, input).
    pub fn add_plugin(&mut self, plugin: &mut dyn Plugin) -> EngineResult<()> {
        info!(plugin = plugin.name(), "installing plugin");
        plugin.install(self)
    }

    /// Store the callbacks; nothing executes until [`start`](Self::start).
    pub fn init(&mut self, callbacks: SessionCallbacks) -> &mut Self {
        self.callbacks = callbacks;
        self
    }

    /// Override the locally minted client id (deterministic replays,
    /// tests). Only valid before the session starts; online the relay
    /// assigns the id regardless.
    pub fn set_client_id(&mut self, id: ClientId) -> EngineResult<()> {
        if self.state != SessionState::Offline {
            return Err(EngineError::Programmer(
                "client id can only be overridden before start()".into(),
            ));
        }
        self.local_client = id;
        Ok(())
    }

    /// Direct access to the world (registration, tests, tooling).
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Mutable access to the world.
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Enter LOCAL mode: run `on_room_create`, then `on_connect` for the
    /// locally minted client id.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.state != SessionState::Offline {
            return Err(EngineError::Programmer(format!(
                "start() in state {:?}",
                self.state
            )));
        }
        self.predict
            .history_mut()
            .set_local_client(self.local_client.clone());
        if let Some(cb) = self.callbacks.on_room_create.as_mut() {
            cb(&mut self.store)?;
        }
        let local = self.local_client.clone();
        if let Some(cb) = self.callbacks.on_connect.as_mut() {
            cb(&mut self.store, &local)?;
        }
        self.state = SessionState::Local;
        info!(client = %self.local_client, "session started (local)");
        Ok(())
    }

    /// Attach a transport and enter CONNECTING. The session becomes
    /// CONNECTED when its baseline arrives: the first tick for the room
    /// creator, the authority snapshot for a late joiner.
    pub fn connect(&mut self, transport: Box<dyn Transport>) -> EngineResult<()> {
        if self.state != SessionState::Local {
            return Err(EngineError::Programmer(format!(
                "connect() in state {:?}",
                self.state
            )));
        }
        self.transport = Some(transport);
        self.state = SessionState::Connecting;
        self.predict
            .set_resolver(Box::new(|raw| Some(ClientId::new(raw))));
        info!("connecting");
        Ok(())
    }

    /// Halt: drain inbound messages without applying them, close the
    /// transport and release the loop.
    pub fn stop(&mut self) {
        if let Some(t) = self.transport.as_mut() {
            while t.poll().is_some() {}
            t.close();
        }
        self.state = SessionState::Stopped;
        self.exit_code.get_or_insert(EXIT_OK);
        info!("session stopped");
    }

    // =========================================================================
    // PER-QUANTUM DRIVING
    // =========================================================================

    /// Submit the local participant's input for the upcoming tick.
    pub fn queue_input(&mut self, data: InputData) -> EngineResult<()> {
        match self.state {
            SessionState::Local => {
                let frame = self.store.frame() + 1;
                let local = self.local_client.clone();
                self.predict.history_mut().store_local(frame, &local, data);
                Ok(())
            }
            SessionState::Connected => {
                if let Some(t) = self.transport.as_mut() {
                    t.send(ToRelay::Input {
                        client_id: self.local_client.as_str().to_string(),
                        payload: InputPayload::Game(data.clone()),
                    })?;
                }
                self.predict.queue_local_input(data)?;
                Ok(())
            }
            other => Err(EngineError::Programmer(format!(
                "queue_input() in state {:?}",
                other
            ))),
        }
    }

    /// One scheduler quantum: pump the transport, then advance the
    /// simulation as the mode dictates.
    pub fn update(&mut self) -> EngineResult<()> {
        match self.state {
            SessionState::Local => self.tick_local(),
            SessionState::Connecting => self.pump(),
            SessionState::Connected => {
                self.pump()?;
                if self.state == SessionState::Connected {
                    self.advance_connected()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Drive the render systems (display-refresh cadence).
    pub fn render(&mut self) {
        self.store.run_render();
    }

    fn tick_local(&mut self) -> EngineResult<()> {
        let frame = self.store.frame() + 1;
        // a failed frame rolls back to its pre-tick state
        let pre_tick = self.store.sparse_snapshot(true);
        let inputs = self.predict.history().get_frame_inputs(frame);
        if let Err(err) = self.store.tick(frame, inputs) {
            self.store.load_sparse_snapshot(&pre_tick)?;
            return Err(err);
        }
        if let Some(cb) = self.callbacks.on_tick.as_mut() {
            cb(&self.store, frame);
        }
        Ok(())
    }

    fn advance_connected(&mut self) -> EngineResult<()> {
        // never fall behind the confirmed stream; speculate beyond it as
        // far as the relay clock says we should be
        let mut target = self.relay_frame;
        if self.timesync.is_synced() {
            target = target.max(self.timesync.target_frame(
                self.now_ms(),
                self.room_start_ms,
                self.config.tick_interval_ms(),
            ));
        }
        if self.predict.local_frame() >= target {
            // ahead of the relay's clock: wait
            return Ok(());
        }
        let mut budget = self.config.max_catchup_ticks.max(1);
        while self.predict.local_frame() < target && budget > 0 {
            if !self.step_predicted()? {
                break;
            }
            budget -= 1;
        }
        Ok(())
    }

    fn step_predicted(&mut self) -> EngineResult<bool> {
        let mut hooks = SessionHooks {
            callbacks: &mut self.callbacks,
            sync: &mut self.sync,
        };
        let advanced = self.predict.advance_frame(&mut self.store, &mut hooks)?;
        if advanced {
            let frame = self.store.frame();
            let report = self.sync.record_local(frame, self.store.state_hash());
            if let Some(t) = self.transport.as_mut() {
                t.send(ToRelay::Hash(report))?;
            }
            if let Some(cb) = self.callbacks.on_tick.as_mut() {
                cb(&self.store, frame);
            }
        }
        Ok(advanced)
    }

    fn pump(&mut self) -> EngineResult<()> {
        loop {
            let msg = match self.transport.as_mut() {
                Some(t) => t.poll(),
                None => None,
            };
            let Some(msg) = msg else { break };
            self.handle_message(msg)?;
            if self.state == SessionState::Stopped {
                break;
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, msg: FromRelay) -> EngineResult<()> {
        match msg {
            FromRelay::Welcome {
                client_id,
                server_time,
                room_start_time,
                room_seed,
                frame,
            } => self.handle_welcome(client_id, server_time, room_start_time, room_seed, frame),
            FromRelay::Tick(envelope) => self.handle_tick(envelope),
            FromRelay::Snapshot(envelope) => self.handle_snapshot(envelope),
            FromRelay::SnapshotRequested { requester } => self.serve_snapshot(&requester),
            FromRelay::TimeSync {
                sent_local,
                server_time,
            } => {
                self.timesync.add_sample(sent_local, server_time, self.now_ms());
                Ok(())
            }
            FromRelay::Closed { reason } => {
                warn!(reason = %reason, "transport closed by peer");
                self.exit_code = Some(EXIT_TRANSPORT);
                self.stop();
                Ok(())
            }
        }
    }

    fn handle_welcome(
        &mut self,
        client_id: String,
        _server_time: i64,
        room_start_time: i64,
        room_seed: u64,
        frame: u32,
    ) -> EngineResult<()> {
        info!(assigned = %client_id, frame, "welcome");
        self.local_client = ClientId::new(client_id);
        self.room_start_ms = room_start_time;
        self.predict
            .history_mut()
            .set_local_client(self.local_client.clone());
        self.send_time_probe()?;

        if frame == 0 {
            // room creator: the room starts from a fresh, seeded world;
            // on_room_create rebuilds the shared scene
            let empty = self.empty_snapshot(room_seed);
            self.store.load_sparse_snapshot(&empty)?;
            self.predict.history_mut().reset();
            if let Some(cb) = self.callbacks.on_room_create.as_mut() {
                cb(&mut self.store)?;
            }
            self.predict.set_enabled(true);
            self.predict.initialize(&mut self.store, 0);
        } else {
            // late joiner: local state is replaced by the authority's
            self.awaiting_snapshot = true;
            let requester = self.local_client.as_str().to_string();
            if let Some(t) = self.transport.as_mut() {
                t.send(ToRelay::SnapshotRequest { requester })?;
            }
        }
        Ok(())
    }

    fn handle_tick(&mut self, envelope: TickEnvelope) -> EngineResult<()> {
        if envelope.sequence <= self.last_envelope_seq {
            return Err(EngineError::Protocol(format!(
                "tick sequence regressed: {} after {}",
                envelope.sequence, self.last_envelope_seq
            )));
        }
        self.last_envelope_seq = envelope.sequence;
        self.relay_frame = self.relay_frame.max(envelope.frame);

        // steer the loop toward the relay cadence
        let now = self.now_ms();
        if let Some(prev) = self.last_envelope_at_ms {
            self.rate_ppm =
                TimeSync::tick_rate_ppm(now - prev, self.config.tick_interval_ms());
        }
        self.last_envelope_at_ms = Some(now);
        if self.timesync.needs_more_samples() {
            self.send_time_probe()?;
        }

        if self.state == SessionState::Connecting && !self.awaiting_snapshot {
            // room creator: first tick completes the connection
            self.state = SessionState::Connected;
            info!("connected (room creator)");
        }

        let inputs: Vec<RelayedInput> = envelope
            .inputs
            .iter()
            .map(|i| RelayedInput {
                client: i.client_id.clone(),
                payload: i.payload.clone(),
            })
            .collect();
        let mut hooks = SessionHooks {
            callbacks: &mut self.callbacks,
            sync: &mut self.sync,
        };
        self.predict
            .receive_server_tick(&mut self.store, envelope.frame, &inputs, &mut hooks)?;

        self.sync.observe_majority(
            envelope.majority_frame,
            envelope.majority_hash,
            self.predict.confirmed_frame(),
        );
        if self.sync.needs_resync() || self.sync.resync_timed_out(self.store.frame()) {
            self.request_resync()?;
        }
        Ok(())
    }

    fn handle_snapshot(&mut self, envelope: SnapshotEnvelope) -> EngineResult<()> {
        let snapshot = Snapshot::decode(&envelope.bytes, self.store.component_schema())?;

        // capture the divergence diagnostics before the state is replaced
        if self.state == SessionState::Connected {
            let local = self.store.sparse_snapshot(true);
            let report = diff_snapshots(
                &local,
                &snapshot,
                self.store.component_schema(),
                self.predict.history().recent_records(32),
            );
            if !report.is_clean() {
                warn!(
                    entities_only_local = report.only_local.len(),
                    entities_only_authority = report.only_authority.len(),
                    field_diffs = report.field_diffs.len(),
                    magnitude = report.magnitude_permille(),
                    "desync diff"
                );
            }
            self.sync.ingest_report(report);
        }

        self.sync
            .apply_authority_snapshot(&mut self.store, &snapshot, envelope.hash)?;

        // active clients re-derive from player-bearing entities; the
        // local client stays active regardless
        self.rebuild_active_clients();

        let baseline = if envelope.post_tick {
            snapshot.frame
        } else {
            snapshot.frame.saturating_sub(1)
        };
        self.predict.set_enabled(true);
        self.predict.initialize(&mut self.store, baseline);
        self.resync_attempts = 0;

        if self.state == SessionState::Connecting {
            self.awaiting_snapshot = false;
            self.state = SessionState::Connected;
            info!(frame = snapshot.frame, "connected (late joiner)");
        }
        Ok(())
    }

    fn rebuild_active_clients(&mut self) {
        let owners = self.store.owning_clients();
        let history = self.predict.history_mut();
        let current: Vec<ClientId> = history.active_clients().cloned().collect();
        for client in current {
            if !owners.contains(&client) && history.local_client() != Some(&client) {
                history.remove_client(&client);
            }
        }
        for client in owners {
            history.add_client(client);
        }
    }

    fn serve_snapshot(&mut self, requester: &str) -> EngineResult<()> {
        if !self.is_authority() {
            debug!(requester, "ignoring snapshot request (not authority)");
            return Ok(());
        }
        let snapshot = self.store.sparse_snapshot(true);
        let hash = self.store.state_hash();
        info!(requester, frame = snapshot.frame, "serving snapshot");
        if let Some(t) = self.transport.as_mut() {
            t.send(ToRelay::Snapshot(SnapshotEnvelope {
                bytes: snapshot.encode(),
                hash,
                post_tick: true,
                to: Some(requester.to_string()),
            }))?;
        }
        Ok(())
    }

    fn request_resync(&mut self) -> EngineResult<()> {
        self.resync_attempts += 1;
        if self.resync_attempts > MAX_RESYNC_ATTEMPTS {
            error!("resync attempts exhausted");
            self.exit_code = Some(EXIT_DESYNC);
            self.stop();
            return Ok(());
        }
        warn!(attempt = self.resync_attempts, "requesting resync");
        self.sync.begin_resync(self.store.frame());
        let requester = self.local_client.as_str().to_string();
        if let Some(t) = self.transport.as_mut() {
            t.send(ToRelay::SnapshotRequest { requester })?;
        }
        Ok(())
    }

    fn send_time_probe(&mut self) -> EngineResult<()> {
        let sent_local = self.now_ms();
        if let Some(t) = self.transport.as_mut() {
            t.send(ToRelay::TimeSync { sent_local })?;
        }
        Ok(())
    }

    fn empty_snapshot(&self, seed: u64) -> Snapshot {
        Snapshot {
            frame: 0,
            seq: 0,
            post_tick: false,
            entities: Vec::new(),
            columns: self
                .store
                .component_schema()
                .iter()
                .map(|c| c.fields.iter().map(|_| Vec::new()).collect())
                .collect(),
            string_tables: Vec::new(),
            rng_state: DeterministicRng::new(seed).save_state(),
            allocator: AllocatorState {
                next_index: 0,
                free_list: Vec::new(),
                generations: Vec::new(),
            },
        }
    }

    fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    // =========================================================================
    // RUN LOOP
    // =========================================================================

    /// Drive the session until it stops; returns the process exit code.
    pub async fn run(&mut self) -> i32 {
        loop {
            if self.state == SessionState::Stopped {
                return self.exit_code.unwrap_or(EXIT_OK);
            }
            if let Err(err) = self.update() {
                if let Some(code) = self.absorb_failure(err) {
                    return code;
                }
            }
            let nominal = self.config.tick_interval_ms().max(1) as u64;
            let adjusted = nominal * 1_000_000 / self.rate_ppm as u64;
            tokio::time::sleep(std::time::Duration::from_millis(adjusted.max(1))).await;
        }
    }

    /// Map a failure onto retry/resync/exit policy. Returns an exit code
    /// when the session cannot continue.
    fn absorb_failure(&mut self, err: EngineError) -> Option<i32> {
        match err.kind() {
            ErrorKind::Protocol => {
                error!(error = %err, "protocol failure");
                self.exit_code = Some(EXIT_PROTOCOL);
                self.stop();
                Some(EXIT_PROTOCOL)
            }
            ErrorKind::Transient => {
                self.transient_failures += 1;
                warn!(error = %err, failures = self.transient_failures, "transient failure");
                if self.transient_failures > MAX_TRANSIENT_FAILURES {
                    self.exit_code = Some(EXIT_TRANSPORT);
                    self.stop();
                    Some(EXIT_TRANSPORT)
                } else {
                    None
                }
            }
            ErrorKind::Determinism | ErrorKind::Resource => {
                // local state is beyond repair; the authority's snapshot
                // is the source of truth
                warn!(error = %err, "requesting full resync");
                if self.request_resync().is_err() || self.state == SessionState::Stopped {
                    self.exit_code.get_or_insert(EXIT_DESYNC);
                    return Some(self.exit_code.unwrap_or(EXIT_DESYNC));
                }
                None
            }
            ErrorKind::Programmer => {
                error!(error = %err, "programmer error");
                self.exit_code = Some(EXIT_DESYNC);
                self.stop();
                Some(EXIT_DESYNC)
            }
        }
    }

    // =========================================================================
    // PROBES
    // =========================================================================

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The local participant's id.
    pub fn client_id(&self) -> &ClientId {
        &self.local_client
    }

    /// Last simulated frame.
    pub fn frame(&self) -> u32 {
        self.store.frame()
    }

    /// Simulation time in milliseconds (frame × tick interval).
    pub fn time(&self) -> i64 {
        self.store.frame() as i64 * self.config.tick_interval_ms()
    }

    /// State hash of the current frame.
    pub fn get_state_hash(&self) -> u32 {
        self.store.state_hash()
    }

    /// Rolling sync statistics.
    pub fn get_sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    /// Whether this participant is the deterministic authority (lowest
    /// active client id).
    pub fn is_authority(&self) -> bool {
        match self.predict.history().active_clients().next() {
            Some(lowest) => *lowest == self.local_client,
            None => true,
        }
    }

    /// Rollback and desync diagnostics.
    pub fn get_drift_stats(&self) -> DriftStats {
        DriftStats {
            rollback: self.predict.stats(),
            sync: self.sync.stats(),
            last_desync: self.sync.last_report().cloned(),
        }
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

// =============================================================================
// TESTS
// =============================================================================
