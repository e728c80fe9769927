//! In-Memory Reference Relay
//!
//! A relay honoring the transport contract, usable in-process: assigns a
//! monotonically increasing sequence number to every input, broadcasts
//! inputs in order, folds hash reports into a majority, routes snapshot
//! requests to the authority and snapshots to their target. The
//! integration scenarios and the demo drive it directly; a production
//! deployment replaces it with a network transport honoring the same
//! messages.
//!
//! The relay clock is virtual: it advances by one tick interval per
//! [`MemoryRelay::step_tick`], so tests control time exactly.

use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::input::action::InputPayload;

use super::protocol::{FromRelay, SnapshotEnvelope, TickEnvelope, TickInput, ToRelay};

/// Channel depth for both directions (the bounded FIFO of the
/// concurrency model).
const CHANNEL_CAPACITY: usize = 256;

/// A participant's connection to the relay.
pub trait Transport {
    /// Queue a message toward the relay.
    fn send(&mut self, msg: ToRelay) -> EngineResult<()>;
    /// Next inbound message, if any.
    fn poll(&mut self) -> Option<FromRelay>;
    /// Close the connection.
    fn close(&mut self);
    /// Whether the connection is usable.
    fn is_open(&self) -> bool;
}

/// Participant-side endpoint handed out by [`MemoryRelay::connect`].
pub struct RelayEndpoint {
    client_id: String,
    tx: mpsc::Sender<ToRelay>,
    rx: mpsc::Receiver<FromRelay>,
    open: bool,
}

impl RelayEndpoint {
    /// The relay-assigned client id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Transport for RelayEndpoint {
    fn send(&mut self, msg: ToRelay) -> EngineResult<()> {
        if !self.open {
            return Err(EngineError::Transient("transport closed".into()));
        }
        self.tx
            .try_send(msg)
            .map_err(|_| EngineError::Transient("relay inbox unavailable".into()))
    }

    fn poll(&mut self) -> Option<FromRelay> {
        if !self.open {
            return None;
        }
        match self.rx.try_recv() {
            Ok(FromRelay::Closed { reason }) => {
                self.open = false;
                Some(FromRelay::Closed { reason })
            }
            Ok(msg) => Some(msg),
            Err(_) => None,
        }
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

struct Participant {
    client_id: String,
    inbox: mpsc::Receiver<ToRelay>,
    outbox: mpsc::Sender<FromRelay>,
    open: bool,
}

/// The in-process relay.
pub struct MemoryRelay {
    tick_interval_ms: i64,
    now_ms: i64,
    room_start_ms: i64,
    room_seed: u64,
    frame: u32,
    next_sequence: u64,
    next_client: u32,
    participants: Vec<Participant>,
    pending: Vec<TickInput>,
    reports: BTreeMap<u32, Vec<(String, u32)>>,
}

impl MemoryRelay {
    /// Create a relay ticking at `tick_interval_ms` with a shared room
    /// seed.
    pub fn new(tick_interval_ms: i64, room_seed: u64) -> Self {
        Self {
            tick_interval_ms,
            now_ms: 0,
            room_start_ms: 0,
            room_seed,
            frame: 0,
            next_sequence: 1,
            next_client: 1,
            participants: Vec::new(),
            pending: Vec::new(),
            reports: BTreeMap::new(),
        }
    }

    /// Relay clock (ms).
    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    /// Current relay frame.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Advance the relay clock without ticking (latency simulation).
    pub fn advance_time(&mut self, ms: i64) {
        self.now_ms += ms;
    }

    /// Accept a participant: assigns the next client id, queues its Join
    /// input for the upcoming tick, and sends the Welcome.
    pub fn connect(&mut self) -> RelayEndpoint {
        let client_id = self.next_client.to_string();
        self.next_client += 1;

        let (to_relay_tx, to_relay_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (from_relay_tx, from_relay_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let welcome = FromRelay::Welcome {
            client_id: client_id.clone(),
            server_time: self.now_ms,
            room_start_time: self.room_start_ms,
            room_seed: self.room_seed,
            frame: self.frame,
        };
        let _ = from_relay_tx.try_send(welcome);

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.push(TickInput {
            sequence,
            client_id: client_id.clone(),
            payload: InputPayload::Join,
        });

        self.participants.push(Participant {
            client_id: client_id.clone(),
            inbox: to_relay_rx,
            outbox: from_relay_tx,
            open: true,
        });
        debug!(client = %client_id, "participant connected");

        RelayEndpoint {
            client_id,
            tx: to_relay_tx,
            rx: from_relay_rx,
            open: true,
        }
    }

    /// Disconnect a participant: queues its Leave input and closes its
    /// channel after the next broadcast.
    pub fn disconnect(&mut self, client_id: &str) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.push(TickInput {
            sequence,
            client_id: client_id.to_string(),
            payload: InputPayload::Leave,
        });
        if let Some(p) = self
            .participants
            .iter_mut()
            .find(|p| p.client_id == client_id)
        {
            let _ = p.outbox.try_send(FromRelay::Closed {
                reason: "disconnected".into(),
            });
            p.open = false;
        }
    }

    /// Drain participant messages without broadcasting a tick.
    pub fn process(&mut self) {
        // drain every inbox first so routing sees a consistent roster
        let mut drained: Vec<(String, ToRelay)> = Vec::new();
        for p in &mut self.participants {
            if !p.open {
                continue;
            }
            while let Ok(msg) = p.inbox.try_recv() {
                drained.push((p.client_id.clone(), msg));
            }
        }
        for (sender, msg) in drained {
            self.handle(sender, msg);
        }
    }

    /// One relay tick: drain, advance the frame and clock, fold the
    /// majority hash and broadcast the tick envelope.
    pub fn step_tick(&mut self) {
        self.process();
        self.frame += 1;
        self.now_ms += self.tick_interval_ms;

        let (majority_frame, majority_hash) = self.fold_majority();
        let inputs = std::mem::take(&mut self.pending);
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let envelope = TickEnvelope {
            sequence,
            frame: self.frame,
            inputs,
            majority_frame,
            majority_hash,
            server_time: self.now_ms,
        };
        self.broadcast(FromRelay::Tick(envelope));
    }

    fn handle(&mut self, sender: String, msg: ToRelay) {
        match msg {
            ToRelay::Input { client_id, payload } => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.pending.push(TickInput {
                    sequence,
                    client_id,
                    payload,
                });
            }
            ToRelay::Hash(report) => {
                self.reports
                    .entry(report.frame)
                    .or_default()
                    .push((sender, report.hash));
            }
            ToRelay::TimeSync { sent_local } => {
                let reply = FromRelay::TimeSync {
                    sent_local,
                    server_time: self.now_ms,
                };
                self.send_to(&sender, reply);
            }
            ToRelay::SnapshotRequest { requester } => {
                if let Some(authority) = self.authority() {
                    self.send_to(&authority, FromRelay::SnapshotRequested { requester });
                }
            }
            ToRelay::Snapshot(envelope) => {
                self.route_snapshot(envelope);
            }
            ToRelay::Leave { client_id } => {
                self.disconnect(&client_id);
            }
        }
    }

    /// The lowest-sorted open client id. This must agree with every
    /// session's own authority derivation, so no participant is excluded
    /// here - an authority asking for a snapshot is routed back to
    /// itself rather than to a peer that would rightly refuse to serve.
    fn authority(&self) -> Option<String> {
        self.participants
            .iter()
            .filter(|p| p.open)
            .map(|p| p.client_id.clone())
            .min()
    }

    fn route_snapshot(&mut self, envelope: SnapshotEnvelope) {
        match envelope.to.clone() {
            Some(target) => self.send_to(&target, FromRelay::Snapshot(envelope)),
            None => self.broadcast(FromRelay::Snapshot(envelope)),
        }
    }

    /// Mode of reported hashes at the newest frame where at least half
    /// the open participants reported; ties break toward the smallest
    /// hash so every observer folds identically.
    fn fold_majority(&mut self) -> (u32, u32) {
        let open = self.participants.iter().filter(|p| p.open).count();
        if open == 0 {
            return (0, 0);
        }
        let quorum = open / 2 + 1;
        let chosen = self
            .reports
            .iter()
            .rev()
            .find(|(_, reports)| reports.len() >= quorum)
            .map(|(frame, _)| *frame);

        let frame = match chosen {
            Some(f) => f,
            None => return (0, 0),
        };
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        if let Some(reports) = self.reports.get(&frame) {
            for (_, hash) in reports {
                *counts.entry(*hash).or_default() += 1;
            }
        }
        let majority = counts
            .iter()
            .max_by_key(|(hash, count)| (**count, std::cmp::Reverse(**hash)))
            .map(|(hash, _)| *hash)
            .unwrap_or(0);

        // folded frames are settled; drop them and everything older
        self.reports = self.reports.split_off(&(frame + 1));
        (frame, majority)
    }

    fn send_to(&mut self, client_id: &str, msg: FromRelay) {
        if let Some(p) = self
            .participants
            .iter_mut()
            .find(|p| p.open && p.client_id == client_id)
        {
            let _ = p.outbox.try_send(msg);
        }
    }

    fn broadcast(&mut self, msg: FromRelay) {
        for p in &mut self.participants {
            if p.open {
                let _ = p.outbox.try_send(msg.clone());
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
