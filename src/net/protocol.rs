//! Relay Protocol Messages
//!
//! Wire types exchanged between a participant and the relay. The relay
//! is a dumb ordered broadcaster: it assigns a monotonically increasing
//! sequence number to every input, folds participant hash reports into a
//! majority, and routes snapshots; it never simulates.
//!
//! Messages use externally-tagged serde so both encodings work: JSON for
//! debugging ease, bincode behind a length-prefixed frame for
//! production. The snapshot payload inside [`SnapshotEnvelope`] is the
//! separate hand-versioned byte format from the store.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::input::action::InputPayload;
use crate::sync::engine::HashReport;

/// Relay protocol version, checked on every framed message.
pub const PROTOCOL_VERSION: u8 = 1;

/// One input inside a tick envelope, with its relay-assigned sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickInput {
    /// Relay-assigned, monotonically increasing.
    pub sequence: u64,
    /// Sender's client id.
    pub client_id: String,
    /// Lifecycle transition or game input.
    pub payload: InputPayload,
}

/// One relay tick broadcast to every participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEnvelope {
    /// Envelope sequence number.
    pub sequence: u64,
    /// The frame these inputs are confirmed for.
    pub frame: u32,
    /// Inputs in sequence order.
    pub inputs: Vec<TickInput>,
    /// Frame the majority hash refers to (0 hash = no consensus yet).
    pub majority_frame: u32,
    /// Majority of participant-reported hashes at `majority_frame`.
    pub majority_hash: u32,
    /// Relay clock in milliseconds.
    pub server_time: i64,
}

/// A full snapshot in transit (authority → relay → one participant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    /// Encoded snapshot (store wire format).
    pub bytes: Vec<u8>,
    /// State hash the snapshot must reproduce after load.
    pub hash: u32,
    /// Whether the snapshot was taken post-tick.
    pub post_tick: bool,
    /// Routing target (client id); None broadcasts.
    pub to: Option<String>,
}

/// Messages a participant sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToRelay {
    /// A local input to be ordered and broadcast.
    Input {
        /// Sender's client id.
        client_id: String,
        /// The input payload.
        payload: InputPayload,
    },
    /// Compact per-tick state-hash report.
    Hash(HashReport),
    /// Clock-sync probe; the relay echoes it with its own time.
    TimeSync {
        /// Sender's local clock at send time (ms).
        sent_local: i64,
    },
    /// Out-of-band request for a full snapshot from the authority.
    SnapshotRequest {
        /// Requesting client id.
        requester: String,
    },
    /// The authority serving a snapshot.
    Snapshot(SnapshotEnvelope),
    /// Orderly departure.
    Leave {
        /// Departing client id.
        client_id: String,
    },
}

/// Messages the relay sends to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FromRelay {
    /// Connection accepted: the relay-assigned identity and room facts.
    Welcome {
        /// Relay-assigned client id.
        client_id: String,
        /// Relay clock at accept time (ms).
        server_time: i64,
        /// Relay clock when the room started ticking (ms).
        room_start_time: i64,
        /// Shared room seed.
        room_seed: u64,
        /// Current relay frame.
        frame: u32,
    },
    /// A confirmed tick.
    Tick(TickEnvelope),
    /// A snapshot routed to this participant.
    Snapshot(SnapshotEnvelope),
    /// The relay asks this participant (the authority) to serve a
    /// snapshot for `requester`.
    SnapshotRequested {
        /// The participant waiting for the snapshot.
        requester: String,
    },
    /// Clock-sync echo; the receiver stamps its own arrival time.
    TimeSync {
        /// Echoed local send time (ms).
        sent_local: i64,
        /// Relay clock when the probe arrived (ms).
        server_time: i64,
    },
    /// The relay closed the connection.
    Closed {
        /// Human-readable reason.
        reason: String,
    },
}

// =============================================================================
// FRAMING (u32 length | u8 version | bincode body)
// =============================================================================

/// Encode a message behind the length-prefixed binary frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> EngineResult<Vec<u8>> {
    let body = bincode::serialize(msg)
        .map_err(|e| EngineError::Protocol(format!("encode: {}", e)))?;
    let mut out = Vec::with_capacity(body.len() + 5);
    out.extend_from_slice(&((body.len() + 1) as u32).to_le_bytes());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one framed message, returning it and the bytes consumed.
///
/// Returns `Ok(None)` when the buffer does not yet hold a whole frame.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> EngineResult<Option<(T, usize)>> {
    if bytes.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len == 0 {
        return Err(EngineError::Protocol("empty frame".into()));
    }
    if bytes.len() < 4 + len {
        return Ok(None);
    }
    let version = bytes[4];
    if version != PROTOCOL_VERSION {
        return Err(EngineError::Protocol(format!(
            "protocol version mismatch: got {}, expected {}",
            version, PROTOCOL_VERSION
        )));
    }
    let body = &bytes[5..4 + len];
    let msg = bincode::deserialize(body)
        .map_err(|e| EngineError::Protocol(format!("decode: {}", e)))?;
    Ok(Some((msg, 4 + len)))
}

/// JSON encoding for logs and debugging.
pub fn to_json<T: Serialize>(msg: &T) -> EngineResult<String> {
    serde_json::to_string(msg).map_err(|e| EngineError::Protocol(format!("json: {}", e)))
}

/// JSON decoding for logs and debugging.
pub fn from_json<T: DeserializeOwned>(s: &str) -> EngineResult<T> {
    serde_json::from_str(s).map_err(|e| EngineError::Protocol(format!("json: {}", e)))
}

// =============================================================================
// TESTS
// =============================================================================
