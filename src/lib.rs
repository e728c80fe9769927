//! # Quorum Engine
//!
//! Deterministic lockstep simulation core for local-first multiplayer
//! games: client-side prediction with rollback, and hash-based state
//! consensus over a dumb ordered relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      QUORUM ENGINE                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                 │
//! │  ├── fixed.rs    - Q16.16 arithmetic + integer trig tables  │
//! │  ├── vec2.rs     - 2D vector with fixed-point               │
//! │  ├── rng.rs      - Deterministic xoroshiro64** PRNG         │
//! │  ├── hash.rs     - 32-bit streaming state hash              │
//! │  └── guard.rs    - Debug tripwire for forbidden ops         │
//! │                                                             │
//! │  store/          - Entity-Component-Store (deterministic)   │
//! │  ├── entity.rs   - 20/12-bit ids, generational allocator    │
//! │  ├── component.rs- Field schemas and columnar storage       │
//! │  ├── interner.rs - Per-domain string tables                 │
//! │  ├── schedule.rs - Six-phase system scheduler               │
//! │  ├── snapshot.rs - Versioned snapshot wire format           │
//! │  └── store.rs    - Queries, tick, state hash, snapshots     │
//! │                                                             │
//! │  input/          - Action schemas + per-frame history       │
//! │  predict/        - Speculation, rollback, clock skew        │
//! │  sync/           - Hash consensus + desync recovery         │
//! │  net/            - Relay contract + in-memory relay         │
//! │  session/        - Orchestrator and participant API         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/`, `store/`, `input/` and `predict/` layers are 100%
//! deterministic:
//! - No floating point on any simulation path
//! - Ordered collections everywhere iteration order can leak into state
//! - All randomness from the seeded, snapshot-carried PRNG
//! - No wall clock and no I/O inside a tick
//!
//! Two participants with identical entity types, identical confirmed
//! inputs and an identical starting snapshot produce identical state
//! hashes at every frame.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod input;
pub mod net;
pub mod predict;
pub mod session;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use crate::core::fixed::{to_fixed, to_float, Fixed, FIXED_HALF, FIXED_ONE, FIXED_SCALE};
pub use crate::core::rng::DeterministicRng;
pub use crate::core::vec2::FixedVec2;
pub use crate::error::{EngineError, EngineResult, ErrorKind};
pub use crate::input::action::{ActionId, ActionKind, ActionValue, InputData, InputPayload};
pub use crate::input::ClientId;
pub use crate::session::{Session, SessionCallbacks, SessionConfig, SessionState};
pub use crate::store::{EntityId, FieldDef, Phase, Store, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
