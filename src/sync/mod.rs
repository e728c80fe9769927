//! State Consensus
//!
//! Per-tick hash exchange, majority-based desync detection and
//! snapshot-based recovery, plus the field-level diff diagnostics
//! produced when a desync is confirmed.

pub mod diff;
pub mod engine;

pub use diff::{diff_snapshots, DesyncReport, FieldDiff};
pub use engine::{HashReport, StateSync, SyncState, SyncStats, SyncVerdict};
