//! Client-Side Prediction
//!
//! Speculative simulation ahead of relay confirmation, rollback on
//! misprediction, and clock-skew estimation for pacing the local loop.

pub mod manager;
pub mod timesync;

pub use manager::{
    ClientResolver, LifecycleEvent, LifecycleKind, PredictHooks, PredictionManager,
    RelayedInput, RollbackStats,
};
pub use timesync::TimeSync;
