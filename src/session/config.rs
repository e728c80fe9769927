//! Session Configuration
//!
//! The closed configuration set of the engine. Defaults follow the
//! shipping tuning; `validate` rejects combinations the ring buffers
//! cannot honor.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::input::history::PredictionStrategy;
use crate::store::MAX_STORE_ENTITIES;

/// Engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Maximum simultaneous entities (column capacity).
    pub max_entities: u32,
    /// How far speculation may run ahead of confirmation.
    pub max_prediction_frames: u32,
    /// Frames local inputs are shifted forward for lockstep arrival.
    pub input_delay_frames: u32,
    /// How missing inputs are synthesized.
    pub prediction_strategy: PredictionStrategy,
    /// Rolling window for sync pass-rate statistics.
    pub hash_window: usize,
    /// Snapshot ring depth (bounds rollback reach).
    pub snapshot_ring_capacity: usize,
    /// Input history ring capacity; power of two.
    pub input_history_capacity: usize,
    /// Catch-up ticks allowed inside one scheduler quantum.
    pub max_catchup_ticks: u32,
    /// RNG seed for offline mode (online rooms use the relay's seed).
    pub seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            max_entities: 4096,
            max_prediction_frames: 15,
            input_delay_frames: 2,
            prediction_strategy: PredictionStrategy::RepeatLast,
            hash_window: 120,
            snapshot_ring_capacity: 32,
            input_history_capacity: 128,
            max_catchup_ticks: 5,
            seed: 0,
        }
    }
}

impl SessionConfig {
    /// Milliseconds per tick.
    pub fn tick_interval_ms(&self) -> i64 {
        1000 / self.tick_rate.max(1) as i64
    }

    /// Reject configurations the rings cannot honor.
    pub fn validate(&self) -> EngineResult<()> {
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(EngineError::Programmer(format!(
                "tick_rate must be in 1..=1000, got {}",
                self.tick_rate
            )));
        }
        if self.max_entities == 0 || self.max_entities > MAX_STORE_ENTITIES {
            return Err(EngineError::Programmer(format!(
                "max_entities must be in 1..={}, got {}",
                MAX_STORE_ENTITIES, self.max_entities
            )));
        }
        if !self.input_history_capacity.is_power_of_two() || self.input_history_capacity < 64 {
            return Err(EngineError::Programmer(format!(
                "input_history_capacity must be a power of two >= 64, got {}",
                self.input_history_capacity
            )));
        }
        if self.snapshot_ring_capacity < 2 {
            return Err(EngineError::Programmer(
                "snapshot_ring_capacity must be at least 2".into(),
            ));
        }
        if self.max_prediction_frames as usize >= self.snapshot_ring_capacity {
            return Err(EngineError::Programmer(format!(
                "max_prediction_frames ({}) must stay below snapshot_ring_capacity ({}) or rollback targets fall off the ring",
                self.max_prediction_frames, self.snapshot_ring_capacity
            )));
        }
        if self.max_prediction_frames as usize >= self.input_history_capacity {
            return Err(EngineError::Programmer(
                "max_prediction_frames must stay below input_history_capacity".into(),
            ));
        }
        Ok(())
    }
}
