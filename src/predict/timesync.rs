//! Clock-Skew Estimation
//!
//! Estimates the offset between the relay's clock and the local clock
//! from round-trip samples, and derives the target simulation frame from
//! wall-clock time. All times are integer milliseconds; the tick-rate
//! nudge is integer parts-per-million, so loop steering is reproducible.
//!
//! The round trip is assumed symmetric: `latency = (received - sent) / 2`
//! and `delta = server_time - received + latency`.

/// Samples kept for filtering (FIFO beyond this).
const MAX_SAMPLES: usize = 32;

/// Samples required before outlier filtering kicks in.
const FILTER_THRESHOLD: usize = 5;

/// Samples requested during initial synchronization.
const WARMUP_SAMPLES: usize = 8;

/// One part per million; 1_000_000 = run at nominal rate.
pub const RATE_ONE_PPM: u32 = 1_000_000;

/// Hard clamp on the tick-rate nudge: ±5 %.
pub const RATE_MIN_PPM: u32 = 950_000;

/// Hard clamp on the tick-rate nudge: ±5 %.
pub const RATE_MAX_PPM: u32 = 1_050_000;

#[derive(Clone, Copy, Debug)]
struct Sample {
    latency_ms: i64,
    delta_ms: i64,
}

/// Clock-skew estimator.
#[derive(Debug, Default)]
pub struct TimeSync {
    samples: Vec<Sample>,
    synced: bool,
    delta_ms: i64,
}

impl TimeSync {
    /// Fresh, unsynced estimator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one round-trip sample.
    ///
    /// The first sample is adopted verbatim and marks the estimator as
    /// synced; later samples refine the estimate. Once five or more
    /// samples exist, the reported delta is the mean of the
    /// lowest-latency samples (top latency quartile discarded).
    pub fn add_sample(&mut self, sent_local: i64, server_time: i64, received_local: i64) {
        let latency_ms = (received_local - sent_local) / 2;
        let delta_ms = server_time - received_local + latency_ms;

        if self.samples.len() == MAX_SAMPLES {
            self.samples.remove(0);
        }
        self.samples.push(Sample {
            latency_ms,
            delta_ms,
        });

        if !self.synced {
            self.synced = true;
            self.delta_ms = delta_ms;
            return;
        }
        self.delta_ms = self.filtered_delta();
    }

    fn filtered_delta(&self) -> i64 {
        if self.samples.len() < FILTER_THRESHOLD {
            let sum: i64 = self.samples.iter().map(|s| s.delta_ms).sum();
            return sum / self.samples.len() as i64;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by_key(|s| s.latency_ms);
        let keep = sorted.len() - sorted.len() / 4;
        let sum: i64 = sorted[..keep].iter().map(|s| s.delta_ms).sum();
        sum / keep as i64
    }

    /// Whether at least one sample was adopted.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// True while the estimator wants more warmup samples.
    pub fn needs_more_samples(&self) -> bool {
        self.samples.len() < WARMUP_SAMPLES
    }

    /// Current estimate of (server clock - local clock) in ms.
    pub fn delta_ms(&self) -> i64 {
        self.delta_ms
    }

    /// Estimated one-way latency (lowest observed, 0 when unsynced).
    pub fn latency_ms(&self) -> i64 {
        self.samples.iter().map(|s| s.latency_ms).min().unwrap_or(0)
    }

    /// Server clock reading for a local timestamp.
    pub fn server_now(&self, local_now_ms: i64) -> i64 {
        local_now_ms + self.delta_ms
    }

    /// Tick-rate nudge toward the relay's cadence, in parts-per-million.
    ///
    /// Ticks arriving slower than nominal slow the local loop; faster
    /// arrivals speed it up. A quarter of the raw error is applied per
    /// update and the result is hard-clamped to ±5 %.
    pub fn tick_rate_ppm(observed_interval_ms: i64, nominal_interval_ms: i64) -> u32 {
        if observed_interval_ms <= 0 || nominal_interval_ms <= 0 {
            return RATE_ONE_PPM;
        }
        let raw = nominal_interval_ms * RATE_ONE_PPM as i64 / observed_interval_ms;
        let nudged = RATE_ONE_PPM as i64 + (raw - RATE_ONE_PPM as i64) / 4;
        nudged.clamp(RATE_MIN_PPM as i64, RATE_MAX_PPM as i64) as u32
    }

    /// The frame the relay's clock says we should be at.
    pub fn target_frame(&self, local_now_ms: i64, server_start_ms: i64, tick_interval_ms: i64) -> u32 {
        if tick_interval_ms <= 0 {
            return 0;
        }
        let elapsed = self.server_now(local_now_ms) - server_start_ms;
        if elapsed <= 0 {
            return 0;
        }
        (elapsed / tick_interval_ms) as u32
    }
}

// =============================================================================
// TESTS
// =============================================================================
