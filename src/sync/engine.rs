//! State-Sync Engine
//!
//! Per-tick hash consensus: every participant uploads `{frame, hash}`;
//! the relay folds the reports and echoes the majority hash back inside
//! the next tick envelope. This engine compares its own per-frame hashes
//! against that majority and drives the desync state machine:
//!
//! ```text
//! INITIAL ──match──▶ ACTIVE ──mismatch──▶ DRIFT ──M in a row──▶ DESYNC
//!                      ▲                    │                      │
//!                      └──────match─────────┘              request_resync
//!                      ▲                                          │
//!                      └────── snapshot loads + next match ── RESYNCING
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::store::snapshot::Snapshot;
use crate::store::Store;

use super::diff::DesyncReport;

/// Consecutive confirmed-tail mismatches that escalate DRIFT to DESYNC.
pub const CONSECUTIVE_MISMATCH_LIMIT: u32 = 3;

/// Diff magnitude (per-mille) that escalates DRIFT to DESYNC directly.
pub const MAGNITUDE_THRESHOLD_PERMILLE: u32 = 250;

/// Frames to wait for a requested snapshot before retrying.
pub const RESYNC_TIMEOUT_FRAMES: u32 = 60;

/// Desync state machine states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No successful comparison yet.
    Initial,
    /// In consensus.
    Active,
    /// At least one recent mismatch; watching.
    Drift,
    /// Diverged; a full resync is required.
    Desync,
    /// Snapshot requested from the authority; awaiting recovery.
    Resyncing,
}

/// Verdict of one majority comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncVerdict {
    /// Local hash equals the majority.
    Match,
    /// Local hash disagrees with the majority.
    Mismatch,
    /// No comparison possible (no local hash recorded, or no majority
    /// reported yet).
    Unknown,
}

/// Compact per-tick uplink record (≈9 bytes framed).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashReport {
    /// Frame the hash was computed at.
    pub frame: u32,
    /// The 32-bit state hash.
    pub hash: u32,
}

/// Rolling sync statistics exposed to the session probes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Current state-machine state.
    pub state: SyncState,
    /// Comparisons performed.
    pub checks: u64,
    /// Comparisons that matched.
    pub matches: u64,
    /// Pass rate over the rolling window, per-mille.
    pub window_pass_permille: u32,
    /// Mismatches observed since session start.
    pub drift_count: u32,
    /// Resyncs completed.
    pub resync_count: u32,
}

/// The state-sync engine of one participant.
pub struct StateSync {
    state: SyncState,
    window: VecDeque<bool>,
    window_cap: usize,
    local_hashes: BTreeMap<u32, u32>,
    mismatch_streak: u32,
    drift_count: u32,
    checks: u64,
    matches: u64,
    resync_count: u32,
    resync_deadline: Option<u32>,
    last_report: Option<DesyncReport>,
}

impl StateSync {
    /// Create an engine with the given rolling-window size.
    pub fn new(hash_window: usize) -> Self {
        Self {
            state: SyncState::Initial,
            window: VecDeque::with_capacity(hash_window),
            window_cap: hash_window.max(1),
            local_hashes: BTreeMap::new(),
            mismatch_streak: 0,
            drift_count: 0,
            checks: 0,
            matches: 0,
            resync_count: 0,
            resync_deadline: None,
            last_report: None,
        }
    }

    /// Current state-machine state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Record the local hash for a frame and produce the uplink record.
    pub fn record_local(&mut self, frame: u32, hash: u32) -> HashReport {
        self.local_hashes.insert(frame, hash);
        self.prune(frame);
        HashReport { frame, hash }
    }

    /// Replace the recorded hash for a re-simulated frame (rollback
    /// observers call this; the hash after resimulation is the one that
    /// must agree with the majority).
    pub fn record_resimulated(&mut self, frame: u32, hash: u32) {
        self.local_hashes.insert(frame, hash);
    }

    /// Compare the relayed majority hash for `frame` against our record.
    ///
    /// `confirmed_tail` is the highest relay-confirmed frame; only
    /// mismatches at or below it count toward the DESYNC escalation,
    /// since speculative frames legitimately disagree until confirmed.
    /// A zero majority means "no consensus reported yet" and is skipped.
    pub fn observe_majority(&mut self, frame: u32, majority_hash: u32, confirmed_tail: u32) -> SyncVerdict {
        if majority_hash == 0 {
            return SyncVerdict::Unknown;
        }
        let local = match self.local_hashes.get(&frame) {
            Some(h) => *h,
            None => return SyncVerdict::Unknown,
        };

        self.checks += 1;
        let matched = local == majority_hash;
        self.push_window(matched);

        if matched {
            self.matches += 1;
            self.mismatch_streak = 0;
            match self.state {
                SyncState::Initial | SyncState::Drift => {
                    self.state = SyncState::Active;
                }
                SyncState::Resyncing => {
                    info!(frame, "resync recovered");
                    self.state = SyncState::Active;
                    self.resync_count += 1;
                    self.resync_deadline = None;
                }
                _ => {}
            }
            return SyncVerdict::Match;
        }

        self.drift_count += 1;
        if frame <= confirmed_tail {
            self.mismatch_streak += 1;
        }
        warn!(
            frame,
            local = format_args!("{:08x}", local),
            majority = format_args!("{:08x}", majority_hash),
            streak = self.mismatch_streak,
            "state hash mismatch"
        );
        match self.state {
            SyncState::Active | SyncState::Initial => {
                self.state = SyncState::Drift;
            }
            SyncState::Drift => {
                if self.mismatch_streak >= CONSECUTIVE_MISMATCH_LIMIT {
                    warn!(frame, "desync confirmed");
                    self.state = SyncState::Desync;
                }
            }
            _ => {}
        }
        SyncVerdict::Mismatch
    }

    /// Attach a diagnostic report; a large divergence escalates DRIFT to
    /// DESYNC immediately.
    pub fn ingest_report(&mut self, report: DesyncReport) {
        if self.state == SyncState::Drift
            && report.magnitude_permille() > MAGNITUDE_THRESHOLD_PERMILLE
        {
            warn!(
                magnitude = report.magnitude_permille(),
                "desync confirmed by diff magnitude"
            );
            self.state = SyncState::Desync;
        }
        self.last_report = Some(report);
    }

    /// Whether a resync must be requested.
    pub fn needs_resync(&self) -> bool {
        self.state == SyncState::Desync
    }

    /// Transition to RESYNCING; the caller sends the out-of-band snapshot
    /// request to the authority. `now_frame` starts the retry timer.
    pub fn begin_resync(&mut self, now_frame: u32) {
        self.state = SyncState::Resyncing;
        self.resync_deadline = Some(now_frame + RESYNC_TIMEOUT_FRAMES);
        info!(now_frame, "resync requested");
    }

    /// Whether the requested snapshot failed to arrive in time.
    pub fn resync_timed_out(&self, now_frame: u32) -> bool {
        self.state == SyncState::Resyncing
            && self.resync_deadline.is_some_and(|deadline| now_frame > deadline)
    }

    /// Load the authority's snapshot and verify the post-load hash.
    ///
    /// A hash mismatch after a verbatim load is a determinism violation
    /// (the two builds disagree on simulation itself, not on state).
    pub fn apply_authority_snapshot(
        &mut self,
        store: &mut Store,
        snapshot: &Snapshot,
        expected_hash: u32,
    ) -> EngineResult<()> {
        store.load_sparse_snapshot(snapshot)?;
        let loaded = store.state_hash();
        if loaded != expected_hash {
            return Err(EngineError::Determinism(format!(
                "post-load hash {:08x} != authority hash {:08x}",
                loaded, expected_hash
            )));
        }
        // stale per-frame hashes predate the new baseline
        self.local_hashes.clear();
        self.record_local(snapshot.frame, loaded);
        self.mismatch_streak = 0;
        info!(frame = snapshot.frame, "authority snapshot applied");
        Ok(())
    }

    /// Latest diagnostic report, if any.
    pub fn last_report(&self) -> Option<&DesyncReport> {
        self.last_report.as_ref()
    }

    /// Rolling statistics snapshot.
    pub fn stats(&self) -> SyncStats {
        let passes = self.window.iter().filter(|m| **m).count();
        let permille = if self.window.is_empty() {
            0
        } else {
            (passes * 1000 / self.window.len()) as u32
        };
        SyncStats {
            state: self.state,
            checks: self.checks,
            matches: self.matches,
            window_pass_permille: permille,
            drift_count: self.drift_count,
            resync_count: self.resync_count,
        }
    }

    fn push_window(&mut self, matched: bool) {
        if self.window.len() == self.window_cap {
            self.window.pop_front();
        }
        self.window.push_back(matched);
    }

    fn prune(&mut self, newest: u32) {
        let keep_from = newest.saturating_sub(self.window_cap as u32 * 2);
        self.local_hashes = self.local_hashes.split_off(&keep_from);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::diff::DesyncReport;

    fn engine() -> StateSync {
        StateSync::new(120)
    }

    #[test]
    fn test_initial_to_active_on_match() {
        let mut sync = engine();
        assert_eq!(sync.state(), SyncState::Initial);
        sync.record_local(1, 0xAAAA);
        assert_eq!(sync.observe_majority(1, 0xAAAA, 1), SyncVerdict::Match);
        assert_eq!(sync.state(), SyncState::Active);
    }

    #[test]
    fn test_unknown_skipped() {
        let mut sync = engine();
        sync.record_local(1, 0xAAAA);
        // zero majority = relay has no consensus yet
        assert_eq!(sync.observe_majority(1, 0, 1), SyncVerdict::Unknown);
        // no local record for frame 9
        assert_eq!(sync.observe_majority(9, 0xBBBB, 9), SyncVerdict::Unknown);
        assert_eq!(sync.state(), SyncState::Initial);
        assert_eq!(sync.stats().checks, 0);
    }

    #[test]
    fn test_drift_then_desync_on_streak() {
        let mut sync = engine();
        sync.record_local(1, 1);
        sync.observe_majority(1, 1, 1);
        assert_eq!(sync.state(), SyncState::Active);

        // single mismatch → DRIFT
        sync.record_local(2, 2);
        sync.observe_majority(2, 0xFF, 2);
        assert_eq!(sync.state(), SyncState::Drift);

        // two more confirmed-tail mismatches → DESYNC
        sync.record_local(3, 3);
        sync.observe_majority(3, 0xFF, 3);
        assert_eq!(sync.state(), SyncState::Drift);
        sync.record_local(4, 4);
        sync.observe_majority(4, 0xFF, 4);
        assert_eq!(sync.state(), SyncState::Desync);
        assert!(sync.needs_resync());
        assert_eq!(sync.stats().drift_count, 3);
    }

    #[test]
    fn test_speculative_mismatches_do_not_escalate() {
        let mut sync = engine();
        sync.record_local(1, 1);
        sync.observe_majority(1, 1, 1);

        // mismatches beyond the confirmed tail never build a streak
        for frame in 2..10 {
            sync.record_local(frame, frame);
            sync.observe_majority(frame, 0xFF, 1);
        }
        assert_eq!(sync.state(), SyncState::Drift);
        assert!(!sync.needs_resync());
    }

    #[test]
    fn test_drift_recovers_on_match() {
        let mut sync = engine();
        sync.record_local(1, 1);
        sync.observe_majority(1, 0xFF, 1);
        assert_eq!(sync.state(), SyncState::Drift);

        sync.record_local(2, 2);
        sync.observe_majority(2, 2, 2);
        assert_eq!(sync.state(), SyncState::Active);

        // streak reset: a fresh mismatch pair does not desync
        sync.record_local(3, 3);
        sync.observe_majority(3, 0xFF, 3);
        sync.record_local(4, 4);
        sync.observe_majority(4, 4, 4);
        assert_eq!(sync.state(), SyncState::Active);
    }

    #[test]
    fn test_magnitude_escalation() {
        let mut sync = engine();
        sync.record_local(1, 1);
        sync.observe_majority(1, 0xFF, 1);
        assert_eq!(sync.state(), SyncState::Drift);

        let report = DesyncReport {
            fields_compared: 10,
            field_diffs: (0..5)
                .map(|i| crate::sync::diff::FieldDiff {
                    entity: i,
                    component: "Transform2D".into(),
                    field: "x".into(),
                    local: 1,
                    authority: 2,
                })
                .collect(),
            ..DesyncReport::default()
        };
        sync.ingest_report(report);
        assert_eq!(sync.state(), SyncState::Desync);
        assert!(sync.last_report().is_some());
    }

    #[test]
    fn test_resync_lifecycle_and_timeout() {
        let mut sync = engine();
        sync.record_local(1, 1);
        sync.observe_majority(1, 0xFF, 1);
        for frame in 2..4 {
            sync.record_local(frame, frame);
            sync.observe_majority(frame, 0xFF, frame);
        }
        assert!(sync.needs_resync());

        sync.begin_resync(100);
        assert_eq!(sync.state(), SyncState::Resyncing);
        assert!(!sync.resync_timed_out(100 + RESYNC_TIMEOUT_FRAMES));
        assert!(sync.resync_timed_out(101 + RESYNC_TIMEOUT_FRAMES));

        // a matching hash after recovery returns to ACTIVE
        sync.record_local(200, 7);
        assert_eq!(sync.observe_majority(200, 7, 200), SyncVerdict::Match);
        assert_eq!(sync.state(), SyncState::Active);
        assert_eq!(sync.stats().resync_count, 1);
    }

    #[test]
    fn test_window_pass_rate() {
        let mut sync = StateSync::new(4);
        for frame in 0..4u32 {
            sync.record_local(frame, frame + 1);
            let majority = if frame % 2 == 0 { frame + 1 } else { 0xFF };
            sync.observe_majority(frame, majority, frame);
        }
        assert_eq!(sync.stats().window_pass_permille, 500);

        // window slides: four straight matches push the rate to 1000
        for frame in 4..8u32 {
            sync.record_local(frame, frame + 1);
            sync.observe_majority(frame, frame + 1, frame);
        }
        assert_eq!(sync.stats().window_pass_permille, 1000);
    }

    #[test]
    fn test_uplink_record_shape() {
        let mut sync = engine();
        let report = sync.record_local(42, 0xDEADBEEF);
        assert_eq!(report, HashReport { frame: 42, hash: 0xDEADBEEF });
    }
}
