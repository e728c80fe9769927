//! Simulation Debug Guard
//!
//! Optional tripwire for non-deterministic operations inside a tick.
//! The store enters the guard for the duration of each tick; host-facing
//! helpers (wall clock, float conversion, OS randomness wrappers) call
//! [`flag_nondeterministic`] so misuse shows up in the logs instead of as
//! a desync three minutes later.
//!
//! The guard only observes - it never mutates simulation state. The
//! warnings are compiled in behind the `debug-guard` feature.

use std::cell::Cell;

thread_local! {
    static SIM_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// RAII marker for "a tick is executing on this thread".
pub struct SimulationGuard;

impl SimulationGuard {
    /// Enter simulation scope.
    pub fn enter() -> Self {
        SIM_DEPTH.with(|d| d.set(d.get() + 1));
        SimulationGuard
    }
}

impl Drop for SimulationGuard {
    fn drop(&mut self) {
        SIM_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Whether a tick is currently executing on this thread.
pub fn simulation_active() -> bool {
    SIM_DEPTH.with(|d| d.get() > 0)
}

/// Report a forbidden operation observed during simulation.
///
/// No-op outside simulation scope. With the `debug-guard` feature enabled
/// this emits a warning naming the operation; without it the call compiles
/// to a depth check only.
pub fn flag_nondeterministic(op: &str) {
    if !simulation_active() {
        return;
    }
    #[cfg(feature = "debug-guard")]
    tracing::warn!(operation = op, "non-deterministic operation inside tick");
    #[cfg(not(feature = "debug-guard"))]
    let _ = op;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_scoping() {
        assert!(!simulation_active());
        {
            let _g = SimulationGuard::enter();
            assert!(simulation_active());
            {
                let _inner = SimulationGuard::enter();
                assert!(simulation_active());
            }
            assert!(simulation_active());
        }
        assert!(!simulation_active());
    }

    #[test]
    fn test_flag_outside_simulation_is_noop() {
        // must not panic or log when no tick is running
        flag_nondeterministic("wall_clock");
    }
}
