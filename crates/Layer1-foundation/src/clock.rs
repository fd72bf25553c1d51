//! Time sources
//!
//! Rate limiting runs on two independent clocks: a time source for window
//! accounting and a wall clock for reboot detection. Both implement [`Clock`].
//! Values are seconds as `f64`, the unit persisted in ledger files.

use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of "now" that can also wait
pub trait Clock: Send + Sync + Debug {
    /// Current time in seconds
    fn now(&self) -> f64;

    /// Block for `duration` in this clock's domain
    fn sleep(&self, duration: Duration);
}

/// Shared handle to a clock
pub type SharedClock = Arc<dyn Clock>;

// ============================================================================
// SystemClock
// ============================================================================

/// Wall-clock seconds since the Unix epoch
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ============================================================================
// ManualClock
// ============================================================================

#[derive(Debug, Default)]
struct ManualState {
    now: f64,
    slept: f64,
    sleeps: u32,
}

/// Virtual clock for deterministic tests.
///
/// `sleep` advances the clock instead of blocking. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: start,
                ..Default::default()
            })),
        }
    }

    pub fn set(&self, now: f64) {
        self.state.lock().now = now;
    }

    pub fn advance(&self, secs: f64) {
        self.state.lock().now += secs;
    }

    /// Total seconds passed to `sleep`
    pub fn total_slept(&self) -> f64 {
        self.state.lock().slept
    }

    /// Number of `sleep` calls
    pub fn sleep_count(&self) -> u32 {
        self.state.lock().sleeps
    }

    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.state.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        let mut state = self.state.lock();
        state.now += secs;
        state.slept += secs;
        state.sleeps += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_epoch_seconds() {
        let now = SystemClock.now();
        // After 2020-01-01
        assert!(now > 1_577_836_800.0);
    }

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new(100.0);
        clock.sleep(Duration::from_millis(250));
        clock.advance(1.0);

        assert!((clock.now() - 101.25).abs() < 1e-9);
        assert!((clock.total_slept() - 0.25).abs() < 1e-9);
        assert_eq!(clock.sleep_count(), 1);
    }

    #[test]
    fn test_manual_clock_clones_share_state() {
        let clock = ManualClock::new(0.0);
        let shared = clock.shared();
        clock.set(42.0);
        assert_eq!(shared.now(), 42.0);
    }
}
