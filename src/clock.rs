//! Clock interface consumed by the decoder (out of scope to
//! implement in full here — this crate only defines the seam and a small
//! reference implementation used by tests).

use std::sync::{Arc, Mutex};

/// Shared, externally-owned clock reference. Guarded by its own lock; the
/// decoder never holds its own mutex while calling into this trait.
pub trait Clock: Send + Sync {
    /// Start the clock at `(now, first_ts)`.
    fn start(&self, now: i64, first_ts: i64);

    /// Convert a stream timestamp to a system deadline at the given rate.
    /// Returns `None` when the conversion is not yet meaningful (e.g. the
    /// clock hasn't started).
    fn convert_to_system(&self, now: i64, ts: i64, rate: f32) -> Option<i64>;
}

/// Reference `Clock` used by tests and as documentation of the expected
/// contract: a simple linear mapping from a fixed origin.
#[derive(Debug, Default)]
pub struct TestClock {
    inner: Mutex<TestClockState>,
}

#[derive(Debug, Default)]
struct TestClockState {
    started: bool,
    origin_now: i64,
    origin_ts: i64,
}

impl TestClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Clock for TestClock {
    fn start(&self, now: i64, first_ts: i64) {
        let mut state = self.inner.lock().unwrap();
        state.started = true;
        state.origin_now = now;
        state.origin_ts = first_ts;
    }

    fn convert_to_system(&self, _now: i64, ts: i64, rate: f32) -> Option<i64> {
        let state = self.inner.lock().unwrap();
        if !state.started {
            return None;
        }
        let delta = ts - state.origin_ts;
        let scaled = (delta as f64 / rate as f64) as i64;
        Some(state.origin_now + scaled)
    }
}
