//! Fixed-timestep driver.
//!
//! Converts elapsed wall time into a whole number of simulation steps so the
//! physics rate is independent of the frame rate. Leftover time below one
//! step carries over to the next frame.

use std::time::{Duration, Instant};

/// Accumulator-based simulation clock.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    step: Duration,
    accumulator: Duration,
    previous: Option<Instant>,
    max_steps_per_frame: Option<u32>,
    dropped: Duration,
}

impl FixedTimestep {
    /// Clock running `steps_per_second` steps per simulated second, with an
    /// optional cap on steps per poll.
    ///
    /// The step never drops below one nanosecond, so rates above 1e9 run at
    /// 1e9 steps per second.
    pub fn new(steps_per_second: u32, max_steps_per_frame: Option<u32>) -> Self {
        let rate = u64::from(steps_per_second.max(1));
        Self {
            step: Duration::from_nanos((1_000_000_000 / rate).max(1)),
            accumulator: Duration::ZERO,
            previous: None,
            max_steps_per_frame,
            dropped: Duration::ZERO,
        }
    }

    /// Duration of one step.
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Time accrued but not yet consumed by a step.
    pub fn remainder(&self) -> Duration {
        self.accumulator
    }

    /// Total time discarded by the catch-up cap.
    pub fn dropped(&self) -> Duration {
        self.dropped
    }

    /// Number of whole steps owed at `now`.
    ///
    /// The first call only records `now` and returns 0.
    pub fn poll(&mut self, now: Instant) -> u32 {
        let Some(previous) = self.previous.replace(now) else {
            return 0;
        };
        self.accumulator += now.saturating_duration_since(previous);

        let mut steps = 0u32;
        while self.accumulator >= self.step {
            if self.max_steps_per_frame.is_some_and(|cap| steps >= cap) {
                // Keep only the sub-step remainder.
                let owed = self.accumulator;
                let remainder = Duration::from_nanos((owed.as_nanos() % self.step.as_nanos()) as u64);
                let excess = owed - remainder;
                self.dropped += excess;
                self.accumulator = remainder;
                tracing::warn!(
                    cap = steps,
                    dropped_ms = excess.as_secs_f64() * 1000.0,
                    "simulation fell behind, dropping accumulated time"
                );
                break;
            }
            self.accumulator -= self.step;
            steps += 1;
        }
        steps
    }
}
