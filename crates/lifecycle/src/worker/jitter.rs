//! Restart interval jitter
//!
//! Sibling processes share the same restart interval; without jitter they
//! would recycle their sessions in lockstep.

use std::time::Duration;

use rand::Rng;

/// Default relative spread: ±10%
pub const DEFAULT_SPREAD: f64 = 0.1;

/// Uniform multiplicative jitter applied to the restart interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartJitter {
    spread: f64,
}

impl Default for RestartJitter {
    fn default() -> Self {
        Self {
            spread: DEFAULT_SPREAD,
        }
    }
}

impl RestartJitter {
    /// Jitter drawing from `[1 - spread, 1 + spread]`
    ///
    /// `spread` is clamped to `[DEFAULT_SPREAD, 1]`: restarts are never
    /// scheduled in lockstep.
    pub fn new(spread: f64) -> Self {
        let spread = if spread.is_finite() {
            spread.clamp(DEFAULT_SPREAD, 1.0)
        } else {
            DEFAULT_SPREAD
        };
        Self { spread }
    }

    pub fn spread(&self) -> f64 {
        self.spread
    }

    /// Bounds of a jittered `interval`
    pub fn bounds(&self, interval: Duration) -> (Duration, Duration) {
        (
            interval.mul_f64(1.0 - self.spread),
            interval.mul_f64(1.0 + self.spread),
        )
    }

    /// Draw one jittered delay for `interval`
    pub fn apply(&self, interval: Duration) -> Duration {
        self.apply_with(&mut rand::thread_rng(), interval)
    }

    /// Draw one jittered delay using `rng`
    pub fn apply_with<R: Rng + ?Sized>(&self, rng: &mut R, interval: Duration) -> Duration {
        if interval.is_zero() {
            return interval;
        }
        let factor = rng.gen_range((1.0 - self.spread)..=(1.0 + self.spread));
        interval.mul_f64(factor)
    }
}
