//! Simulated per-job service-time distributions.

use std::time::Duration;

use rand_distr::{Distribution, Normal, NormalError};

/// Source of per-job service durations.
///
/// Injectable so the binaries can run a randomized distribution while tests
/// substitute a deterministic one.
pub trait ServiceTime: Send + Sync + 'static {
    fn sample(&self) -> Duration;
}

/// Symmetric normal jitter around a configured mean.
///
/// Samples that land below zero clamp to zero; with jitter well under the
/// mean that tail is negligible.
#[derive(Clone, Debug)]
pub struct NormalServiceTime {
    mean: Duration,
    jitter: Normal<f64>,
}

impl NormalServiceTime {
    pub fn new(mean: Duration, jitter: Duration) -> Result<Self, NormalError> {
        Ok(Self {
            mean,
            jitter: Normal::new(0.0, jitter.as_secs_f64())?,
        })
    }
}

impl ServiceTime for NormalServiceTime {
    fn sample(&self) -> Duration {
        let secs = self.mean.as_secs_f64() + self.jitter.sample(&mut rand::rng());
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Deterministic stub for tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedServiceTime(pub Duration);

impl ServiceTime for FixedServiceTime {
    fn sample(&self) -> Duration {
        self.0
    }
}
