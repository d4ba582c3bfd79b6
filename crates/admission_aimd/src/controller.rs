//! AIMD feedback loop driving the quota ceiling.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota as RateQuota, RateLimiter};
use tracing::debug;

use crate::AdmissionSettings;
use crate::internal_event;
use crate::quota::ConcurrencyQuota;

/// Classification of one forwarded request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The backend answered with its nominal OK status.
    Success,
    /// Anything else: backend-reported overload, an unexpected status, or a
    /// transport failure.
    Overload,
}

/// Maps an inner service's responses and errors onto [`Outcome`]s.
///
/// The seam that keeps the controller transport-agnostic. HTTP upstreams get
/// an implementation in [`crate::http`]; tests plug in their own.
pub trait OutcomeLogic: Clone + Send + Sync + 'static {
    type Response;
    type Error: std::error::Error + Send + Sync + 'static;

    fn classify_response(&self, response: &Self::Response) -> Outcome;

    /// Errors never carry a nominal OK, so the default treats every error as
    /// overload pressure.
    fn classify_error(&self, _error: &Self::Error) -> Outcome {
        Outcome::Overload
    }
}

type RaiseGate = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Additive-increase / multiplicative-decrease policy over a
/// [`ConcurrencyQuota`].
///
/// Memoryless: each decision depends only on the single latest outcome,
/// producing a sawtooth estimate that oscillates around the backend's
/// sustainable concurrency and self-corrects without persisted history.
pub struct AimdController {
    quota: Arc<ConcurrencyQuota>,
    increase_step: i64,
    backoff_ratio: f64,
    raise_gate: RaiseGate,
    adaptive: bool,
}

impl AimdController {
    pub fn new(quota: Arc<ConcurrencyQuota>, settings: &AdmissionSettings) -> Self {
        // Token bucket with one cell per raise interval, burst 1: however
        // many successes arrive inside an interval, at most one raise.
        let rate = RateQuota::with_period(settings.raise_interval)
            .unwrap_or_else(|| RateQuota::per_second(NonZeroU32::MIN));
        Self {
            quota,
            increase_step: settings.increase_step.max(0),
            backoff_ratio: settings.backoff_ratio.clamp(0.0, 1.0),
            raise_gate: RateLimiter::direct(rate),
            adaptive: settings.adaptive,
        }
    }

    /// Feeds one outcome into the loop. No-op when adaptive mode is off.
    ///
    /// Raises are paced by the token bucket; lowers are immediate and
    /// unthrottled, so a sustained failure run collapses the ceiling
    /// multiplicatively while recovery is paced additively.
    pub fn on_outcome(&self, outcome: Outcome) {
        if !self.adaptive {
            return;
        }
        match outcome {
            Outcome::Success => {
                if self.raise_gate.check().is_ok() {
                    self.quota.raise(self.increase_step);
                    let ceiling = self.quota.ceiling();
                    debug!(ceiling, "ceiling raised");
                    internal_event::ceiling(ceiling);
                }
            }
            Outcome::Overload => {
                self.quota.lower(self.backoff_ratio);
                let ceiling = self.quota.ceiling();
                debug!(ceiling, "ceiling lowered after overload");
                internal_event::ceiling(ceiling);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn controller(settings: AdmissionSettings) -> (AimdController, Arc<ConcurrencyQuota>) {
        let quota = Arc::new(ConcurrencyQuota::new(settings.initial_ceiling()));
        let controller = AimdController::new(Arc::clone(&quota), &settings);
        (controller, quota)
    }

    #[test]
    fn overload_lowers_immediately() {
        let settings = AdmissionSettings::builder()
            .initial_ceiling(8)
            .backoff_ratio(0.5)
            .build();
        let (controller, quota) = controller(settings);

        controller.on_outcome(Outcome::Overload);
        assert_eq!(quota.ceiling(), 4);
        controller.on_outcome(Outcome::Overload);
        assert_eq!(quota.ceiling(), 2);
    }

    #[test]
    fn success_burst_raises_once_per_interval() {
        let settings = AdmissionSettings::builder()
            .initial_ceiling(5)
            .raise_interval(Duration::from_secs(3_600))
            .build();
        let (controller, quota) = controller(settings);

        for _ in 0..10 {
            controller.on_outcome(Outcome::Success);
        }
        assert_eq!(quota.ceiling(), 6);
    }

    #[test]
    fn lowers_are_never_throttled() {
        let settings = AdmissionSettings::builder()
            .initial_ceiling(1_000)
            .backoff_ratio(0.5)
            .build();
        let (controller, quota) = controller(settings);

        let mut expected = 1_000_i64;
        for _ in 0..6 {
            controller.on_outcome(Outcome::Overload);
            expected = (0.5 * expected as f64).ceil() as i64;
        }
        assert_eq!(quota.ceiling(), expected);
    }

    #[test]
    fn static_mode_ignores_outcomes() {
        let settings = AdmissionSettings::builder()
            .initial_ceiling(5)
            .adaptive(false)
            .build();
        let (controller, quota) = controller(settings);

        controller.on_outcome(Outcome::Success);
        controller.on_outcome(Outcome::Overload);
        assert_eq!(quota.ceiling(), 5);
    }
}
