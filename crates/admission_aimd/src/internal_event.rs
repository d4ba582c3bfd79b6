//! Metric emission points for the admission path.
//!
//! The two gauges are the pair the feedback loop drives toward each other:
//! requests currently in flight and the target the ceiling allows.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::controller::Outcome;

pub(crate) fn in_flight(used: i64) {
    gauge!("admission_inflight_requests").set(used as f64);
}

pub(crate) fn ceiling(value: i64) {
    gauge!("admission_target_inflight_requests").set(value as f64);
}

pub(crate) fn denied() {
    counter!("admission_denied_total").increment(1);
}

pub(crate) fn forwarded(outcome: Outcome, elapsed: Duration) {
    let outcome = match outcome {
        Outcome::Success => "success",
        Outcome::Overload => "overload",
    };
    counter!("admission_forwarded_total", "outcome" => outcome).increment(1);
    histogram!("admission_forward_duration_seconds").record(elapsed.as_secs_f64());
}
