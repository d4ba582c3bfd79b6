//! Capacity-aware admission control for concurrent upstream calls.
//!
//! Bounds in-flight *concurrency* rather than request rate. Per Little's law
//! (N = X·R) the sustainable number of in-flight requests is throughput times
//! service time, so a concurrency ceiling tracks backend capacity even as
//! service times drift. The ceiling is estimated online with an
//! additive-increase / multiplicative-decrease loop:
//!
//! 1. every successful response may raise the ceiling by a fixed step, at
//!    most once per raise interval;
//! 2. every overload signal (non-OK status or transport failure) immediately
//!    shrinks the ceiling to a fraction of its current value.
//!
//! The admission gate is a [`tower::Service`] middleware: requests that find
//! the quota exhausted are rejected before the backend is contacted, admitted
//! requests hold one quota slot until their response future completes or is
//! dropped.
//!
//! ```no_run
//! use admission_aimd::http::HttpOutcomes;
//! use admission_aimd::reqwest_integration::ReqwestUpstream;
//! use admission_aimd::{AdmissionControlLayer, AdmissionSettings};
//! use tower::ServiceBuilder;
//!
//! let settings = AdmissionSettings::builder()
//!     .initial_ceiling(5)
//!     .backoff_ratio(0.75)
//!     .build();
//! let gate = ServiceBuilder::new()
//!     .layer(AdmissionControlLayer::new(settings, HttpOutcomes))
//!     .service(ReqwestUpstream::new(reqwest::Client::new()));
//! # let _ = gate;
//! ```

pub mod controller;
pub mod http;
pub mod layer;
pub mod quota;
pub mod reqwest_integration;
pub mod service;

mod future;
mod internal_event;

pub use controller::{AimdController, Outcome, OutcomeLogic};
pub use future::ResponseFuture;
pub use layer::AdmissionControlLayer;
pub use quota::ConcurrencyQuota;
pub use service::{AdmissionControl, AdmissionError};

use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Tuning for the admission gate.
///
/// The defaults back off to 75% on overload and allow one raise per second,
/// which keeps the ceiling sawtooth tight around the backend's sustainable
/// concurrency. Values outside their documented ranges are clamped rather
/// than rejected.
#[derive(Builder, Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionSettings {
    /// Ceiling the quota starts from. With adaptive mode off this is also
    /// where it stays.
    #[builder(default = default_initial_ceiling())]
    pub(crate) initial_ceiling: i64,

    /// Slots added to the ceiling per allowed raise.
    #[builder(default = default_increase_step())]
    pub(crate) increase_step: i64,

    /// Fraction of the ceiling kept after an overload signal, in 0..=1.
    #[builder(default = default_backoff_ratio())]
    pub(crate) backoff_ratio: f64,

    /// Minimum spacing between two raises, no matter how many successes
    /// arrive in between.
    #[builder(default = default_raise_interval())]
    pub(crate) raise_interval: Duration,

    /// Feedback-loop switch. When false the ceiling is static.
    #[builder(default = default_adaptive())]
    pub(crate) adaptive: bool,
}

const fn default_initial_ceiling() -> i64 {
    5
}

const fn default_increase_step() -> i64 {
    1
}

const fn default_backoff_ratio() -> f64 {
    0.75
}

const fn default_raise_interval() -> Duration {
    Duration::from_secs(1)
}

const fn default_adaptive() -> bool {
    true
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            initial_ceiling: default_initial_ceiling(),
            increase_step: default_increase_step(),
            backoff_ratio: default_backoff_ratio(),
            raise_interval: default_raise_interval(),
            adaptive: default_adaptive(),
        }
    }
}

impl AdmissionSettings {
    pub fn initial_ceiling(&self) -> i64 {
        self.initial_ceiling
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }
}
