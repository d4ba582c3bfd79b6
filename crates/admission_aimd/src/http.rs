//! HTTP outcome classification and the upstream error taxonomy.

use http::StatusCode;
use snafu::Snafu;

use crate::controller::{Outcome, OutcomeLogic};

/// Failures between the gate and its upstream.
///
/// These never carry an upstream status; callers surface them as a gateway
/// failure. Statuses the upstream did produce travel on the response path
/// instead, so the gate can mirror them.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum UpstreamError {
    /// Connection-level failure: refused, reset, DNS.
    #[snafu(display("upstream transport error: {source}"))]
    Transport { source: reqwest::Error },

    /// The client's deadline elapsed mid-call.
    #[snafu(display("upstream request timed out: {source}"))]
    Timeout { source: reqwest::Error },

    /// The request could not be rebuilt for the upstream client.
    #[snafu(display("invalid upstream request: {details}"))]
    InvalidRequest { details: String },
}

/// Nominal-status classification: exactly 200 OK counts as success, every
/// other status is overload pressure. Transport errors use the trait
/// default and count as overload too.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpOutcomes;

impl OutcomeLogic for HttpOutcomes {
    type Response = reqwest::Response;
    type Error = UpstreamError;

    fn classify_response(&self, response: &Self::Response) -> Outcome {
        if response.status() == StatusCode::OK {
            Outcome::Success
        } else {
            Outcome::Overload
        }
    }
}
