//! The admission gate as `tower` middleware.

use std::sync::Arc;
use std::task::{Context, Poll};

use snafu::Snafu;
use tower::Service;

use crate::controller::{AimdController, OutcomeLogic};
use crate::future::ResponseFuture;
use crate::internal_event;
use crate::quota::{ConcurrencyQuota, QuotaSlot};

/// Errors produced by the gate, wrapping the inner service's error type for
/// the forwarded path.
#[derive(Debug, Snafu)]
pub enum AdmissionError<E>
where
    E: std::error::Error + 'static,
{
    /// The concurrency quota is exhausted; the request never reached the
    /// backend.
    #[snafu(display("admission denied: concurrency quota exhausted"))]
    Denied,

    /// The request was admitted but forwarding failed.
    #[snafu(display("admitted request failed upstream: {source}"))]
    Forward { source: E },
}

/// Wraps an inner service with quota admission and AIMD feedback.
///
/// `call` claims a quota slot synchronously: a denied request resolves
/// immediately without constructing the inner call, an admitted request
/// holds its slot until the response future completes or is dropped. The
/// observed outcome feeds the controller just before the slot is returned.
///
/// Clones share the quota and controller, so one layered stack gates all of
/// its per-task service clones together.
#[derive(Clone)]
pub struct AdmissionControl<S, L> {
    inner: S,
    quota: Arc<ConcurrencyQuota>,
    controller: Arc<AimdController>,
    logic: L,
}

impl<S, L> AdmissionControl<S, L> {
    pub(crate) fn new(
        inner: S,
        quota: Arc<ConcurrencyQuota>,
        controller: Arc<AimdController>,
        logic: L,
    ) -> Self {
        Self {
            inner,
            quota,
            controller,
            logic,
        }
    }
}

impl<S, L, Req> Service<Req> for AdmissionControl<S, L>
where
    S: Service<Req>,
    S::Error: std::error::Error + Send + Sync + 'static,
    L: OutcomeLogic<Response = S::Response, Error = S::Error>,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = ResponseFuture<S::Future, L>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|source| AdmissionError::Forward { source })
    }

    fn call(&mut self, request: Req) -> Self::Future {
        if !self.quota.try_acquire() {
            internal_event::denied();
            return ResponseFuture::denied();
        }
        let slot = QuotaSlot::new(Arc::clone(&self.quota));
        internal_event::in_flight(self.quota.used());
        ResponseFuture::forward(
            self.inner.call(request),
            slot,
            Arc::clone(&self.controller),
            self.logic.clone(),
        )
    }
}
