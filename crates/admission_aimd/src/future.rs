//! Response future of the admission gate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Instant;

use pin_project::pin_project;

use crate::controller::{AimdController, OutcomeLogic};
use crate::internal_event;
use crate::quota::QuotaSlot;
use crate::service::AdmissionError;

#[pin_project(project = StateProj)]
enum State<F> {
    /// Rejected at the gate; resolves immediately.
    Denied,
    /// Admitted; drives the upstream call.
    Forward {
        #[pin]
        inner: F,
    },
}

/// Carries the quota slot for the lifetime of an admitted call.
///
/// If the caller stops waiting and drops this future, the inner call is
/// cancelled and the slot guard still releases the quota; the controller
/// only ever sees outcomes of calls that ran to completion.
#[pin_project]
pub struct ResponseFuture<F, L> {
    #[pin]
    state: State<F>,
    forwarded: Option<Forwarded<L>>,
}

struct Forwarded<L> {
    slot: QuotaSlot,
    controller: Arc<AimdController>,
    logic: L,
    began: Instant,
}

impl<F, L> ResponseFuture<F, L> {
    pub(crate) fn denied() -> Self {
        Self {
            state: State::Denied,
            forwarded: None,
        }
    }

    pub(crate) fn forward(
        inner: F,
        slot: QuotaSlot,
        controller: Arc<AimdController>,
        logic: L,
    ) -> Self {
        Self {
            state: State::Forward { inner },
            forwarded: Some(Forwarded {
                slot,
                controller,
                logic,
                began: Instant::now(),
            }),
        }
    }
}

impl<F, L, T, E> Future for ResponseFuture<F, L>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
    L: OutcomeLogic<Response = T, Error = E>,
{
    type Output = Result<T, AdmissionError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.state.project() {
            StateProj::Denied => Poll::Ready(Err(AdmissionError::Denied)),
            StateProj::Forward { inner } => {
                let result = ready!(inner.poll(cx));
                if let Some(forwarded) = this.forwarded.take() {
                    let outcome = match &result {
                        Ok(response) => forwarded.logic.classify_response(response),
                        Err(error) => forwarded.logic.classify_error(error),
                    };
                    internal_event::forwarded(outcome, forwarded.began.elapsed());
                    forwarded.controller.on_outcome(outcome);
                    // `forwarded.slot` drops here, releasing the quota
                    // before the caller observes the result.
                }
                Poll::Ready(result.map_err(|source| AdmissionError::Forward { source }))
            }
        }
    }
}
