//! Layer wiring one quota/controller pair around an upstream service.

use std::sync::Arc;

use tower::Layer;

use crate::AdmissionSettings;
use crate::controller::AimdController;
use crate::quota::ConcurrencyQuota;
use crate::service::AdmissionControl;

/// Builds [`AdmissionControl`] services that share a single quota and
/// controller.
///
/// Construct one layer per backend route and keep it for the process
/// lifetime: every service it produces (one clone per connection or task)
/// gates on the same counters.
#[derive(Clone)]
pub struct AdmissionControlLayer<L> {
    quota: Arc<ConcurrencyQuota>,
    controller: Arc<AimdController>,
    logic: L,
}

impl<L> AdmissionControlLayer<L> {
    pub fn new(settings: AdmissionSettings, logic: L) -> Self {
        let quota = Arc::new(ConcurrencyQuota::new(settings.initial_ceiling));
        let controller = Arc::new(AimdController::new(Arc::clone(&quota), &settings));
        Self {
            quota,
            controller,
            logic,
        }
    }

    /// The shared quota, for gauges and tests.
    pub fn quota(&self) -> Arc<ConcurrencyQuota> {
        Arc::clone(&self.quota)
    }
}

impl<S, L> Layer<S> for AdmissionControlLayer<L>
where
    L: Clone,
{
    type Service = AdmissionControl<S, L>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionControl::new(
            inner,
            Arc::clone(&self.quota),
            Arc::clone(&self.controller),
            self.logic.clone(),
        )
    }
}
