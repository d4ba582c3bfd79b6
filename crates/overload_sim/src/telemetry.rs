//! Process-wide telemetry: log subscriber and Prometheus exposition.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Histogram boundaries bracketing the simulated service times, so queueing
/// delay is visible as mass shifting to the right of the mean.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.95, 1.0, 1.05, 1.1, 1.5, 1.95, 2.0, 2.05, 2.1, 2.5, 3.0, 4.0,
];

/// Installs the log subscriber and the Prometheus scrape listener.
///
/// Call once, early in main, from inside the tokio runtime (the exporter
/// spawns its listener there).
pub fn init(metrics_addr: SocketAddr) -> Result<(), admission_aimd::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".into()), LATENCY_BUCKETS)?
        .install()?;

    info!(%metrics_addr, "prometheus exposition listening");
    Ok(())
}
