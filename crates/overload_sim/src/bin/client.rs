//! Rate-limited load generator.
//!
//! Worker tasks share one token bucket (rate = `CLIENT_RPS`, burst of the
//! same size) and hit the target with a per-request timeout. A timeout
//! abandons only this client's wait; whatever the request set in motion
//! downstream runs to completion there.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use governor::{Quota, RateLimiter};
use metrics::{counter, histogram};
use tracing::{info, warn};

use overload_sim::config::{ConfigError, env_or};
use overload_sim::telemetry;

#[tokio::main]
async fn main() -> Result<(), admission_aimd::Error> {
    dotenvy::dotenv().ok();

    let metrics_addr: SocketAddr = env_or("CLIENT_METRICS_ADDR", "127.0.0.1:9103".parse()?)?;
    let target: String = env_or("CLIENT_TARGET_URL", "http://127.0.0.1:7000".to_owned())?;
    let workers: usize = env_or("CLIENT_WORKERS", 10)?;
    let rps: u32 = env_or("CLIENT_RPS", 5)?;
    let timeout = Duration::from_millis(env_or("CLIENT_TIMEOUT_MS", 2_500)?);

    telemetry::init(metrics_addr)?;

    let rps = NonZeroU32::new(rps).ok_or_else(|| ConfigError::Invalid {
        key: "CLIENT_RPS".to_owned(),
        value: "0".to_owned(),
        reason: "must be positive".to_owned(),
    })?;
    let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    info!(
        %target,
        workers,
        rps = rps.get(),
        timeout_ms = timeout.as_millis() as u64,
        "starting load workers"
    );

    let mut generators = Vec::with_capacity(workers);
    for id in 0..workers {
        let limiter = Arc::clone(&limiter);
        let client = client.clone();
        let target = target.clone();
        generators.push(tokio::spawn(async move {
            loop {
                limiter.until_ready().await;
                fetch(id, &client, &target).await;
            }
        }));
    }
    future::join_all(generators).await;
    Ok(())
}

async fn fetch(worker: usize, client: &reqwest::Client, target: &str) {
    let began = Instant::now();

    let status = match client.get(target).send().await {
        Ok(response) => {
            let status = response.status();
            // Drain the body so the connection can be reused.
            let _ = response.bytes().await;
            info!(worker, status = status.as_u16(), took = ?began.elapsed(), "response");
            status.as_u16().to_string()
        }
        Err(err) => {
            warn!(worker, error = %err, "request failed");
            "error".to_owned()
        }
    };

    histogram!("client_request_duration_seconds").record(began.elapsed().as_secs_f64());
    counter!("client_requests_total", "status" => status).increment(1);
}
