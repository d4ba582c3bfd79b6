//! Finite-capacity origin server.
//!
//! N workers drain a bounded FIFO queue; a request whose job does not fit in
//! the queue gets 429 immediately instead of queuing without bound. With the
//! defaults (7 workers, 1s mean service time) the sustainable rate per
//! Little's law is 7 req/s.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use metrics::{counter, histogram};
use tokio::net::TcpListener;
use tracing::{debug, info};

use overload_sim::config::env_or;
use overload_sim::pool::{QueueFull, WorkerPool};
use overload_sim::service_time::NormalServiceTime;
use overload_sim::telemetry;

#[tokio::main]
async fn main() -> Result<(), admission_aimd::Error> {
    dotenvy::dotenv().ok();

    let addr: SocketAddr = env_or("ORIGIN_ADDR", "127.0.0.1:8000".parse()?)?;
    let metrics_addr: SocketAddr = env_or("ORIGIN_METRICS_ADDR", "127.0.0.1:9102".parse()?)?;
    let workers: usize = env_or("ORIGIN_WORKERS", 7)?;
    let worktime = Duration::from_millis(env_or("ORIGIN_WORKTIME_MS", 1_000)?);
    let jitter = Duration::from_millis(env_or("ORIGIN_WORKTIME_JITTER_MS", 10)?);
    let queue: usize = env_or("ORIGIN_QUEUE", 100)?;

    telemetry::init(metrics_addr)?;

    let service_time = NormalServiceTime::new(worktime, jitter)?;
    let pool = Arc::new(WorkerPool::start(workers, queue, service_time));
    info!(
        %addr,
        workers,
        queue,
        worktime_ms = worktime.as_millis() as u64,
        "origin listening"
    );

    let listener = TcpListener::bind(addr).await?;
    loop {
        let (stream, peer) = listener.accept().await?;
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let served = http1::Builder::new()
                .serve_connection(
                    TokioIo::new(stream),
                    service_fn(move |request| handle(Arc::clone(&pool), request)),
                )
                .await;
            if let Err(err) = served {
                debug!(%peer, error = %err, "connection closed with error");
            }
        });
    }
}

async fn handle(
    pool: Arc<WorkerPool>,
    _request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let began = Instant::now();

    let (status, body) = match pool.submit() {
        Ok(done) => match done.await {
            Ok(()) => (StatusCode::OK, "ok\n"),
            // Worker task vanished mid-job; should not happen in practice.
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "lost worker\n"),
        },
        Err(QueueFull) => (StatusCode::TOO_MANY_REQUESTS, "overloaded\n"),
    };

    let took = began.elapsed();
    histogram!("origin_request_duration_seconds").record(took.as_secs_f64());
    counter!("origin_requests_total", "status" => status.as_u16().to_string()).increment(1);
    debug!(status = status.as_u16(), took = ?took, "request served");

    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    Ok(response)
}
