//! Admission-controlling reverse proxy.
//!
//! Sits in front of the origin and bounds in-flight concurrency with a
//! quota. Denied requests are answered 429 without ever contacting the
//! origin; admitted requests mirror whatever the origin returned. With
//! `PROXY_ADAPTIVE=true` the ceiling follows the AIMD feedback loop,
//! otherwise it stays at `PROXY_CEILING`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use metrics::{counter, histogram};
use snafu::Snafu;
use tokio::net::TcpListener;
use tower::{Service, ServiceBuilder, ServiceExt};
use tracing::{debug, info};

use admission_aimd::http::{HttpOutcomes, UpstreamError};
use admission_aimd::reqwest_integration::ReqwestUpstream;
use admission_aimd::{AdmissionControl, AdmissionControlLayer, AdmissionError, AdmissionSettings};
use overload_sim::config::env_or;
use overload_sim::telemetry;

type Gate = AdmissionControl<ReqwestUpstream, HttpOutcomes>;

#[derive(Debug, Snafu)]
enum ProxyError {
    /// The inbound request could not be read or rebuilt for the origin.
    #[snafu(display("inbound request unusable"))]
    BadRequest,

    #[snafu(display("admission denied"))]
    Denied,

    #[snafu(display("forwarding failed: {source}"))]
    Upstream { source: UpstreamError },
}

#[tokio::main]
async fn main() -> Result<(), admission_aimd::Error> {
    dotenvy::dotenv().ok();

    let addr: SocketAddr = env_or("PROXY_ADDR", "127.0.0.1:7000".parse()?)?;
    let metrics_addr: SocketAddr = env_or("PROXY_METRICS_ADDR", "127.0.0.1:9101".parse()?)?;
    let origin: String = env_or("ORIGIN_URL", "http://127.0.0.1:8000".to_owned())?;
    let ceiling: i64 = env_or("PROXY_CEILING", 5)?;
    let adaptive: bool = env_or("PROXY_ADAPTIVE", false)?;
    let raise_step: i64 = env_or("PROXY_RAISE_STEP", 1)?;
    let raise_interval = Duration::from_millis(env_or("PROXY_RAISE_INTERVAL_MS", 1_000)?);
    let backoff_ratio: f64 = env_or("PROXY_BACKOFF_RATIO", 0.75)?;

    telemetry::init(metrics_addr)?;

    let settings = AdmissionSettings::builder()
        .initial_ceiling(ceiling)
        .increase_step(raise_step)
        .raise_interval(raise_interval)
        .backoff_ratio(backoff_ratio)
        .adaptive(adaptive)
        .build();
    let gate = ServiceBuilder::new()
        .layer(AdmissionControlLayer::new(settings, HttpOutcomes))
        .service(ReqwestUpstream::new(reqwest::Client::new()));

    info!(%addr, %origin, ceiling, adaptive, "proxy listening");

    let origin: Arc<str> = origin.into();
    let listener = TcpListener::bind(addr).await?;
    loop {
        let (stream, peer) = listener.accept().await?;
        let gate = gate.clone();
        let origin = Arc::clone(&origin);
        tokio::spawn(async move {
            let served = http1::Builder::new()
                .serve_connection(
                    TokioIo::new(stream),
                    service_fn(move |request| handle(gate.clone(), Arc::clone(&origin), request)),
                )
                .await;
            if let Err(err) = served {
                debug!(%peer, error = %err, "connection closed with error");
            }
        });
    }
}

async fn handle(
    mut gate: Gate,
    origin: Arc<str>,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let began = Instant::now();

    let (status, body) = match proxy_request(&mut gate, &origin, request).await {
        Ok((status, bytes)) => (status, bytes),
        Err(ProxyError::BadRequest) => {
            (StatusCode::BAD_REQUEST, Bytes::from_static(b"bad request\n"))
        }
        Err(ProxyError::Denied) => (
            StatusCode::TOO_MANY_REQUESTS,
            Bytes::from_static(b"denied\n"),
        ),
        Err(ProxyError::Upstream { source }) => {
            debug!(error = %source, "forwarding failed");
            (StatusCode::BAD_GATEWAY, Bytes::from_static(b"bad gateway\n"))
        }
    };

    let took = began.elapsed();
    histogram!("proxy_request_duration_seconds").record(took.as_secs_f64());
    counter!("proxy_requests_total", "status" => status.as_u16().to_string()).increment(1);
    debug!(status = status.as_u16(), took = ?took, "request served");

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    Ok(response)
}

/// Rebuilds the inbound request against the origin and pushes it through the
/// admission gate.
async fn proxy_request(
    gate: &mut Gate,
    origin: &str,
    request: Request<Incoming>,
) -> Result<(StatusCode, Bytes), ProxyError> {
    let (parts, body) = request.into_parts();
    let target = match parts.uri.path_and_query() {
        Some(path_and_query) => format!("{origin}{path_and_query}"),
        None => format!("{origin}/"),
    };
    let inbound = body
        .collect()
        .await
        .map_err(|_| ProxyError::BadRequest)?
        .to_bytes();

    let mut upstream = http::Request::builder()
        .method(parts.method.clone())
        .uri(target);
    for (name, value) in parts.headers.iter() {
        // The origin derives its own host header from the target URL.
        if name != http::header::HOST {
            upstream = upstream.header(name, value);
        }
    }
    let upstream = upstream
        .body(if inbound.is_empty() {
            None
        } else {
            Some(reqwest::Body::from(inbound))
        })
        .map_err(|_| ProxyError::BadRequest)?;

    let forwarded = match gate.ready().await {
        Ok(gate) => gate.call(upstream).await,
        Err(err) => Err(err),
    };

    match forwarded {
        Ok(response) => {
            let status = response.status();
            // A body that dies mid-read still mirrors the status it came with.
            let bytes = response.bytes().await.unwrap_or_default();
            Ok((status, bytes))
        }
        Err(AdmissionError::Denied) => Err(ProxyError::Denied),
        Err(AdmissionError::Forward { source }) => Err(ProxyError::Upstream { source }),
    }
}
