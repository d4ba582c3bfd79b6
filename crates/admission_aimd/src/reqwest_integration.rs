//! `tower::Service` adapter over a shared `reqwest::Client`.

use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::Request as HttpRequest;
use tower::Service;
use tracing::warn;

use crate::http::UpstreamError;

/// Executes `http::Request`s on a `reqwest::Client`.
///
/// Statuses pass through untouched: a 429 or 503 from the upstream is a
/// *response* here, not an error, because the gate mirrors whatever the
/// upstream answered and classifies it separately. Only transport-level
/// failures surface as [`UpstreamError`].
#[derive(Clone, Debug)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Service<HttpRequest<Option<reqwest::Body>>> for ReqwestUpstream {
    type Response = reqwest::Response;
    type Error = UpstreamError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: HttpRequest<Option<reqwest::Body>>) -> Self::Future {
        let (parts, body) = request.into_parts();

        let url = match reqwest::Url::parse(&parts.uri.to_string()) {
            Ok(url) => url,
            Err(err) => {
                let error = UpstreamError::InvalidRequest {
                    details: format!("unparseable URI {}: {err}", parts.uri),
                };
                return Box::pin(async move { Err(error) });
            }
        };

        let mut builder = self.client.request(parts.method, url);
        for (name, value) in parts.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let pending = builder.send();
        Box::pin(async move {
            pending.await.map_err(|err| {
                if err.is_timeout() {
                    warn!(error = %err, "upstream call timed out");
                    UpstreamError::Timeout { source: err }
                } else {
                    warn!(error = %err, "upstream call failed");
                    UpstreamError::Transport { source: err }
                }
            })
        })
    }
}
