//! End-to-end behavior of the layered admission gate over stub backends.

use std::fmt;
use std::future::{Ready, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use admission_aimd::{
    AdmissionControl, AdmissionControlLayer, AdmissionError, AdmissionSettings, ConcurrencyQuota,
    Outcome, OutcomeLogic,
};
use tower::{Service, ServiceBuilder, ServiceExt};

/// What the stub backend answers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Reply {
    Ok,
    Busy,
}

#[derive(Debug)]
struct ConnectionRefused;

impl fmt::Display for ConnectionRefused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection refused")
    }
}

impl std::error::Error for ConnectionRefused {}

/// Backend that replies instantly and counts how often it was reached.
#[derive(Clone)]
struct StubBackend {
    reply: Result<Reply, ()>,
    calls: Arc<AtomicUsize>,
}

impl Service<()> for StubBackend {
    type Response = Reply;
    type Error = ConnectionRefused;
    type Future = Ready<Result<Reply, ConnectionRefused>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _request: ()) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Ok(reply) => ready(Ok(reply)),
            Err(()) => ready(Err(ConnectionRefused)),
        }
    }
}

/// Backend whose calls never resolve, for holding slots open.
#[derive(Clone)]
struct StuckBackend;

impl Service<()> for StuckBackend {
    type Response = Reply;
    type Error = ConnectionRefused;
    type Future = futures::future::Pending<Result<Reply, ConnectionRefused>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _request: ()) -> Self::Future {
        futures::future::pending()
    }
}

#[derive(Clone, Copy)]
struct ReplyOutcomes;

impl OutcomeLogic for ReplyOutcomes {
    type Response = Reply;
    type Error = ConnectionRefused;

    fn classify_response(&self, reply: &Reply) -> Outcome {
        match reply {
            Reply::Ok => Outcome::Success,
            Reply::Busy => Outcome::Overload,
        }
    }
}

type Gate = AdmissionControl<StubBackend, ReplyOutcomes>;

fn gate(
    settings: AdmissionSettings,
    reply: Result<Reply, ()>,
) -> (Gate, Arc<ConcurrencyQuota>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let layer = AdmissionControlLayer::new(settings, ReplyOutcomes);
    let quota = layer.quota();
    let service = ServiceBuilder::new().layer(layer).service(StubBackend {
        reply,
        calls: Arc::clone(&calls),
    });
    (service, quota, calls)
}

#[tokio::test]
async fn denial_never_reaches_the_backend() {
    let settings = AdmissionSettings::builder().initial_ceiling(0).build();
    let (mut gate, _quota, calls) = gate(settings, Ok(Reply::Ok));

    let err = gate
        .ready()
        .await
        .expect("gate ready")
        .call(())
        .await
        .expect_err("quota of zero admits nothing");

    assert!(matches!(err, AdmissionError::Denied));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn denied_future_resolves_immediately() {
    let settings = AdmissionSettings::builder().initial_ceiling(0).build();
    let (mut gate, _quota, _calls) = gate(settings, Ok(Reply::Ok));

    let mut rejected = tokio_test::task::spawn(gate.call(()));
    match rejected.poll() {
        Poll::Ready(Err(AdmissionError::Denied)) => {}
        other => panic!("expected immediate denial, got {other:?}"),
    }
}

#[tokio::test]
async fn slot_is_released_after_success() {
    let settings = AdmissionSettings::builder().initial_ceiling(1).build();
    let (mut gate, quota, _calls) = gate(settings, Ok(Reply::Ok));

    for _ in 0..3 {
        let reply = gate
            .ready()
            .await
            .expect("gate ready")
            .call(())
            .await
            .expect("admitted call succeeds");
        assert_eq!(reply, Reply::Ok);
        assert_eq!(quota.used(), 0);
    }
}

#[tokio::test]
async fn slot_is_released_after_forward_error() {
    let settings = AdmissionSettings::builder()
        .initial_ceiling(4)
        .backoff_ratio(0.5)
        .build();
    let (mut gate, quota, _calls) = gate(settings, Err(()));

    let err = gate
        .ready()
        .await
        .expect("gate ready")
        .call(())
        .await
        .expect_err("backend refuses the connection");

    assert!(matches!(err, AdmissionError::Forward { .. }));
    assert_eq!(quota.used(), 0);
    // a transport failure is overload pressure
    assert_eq!(quota.ceiling(), 2);
}

#[tokio::test]
async fn overload_responses_collapse_the_ceiling() {
    let settings = AdmissionSettings::builder()
        .initial_ceiling(8)
        .backoff_ratio(0.5)
        .build();
    let (mut gate, quota, _calls) = gate(settings, Ok(Reply::Busy));

    let reply = gate
        .ready()
        .await
        .expect("gate ready")
        .call(())
        .await
        .expect("overload is a mirrored response, not a gate error");
    assert_eq!(reply, Reply::Busy);
    assert_eq!(quota.ceiling(), 4);

    gate.ready()
        .await
        .expect("gate ready")
        .call(())
        .await
        .expect("mirrored response");
    assert_eq!(quota.ceiling(), 2);
}

#[tokio::test]
async fn success_raises_at_most_once_per_interval() {
    let settings = AdmissionSettings::builder()
        .initial_ceiling(2)
        .raise_interval(Duration::from_secs(3_600))
        .build();
    let (mut gate, quota, _calls) = gate(settings, Ok(Reply::Ok));

    for _ in 0..5 {
        gate.ready()
            .await
            .expect("gate ready")
            .call(())
            .await
            .expect("admitted call succeeds");
    }
    assert_eq!(quota.ceiling(), 3);
}

#[tokio::test]
async fn static_ceiling_when_adaptive_is_off() {
    let settings = AdmissionSettings::builder()
        .initial_ceiling(5)
        .adaptive(false)
        .build();
    let (mut gate, quota, _calls) = gate(settings, Ok(Reply::Busy));

    for _ in 0..4 {
        gate.ready()
            .await
            .expect("gate ready")
            .call(())
            .await
            .expect("mirrored response");
    }
    assert_eq!(quota.ceiling(), 5);
}

#[tokio::test]
async fn in_flight_call_occupies_the_quota_until_dropped() {
    let settings = AdmissionSettings::builder().initial_ceiling(1).build();
    let layer = AdmissionControlLayer::new(settings, ReplyOutcomes);
    let quota = layer.quota();
    let gate = ServiceBuilder::new().layer(layer).service(StuckBackend);

    let mut first = gate.clone();
    let held = first.ready().await.expect("gate ready").call(());
    assert_eq!(quota.used(), 1);

    let mut second = gate.clone();
    let err = second
        .ready()
        .await
        .expect("gate ready")
        .call(())
        .await
        .expect_err("single slot is taken");
    assert!(matches!(err, AdmissionError::Denied));

    // The caller walks away: dropping the pending call must return the slot.
    drop(held);
    assert_eq!(quota.used(), 0);

    let mut third = gate.clone();
    let reclaimed = third.ready().await.expect("gate ready").call(());
    assert_eq!(quota.used(), 1);
    drop(reclaimed);
}
