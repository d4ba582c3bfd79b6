//! Bounded worker pool draining a FIFO job queue.
//!
//! Models a backend with hard capacity: N workers, a queue of at most C
//! waiting jobs, and immediate rejection beyond that instead of unbounded
//! queuing. Rejection is the pool's only failure mode; nothing is retried.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use snafu::Snafu;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::debug;

use crate::service_time::ServiceTime;

/// The queue already holds its maximum number of jobs.
#[derive(Debug, Snafu)]
#[snafu(display("job queue is full"))]
pub struct QueueFull;

/// Unit of work: burn the simulated service time, then signal completion.
#[derive(Debug)]
struct Job {
    completed: oneshot::Sender<()>,
}

/// Fixed set of workers pulling from one bounded FIFO queue.
///
/// Dropping the pool closes the queue and lets the workers drain what is
/// left before exiting.
pub struct WorkerPool {
    jobs: mpsc::Sender<Job>,
}

impl WorkerPool {
    /// Spawns `workers` tasks draining a queue of at most `queue` jobs
    /// (clamped to 1: the channel has no zero-capacity mode).
    pub fn start(workers: usize, queue: usize, service_time: impl ServiceTime) -> Self {
        let (jobs, feed) = mpsc::channel(queue.max(1));
        let feed = Arc::new(Mutex::new(feed));
        let service_time: Arc<dyn ServiceTime> = Arc::new(service_time);
        for id in 0..workers {
            tokio::spawn(Self::worker(
                id,
                Arc::clone(&feed),
                Arc::clone(&service_time),
            ));
        }
        Self { jobs }
    }

    /// Non-blocking admission: the job is either queued now or rejected now.
    ///
    /// The returned receiver fires when a worker finishes the job. There is
    /// no internal wait deadline; a caller that stops waiting abandons only
    /// its receiver, the job itself still runs to completion and occupies
    /// its worker until then.
    pub fn submit(&self) -> Result<oneshot::Receiver<()>, QueueFull> {
        let (completed, done) = oneshot::channel();
        self.jobs
            .try_send(Job { completed })
            .map_err(|_| QueueFull)?;
        Ok(done)
    }

    async fn worker(id: usize, feed: Arc<Mutex<mpsc::Receiver<Job>>>, service_time: Arc<dyn ServiceTime>) {
        loop {
            // Hold the lock only for the dequeue, never across the work.
            let job = { feed.lock().await.recv().await };
            let Some(job) = job else {
                debug!(worker = id, "queue closed, worker exiting");
                return;
            };

            let began = Instant::now();
            tokio::time::sleep(service_time.sample()).await;

            // The submitter may have stopped waiting; the capacity is spent
            // either way.
            let _ = job.completed.send(());

            let took = began.elapsed();
            histogram!("origin_job_duration_seconds").record(took.as_secs_f64());
            debug!(worker = id, took = ?took, "job completed");
        }
    }
}
