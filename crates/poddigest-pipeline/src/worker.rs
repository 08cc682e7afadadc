//! Generic stage worker harness.
//!
//! Each pipeline stage gets one `Worker<H>` bound to its queue name and a
//! [`JobHandler`] closing over that stage's logic. `spawn_pool` fans a
//! worker out into `count` polling loops sharing one `Arc<Queue>`, the same
//! spawn-a-`Vec<JoinHandle<_>>`-then-let-them-run shape as the teacher's
//! `fork_agent_parallel`, except these loops run until cancelled rather than
//! joining on a fixed batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use poddigest_state::Queue;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Stage-specific work, invoked once per leased job. `Err` nacks the job
/// (the queue applies backoff and, once attempts are exhausted, terminal
/// failure); `Ok` acks it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> anyhow::Result<()>;
}

pub struct Worker<Q: Queue, H: JobHandler> {
    queue: Arc<Q>,
    handler: Arc<H>,
    queue_name: String,
    lease_secs: i64,
    base_delay_secs: i64,
    poll_interval: Duration,
}

impl<Q: Queue + 'static, H: JobHandler + 'static> Worker<Q, H> {
    pub fn new(queue: Arc<Q>, handler: Arc<H>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            handler,
            queue_name: queue_name.into(),
            lease_secs: 300,
            base_delay_secs: 5,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_lease_secs(mut self, lease_secs: i64) -> Self {
        self.lease_secs = lease_secs;
        self
    }

    pub fn with_base_delay_secs(mut self, base_delay_secs: i64) -> Self {
        self.base_delay_secs = base_delay_secs;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Lease and process at most one job. Returns `true` if a job was
    /// found (whether it succeeded or was nacked), `false` if the queue
    /// had nothing available.
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        let Some(lease) = self.queue.lease_next(&self.queue_name, self.lease_secs).await? else {
            return Ok(false);
        };

        debug!(queue = %self.queue_name, job_id = %lease.job_id, "leased job");
        match self.handler.handle(lease.payload.clone()).await {
            Ok(()) => {
                self.queue.ack(&lease).await?;
                debug!(queue = %self.queue_name, job_id = %lease.job_id, "acked job");
            }
            Err(e) => {
                warn!(queue = %self.queue_name, job_id = %lease.job_id, error = %e, "job failed, nacking");
                self.queue
                    .nack(&lease, &e.to_string(), self.base_delay_secs)
                    .await?;
            }
        }
        Ok(true)
    }

    /// Poll `queue_name` forever: lease, dispatch, ack/nack, repeat. Sleeps
    /// `poll_interval` whenever the queue is empty so idle workers don't
    /// spin.
    pub async fn run_loop(self: Arc<Self>) {
        info!(queue = %self.queue_name, "worker loop starting");
        loop {
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    error!(queue = %self.queue_name, error = %e, "worker loop error, backing off");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Spawn `count` independent polling loops against this worker's
    /// queue, all sharing the same `Arc<Queue>` connection.
    pub fn spawn_pool(self: Arc<Self>, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|_| {
                let worker = Arc::clone(&self);
                tokio::spawn(async move { worker.run_loop().await })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poddigest_state::{SurrealHandle, SurrealQueue};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    struct CountingHandler {
        calls: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _payload: Value) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                anyhow::bail!("synthetic failure {n}");
            }
            Ok(())
        }
    }

    struct RecordingHandler {
        seen: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, payload: Value) -> anyhow::Result<()> {
            self.seen.lock().await.push(payload);
            Ok(())
        }
    }

    async fn queue() -> Arc<SurrealQueue> {
        Arc::new(SurrealQueue::new(SurrealHandle::setup_db().await.unwrap()))
    }

    #[tokio::test]
    async fn run_once_returns_false_on_an_empty_queue() {
        let q = queue().await;
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
        });
        let worker = Worker::new(q, handler, "empty-queue");
        assert!(!worker.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn run_once_dispatches_a_leased_job_and_acks_on_success() {
        let q = queue().await;
        q.enqueue("ingest", "job-1", serde_json::json!({"user": "u1"}), 3)
            .await
            .unwrap();
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
        });
        let worker = Worker::new(q, handler.clone(), "ingest");
        assert!(worker.run_once().await.unwrap());
        assert_eq!(handler.seen.lock().await.len(), 1);
        // acked, so a second poll finds nothing left.
        assert!(!worker.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn a_failing_handler_nacks_and_the_job_becomes_available_again_after_backoff() {
        let q = queue().await;
        q.enqueue("narrate", "job-2", serde_json::json!({}), 3)
            .await
            .unwrap();
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_first_n: 1,
        });
        let worker = Worker::new(q.clone(), handler.clone(), "narrate")
            .with_base_delay_secs(0);
        assert!(worker.run_once().await.unwrap());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        // immediately available again since base_delay_secs is 0.
        assert!(worker.run_once().await.unwrap());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }
}
