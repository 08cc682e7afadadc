//! SurrealDB-backed implementation of [`crate::Queue`] (component C, §4.C).
//!
//! Shares the `queue_jobs` table and connection defined in `schema.rs` with
//! the repository, mirroring the teacher's ledger/CAS split over one
//! `SurrealHandle`. Lease acquisition is a single conditional `UPDATE`
//! rather than a read-then-write pair, so two workers racing on the same
//! row never both win the lease.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::sql::Thing;

use crate::schema::SurrealHandle;
use crate::storage_traits::{Queue, QueueLease};
use crate::RepositoryResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueJobRow {
    id: Thing,
    queue_name: String,
    job_id: String,
    payload: Value,
    attempts: u32,
    max_attempts: u32,
    leased_until: Option<DateTime<Utc>>,
    available_at: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
}

/// Queue broker implementation backed by a shared [`SurrealHandle`].
pub struct SurrealQueue {
    handle: SurrealHandle,
}

impl SurrealQueue {
    pub fn new(handle: SurrealHandle) -> Self {
        Self { handle }
    }

    fn row_key(queue_name: &str, job_id: &str) -> String {
        format!("{queue_name}::{job_id}")
    }
}

#[async_trait]
impl Queue for SurrealQueue {
    async fn enqueue(
        &self,
        queue_name: &str,
        job_id: &str,
        payload: Value,
        max_attempts: u32,
    ) -> RepositoryResult<bool> {
        let key = Self::row_key(queue_name, job_id);
        let now = Utc::now();
        let row = QueueJobRow {
            id: Thing::from(("queue_jobs", key.as_str())),
            queue_name: queue_name.to_string(),
            job_id: job_id.to_string(),
            payload,
            attempts: 0,
            max_attempts,
            leased_until: None,
            available_at: now,
            status: "pending".to_string(),
            created_at: now,
        };
        let existing: Option<QueueJobRow> = self
            .handle
            .db()
            .select(("queue_jobs", key.as_str()))
            .await?;
        if existing.is_some() {
            return Ok(false);
        }
        let created: Option<QueueJobRow> = self
            .handle
            .db()
            .create(("queue_jobs", key.as_str()))
            .content(row)
            .await?;
        Ok(created.is_some())
    }

    async fn lease_next(&self, queue_name: &str, lease_secs: i64) -> RepositoryResult<Option<QueueLease>> {
        let now = Utc::now();
        let leased_until = now + chrono::Duration::seconds(lease_secs);
        let mut result = self
            .handle
            .db()
            .query(
                "UPDATE queue_jobs SET status = 'leased', leased_until = $leased_until \
                 WHERE queue_name = $queue_name \
                   AND ((status = 'pending' AND available_at <= $now) \
                        OR (status = 'leased' AND leased_until <= $now)) \
                 ORDER BY created_at ASC LIMIT 1",
            )
            .bind(("queue_name", queue_name.to_string()))
            .bind(("now", now))
            .bind(("leased_until", leased_until))
            .await?;
        let rows: Vec<QueueJobRow> = result.take(0)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(QueueLease {
            row_key: row.id.id.to_raw(),
            queue_name: row.queue_name,
            job_id: row.job_id,
            payload: row.payload,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
        }))
    }

    async fn ack(&self, lease: &QueueLease) -> RepositoryResult<()> {
        let _: Option<QueueJobRow> = self
            .handle
            .db()
            .update(("queue_jobs", lease.row_key.as_str()))
            .merge(serde_json::json!({ "status": "done" }))
            .await?;
        Ok(())
    }

    async fn nack(&self, lease: &QueueLease, reason: &str, base_delay_secs: i64) -> RepositoryResult<()> {
        let attempts = lease.attempts + 1;
        if attempts >= lease.max_attempts {
            let _: Option<QueueJobRow> = self
                .handle
                .db()
                .update(("queue_jobs", lease.row_key.as_str()))
                .merge(serde_json::json!({
                    "status": "failed",
                    "attempts": attempts,
                }))
                .await?;
            tracing::warn!(
                job_id = %lease.job_id,
                queue = %lease.queue_name,
                attempts,
                reason,
                "job exhausted retries, marked terminally failed"
            );
            return Ok(());
        }
        let backoff_secs = base_delay_secs.saturating_mul(1i64 << attempts.min(16));
        let available_at = Utc::now() + chrono::Duration::seconds(backoff_secs);
        let _: Option<QueueJobRow> = self
            .handle
            .db()
            .update(("queue_jobs", lease.row_key.as_str()))
            .merge(serde_json::json!({
                "status": "pending",
                "attempts": attempts,
                "available_at": available_at,
                "leased_until": Option::<DateTime<Utc>>::None,
            }))
            .await?;
        Ok(())
    }

    async fn cancel_pending_matching(&self, needle: &str) -> RepositoryResult<u64> {
        let mut result = self
            .handle
            .db()
            .query(
                "DELETE queue_jobs WHERE status = 'pending' AND string::contains(job_id, $needle) RETURN BEFORE",
            )
            .bind(("needle", needle.to_string()))
            .await?;
        let removed: Vec<QueueJobRow> = result.take(0)?;
        Ok(removed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue() -> SurrealQueue {
        SurrealQueue::new(SurrealHandle::setup_db().await.unwrap())
    }

    #[tokio::test]
    async fn enqueue_then_lease_returns_the_job() {
        let q = queue().await;
        let created = q
            .enqueue("crawl", "crawl-d1", serde_json::json!({"digestId": "d1"}), 5)
            .await
            .unwrap();
        assert!(created);

        let leased = q.lease_next("crawl", 60).await.unwrap().expect("job available");
        assert_eq!(leased.job_id, "crawl-d1");
        assert_eq!(leased.attempts, 0);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_a_dedup_no_op() {
        let q = queue().await;
        let first = q
            .enqueue("crawl", "crawl-d1", serde_json::json!({}), 5)
            .await
            .unwrap();
        let second = q
            .enqueue("crawl", "crawl-d1", serde_json::json!({}), 5)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn a_leased_job_is_not_handed_to_a_second_worker() {
        let q = queue().await;
        q.enqueue("crawl", "crawl-d1", serde_json::json!({}), 5)
            .await
            .unwrap();
        let first = q.lease_next("crawl", 60).await.unwrap();
        assert!(first.is_some());
        let second = q.lease_next("crawl", 60).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn an_expired_lease_is_reclaimed_by_the_next_worker() {
        let q = queue().await;
        q.enqueue("crawl", "crawl-d1", serde_json::json!({}), 5)
            .await
            .unwrap();
        // A negative lease window sets leased_until in the past, simulating
        // a worker that crashed or was cancelled mid-stage without ack/nack.
        let first = q.lease_next("crawl", -1).await.unwrap();
        assert!(first.is_some());

        let reclaimed = q
            .lease_next("crawl", 60)
            .await
            .unwrap()
            .expect("expired lease should be reclaimed");
        assert_eq!(reclaimed.job_id, "crawl-d1");
    }

    #[tokio::test]
    async fn ack_marks_the_job_done() {
        let q = queue().await;
        q.enqueue("crawl", "crawl-d1", serde_json::json!({}), 5)
            .await
            .unwrap();
        let lease = q.lease_next("crawl", 60).await.unwrap().unwrap();
        q.ack(&lease).await.unwrap();
        // Done jobs never come back from lease_next, even with no lease window.
        assert!(q.lease_next("crawl", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_below_max_attempts_requeues_with_backoff() {
        let q = queue().await;
        q.enqueue("crawl", "crawl-d1", serde_json::json!({}), 3)
            .await
            .unwrap();
        let lease = q.lease_next("crawl", 60).await.unwrap().unwrap();
        q.nack(&lease, "transient timeout", 1).await.unwrap();
        // Requeued but not yet available (backoff in the future).
        assert!(q.lease_next("crawl", 60).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_at_max_attempts_terminally_fails_without_requeue() {
        let q = queue().await;
        q.enqueue("crawl", "crawl-d1", serde_json::json!({}), 1)
            .await
            .unwrap();
        let lease = q.lease_next("crawl", 60).await.unwrap().unwrap();
        q.nack(&lease, "fatal", 0).await.unwrap();
        assert!(q.lease_next("crawl", 60).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_pending_matching_removes_only_pending_rows_for_the_digest() {
        let q = queue().await;
        q.enqueue("analyze", "analyze-d1", serde_json::json!({}), 5)
            .await
            .unwrap();
        q.enqueue("analyze", "analyze-d2", serde_json::json!({}), 5)
            .await
            .unwrap();
        let removed = q.cancel_pending_matching("d1").await.unwrap();
        assert_eq!(removed, 1);
        assert!(q.lease_next("analyze", 60).await.unwrap().is_some());
    }
}
