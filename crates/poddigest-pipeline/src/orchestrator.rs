//! Pipeline orchestrator (component J, §4.J).
//!
//! Owns every `Digest.status` write except the terminal `completed`
//! transition, which belongs to the deliverer's success path. Stage
//! workers call `enter_stage`/`advance`/`fail` around their own work; the
//! orchestrator never runs a stage itself, only sequences and retries
//! them, mirroring the teacher's separation between a run's ledger writer
//! and the agents that actually do the work.

use chrono::{DateTime, Datelike, Timelike, Utc};
use poddigest_domain::{
    emit_digest_triggered, ConfigId, Digest, DigestConfig, DigestId, DigestStatus, StageFailureKind,
    UserId,
};
use poddigest_state::{Queue, Repository, RepositoryError, RepositoryResult};
use tracing::{info, instrument, warn};

pub const QUEUE_INGEST: &str = "crawl";
pub const QUEUE_TRANSCRIBE: &str = "transcribe";
pub const QUEUE_ANALYZE: &str = "analyze";
pub const QUEUE_NARRATE: &str = "narrate";
pub const QUEUE_ASSEMBLE: &str = "assemble";
pub const QUEUE_DELIVER: &str = "deliver";

/// The fixed stage order, paired with the in-progress status each queue's
/// worker enters on pickup.
const STAGE_ORDER: &[(&str, DigestStatus)] = &[
    (QUEUE_INGEST, DigestStatus::Crawling),
    (QUEUE_TRANSCRIBE, DigestStatus::Transcribing),
    (QUEUE_ANALYZE, DigestStatus::Analyzing),
    (QUEUE_NARRATE, DigestStatus::Narrating),
    (QUEUE_ASSEMBLE, DigestStatus::Assembling),
    (QUEUE_DELIVER, DigestStatus::Delivering),
];

/// The queue name that follows `queue_name` in the pipeline, or `None`
/// after the deliverer.
pub fn next_queue_after(queue_name: &str) -> Option<&'static str> {
    let idx = STAGE_ORDER.iter().position(|(q, _)| *q == queue_name)?;
    STAGE_ORDER.get(idx + 1).map(|(q, _)| *q)
}

/// The in-progress status a worker on `queue_name` should enter on pickup.
pub fn status_for_queue(queue_name: &str) -> Option<DigestStatus> {
    STAGE_ORDER
        .iter()
        .find(|(q, _)| *q == queue_name)
        .map(|(_, status)| *status)
}

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

pub struct Orchestrator<R: Repository, Q: Queue> {
    repo: std::sync::Arc<R>,
    queue: std::sync::Arc<Q>,
}

impl<R: Repository, Q: Queue> Orchestrator<R, Q> {
    pub fn new(repo: std::sync::Arc<R>, queue: std::sync::Arc<Q>) -> Self {
        Self { repo, queue }
    }

    /// Create a new digest for `(user_id, config_id)` covering the last
    /// seven days and enqueue its first stage.
    #[instrument(skip(self))]
    pub async fn trigger(&self, user_id: UserId, config_id: ConfigId) -> RepositoryResult<DigestId> {
        let now = Utc::now();
        let week_start = now - chrono::Duration::days(7);
        let digest = Digest::new_pending(
            user_id,
            config_id,
            "Weekly Digest".to_string(),
            week_start,
            now,
        );
        let created = self.repo.create_digest(&digest).await?;

        emit_digest_triggered(&created.id.to_string(), &user_id.to_string(), &config_id.to_string());
        self.queue
            .enqueue(
                QUEUE_INGEST,
                &format!("{QUEUE_INGEST}-{}", created.id),
                serde_json::json!({ "digestId": created.id.to_string() }),
                DEFAULT_MAX_ATTEMPTS,
            )
            .await?;
        Ok(created.id)
    }

    /// One hourly cron tick: trigger every active config whose delivery
    /// day/hour/minute match `now` (UTC) and that has no digest already
    /// covering this week (§4.J, §9 "delivery scheduling is evaluated in
    /// UTC").
    #[instrument(skip(self))]
    pub async fn run_cron_tick(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<DigestId>> {
        let configs = self.repo.list_active_configs().await?;
        let mut triggered = Vec::new();
        for config in configs {
            if !is_due(&config, now) {
                continue;
            }
            let week_start = now - chrono::Duration::days(7);
            if self
                .repo
                .find_digest_by_config_and_week(config.id, week_start)
                .await?
                .is_some()
            {
                continue;
            }
            match self.trigger(config.user_id, config.id).await {
                Ok(id) => triggered.push(id),
                Err(e) => warn!(config_id = %config.id, error = %e, "trigger failed during cron tick"),
            }
        }
        Ok(triggered)
    }

    /// Set the in-progress status for entering `queue_name`'s stage,
    /// guarded by optimistic concurrency. No-op if the digest has already
    /// moved past this stage (a redelivered job replaying after its
    /// consumer crashed post-advance).
    #[instrument(skip(self))]
    pub async fn enter_stage(&self, digest_id: DigestId, queue_name: &str) -> RepositoryResult<()> {
        let Some(target) = status_for_queue(queue_name) else {
            return Ok(());
        };
        let digest = self.repo.find_digest_for_update(digest_id).await?;
        if digest.status == target || !digest.status.can_transition_to(target) {
            return Ok(());
        }
        self.repo
            .set_digest_status(digest_id, digest.version, target, None)
            .await?;
        poddigest_domain::emit_stage_entered(&digest_id.to_string(), status_label(target));
        Ok(())
    }

    /// Advance from `current_queue` to the next stage's queue, using a
    /// dedup job id of `{nextQueue}-{digestId}` so a redelivered job can't
    /// double-enqueue the next stage.
    #[instrument(skip(self, payload))]
    pub async fn advance(
        &self,
        digest_id: DigestId,
        current_queue: &str,
        payload: serde_json::Value,
    ) -> RepositoryResult<()> {
        let Some(next) = next_queue_after(current_queue) else {
            return Ok(());
        };
        self.queue
            .enqueue(next, &format!("{next}-{digest_id}"), payload, DEFAULT_MAX_ATTEMPTS)
            .await?;
        poddigest_domain::emit_stage_advanced(&digest_id.to_string(), current_queue, next);
        Ok(())
    }

    /// Fail the digest outright with one of the closed stage-failure kinds
    ///. Any non-terminal status may transition to `failed`.
    #[instrument(skip(self))]
    pub async fn fail(&self, digest_id: DigestId, kind: StageFailureKind, message: &str) -> RepositoryResult<()> {
        let digest = self.repo.find_digest_for_update(digest_id).await?;
        if digest.status.is_terminal() {
            return Ok(());
        }
        let error = format!("{kind}: {message}");
        poddigest_domain::emit_digest_failed(&digest_id.to_string(), kind.as_str(), &error);
        self.repo
            .set_digest_status(digest_id, digest.version, DigestStatus::Failed, Some(error))
            .await?;
        Ok(())
    }

    /// Mark the digest `completed`. Only the deliverer's success path may
    /// call this.
    #[instrument(skip(self))]
    pub async fn complete(&self, digest_id: DigestId) -> RepositoryResult<()> {
        let digest = self.repo.find_digest_for_update(digest_id).await?;
        if digest.status.is_terminal() {
            return Ok(());
        }
        self.repo
            .set_digest_status(digest_id, digest.version, DigestStatus::Completed, None)
            .await?;
        if let (Some(total_duration_sec), clip_count) = (digest.total_duration_sec, digest.clip_count) {
            poddigest_domain::emit_digest_completed(&digest_id.to_string(), total_duration_sec, clip_count);
        }
        Ok(())
    }

    /// Retry a `failed` digest from the top: reset to `pending` and
    /// re-enqueue the first stage under a fresh job id so the queue's dedup
    /// doesn't collapse it into the original (now-exhausted) attempt
    ///.
    #[instrument(skip(self))]
    pub async fn retry(&self, digest_id: DigestId) -> RepositoryResult<()> {
        let digest = self.repo.find_digest_for_update(digest_id).await?;
        if digest.status != DigestStatus::Failed {
            return Err(RepositoryError::Query(format!(
                "digest {digest_id} is not failed, cannot retry (status = {:?})",
                digest.status
            )));
        }
        self.repo
            .set_digest_status(digest_id, digest.version, DigestStatus::Pending, None)
            .await?;
        let nonce = uuid::Uuid::new_v4();
        self.queue
            .enqueue(
                QUEUE_INGEST,
                &format!("{QUEUE_INGEST}-retry-{digest_id}-{nonce}"),
                serde_json::json!({ "digestId": digest_id.to_string() }),
                DEFAULT_MAX_ATTEMPTS,
            )
            .await?;
        info!(digest_id = %digest_id, "digest retried from pending");
        Ok(())
    }

    /// Cancel a digest that has not yet reached a terminal state: strip
    /// any still-pending next-stage jobs and fail it with `"cancelled"`
    ///. Rejected if already `completed` or `failed`.
    #[instrument(skip(self))]
    pub async fn cancel(&self, digest_id: DigestId) -> RepositoryResult<()> {
        let digest = self.repo.find_digest_for_update(digest_id).await?;
        if digest.status.is_terminal() {
            return Err(RepositoryError::Query(format!(
                "digest {digest_id} is already terminal (status = {:?}), cannot cancel",
                digest.status
            )));
        }
        self.queue.cancel_pending_matching(&digest_id.to_string()).await?;
        self.repo
            .set_digest_status(
                digest_id,
                digest.version,
                DigestStatus::Failed,
                Some("cancelled".to_string()),
            )
            .await?;
        Ok(())
    }
}

/// Whether `config`'s weekly delivery slot matches `now`, compared in UTC
/// (§9 resolves the "which timezone" open question in the config's
/// favor: `delivery_day`/`delivery_hour_utc`/`delivery_minute_utc` are
/// already UTC fields, so no conversion happens here).
fn is_due(config: &DigestConfig, now: DateTime<Utc>) -> bool {
    let weekday_iso = now.weekday().number_from_monday() as u8;
    weekday_iso == config.delivery_day
        && now.hour() as u8 == config.delivery_hour_utc
        && now.minute() as u8 == config.delivery_minute_utc
}

fn status_label(status: DigestStatus) -> &'static str {
    match status {
        DigestStatus::Pending => "pending",
        DigestStatus::Crawling => "crawling",
        DigestStatus::Transcribing => "transcribing",
        DigestStatus::Analyzing => "analyzing",
        DigestStatus::Narrating => "narrating",
        DigestStatus::Assembling => "assembling",
        DigestStatus::Delivering => "delivering",
        DigestStatus::Completed => "completed",
        DigestStatus::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poddigest_domain::{ClipLengthPreference, NarrationDepth, Structure, TargetLengthMinutes, TransitionStyle};
    use poddigest_state::{SurrealHandle, SurrealQueue, SurrealRepository};

    fn config(user_id: UserId, day: u8, hour: u8, minute: u8) -> DigestConfig {
        DigestConfig {
            id: ConfigId::new(),
            user_id,
            target_length_minutes: TargetLengthMinutes::Sixty,
            clip_length_preference: ClipLengthPreference::Medium,
            structure: Structure::ByScore,
            breadth_depth: 50,
            voice_id: "voice-1".to_string(),
            narration_depth: NarrationDepth::Standard,
            music_style: None,
            transition_style: TransitionStyle::Silence,
            delivery_day: day,
            delivery_hour_utc: hour,
            delivery_minute_utc: minute,
            delivery_method: poddigest_domain::DeliveryMethod::Syndication,
            is_active: true,
        }
    }

    async fn orchestrator() -> Orchestrator<SurrealRepository, SurrealQueue> {
        let handle = SurrealHandle::setup_db().await.unwrap();
        Orchestrator::new(
            std::sync::Arc::new(SurrealRepository::new(handle.clone())),
            std::sync::Arc::new(SurrealQueue::new(handle)),
        )
    }

    #[test]
    fn next_queue_follows_the_fixed_stage_order() {
        assert_eq!(next_queue_after(QUEUE_INGEST), Some(QUEUE_TRANSCRIBE));
        assert_eq!(next_queue_after(QUEUE_ASSEMBLE), Some(QUEUE_DELIVER));
        assert_eq!(next_queue_after(QUEUE_DELIVER), None);
    }

    #[test]
    fn is_due_matches_day_hour_and_minute_exactly() {
        let cfg = config(UserId::new(), 3, 9, 30);
        // 2026-07-29 is a Wednesday (ISO weekday 3).
        let wednesday = chrono::DateTime::parse_from_rfc3339("2026-07-29T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(wednesday.weekday().number_from_monday(), 3);
        assert!(is_due(&cfg, wednesday));
    }

    #[test]
    fn is_due_rejects_a_mismatched_minute() {
        let cfg = config(UserId::new(), 3, 9, 30);
        let off_by_one_minute = chrono::DateTime::parse_from_rfc3339("2026-07-29T09:31:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!is_due(&cfg, off_by_one_minute));
    }

    #[tokio::test]
    async fn trigger_creates_a_pending_digest_and_enqueues_crawl() {
        let orch = orchestrator().await;
        let user_id = UserId::new();
        let config_id = ConfigId::new();
        let digest_id = orch.trigger(user_id, config_id).await.unwrap();

        let lease = orch
            .queue
            .lease_next(QUEUE_INGEST, 60)
            .await
            .unwrap()
            .expect("crawl job enqueued");
        assert_eq!(lease.job_id, format!("{QUEUE_INGEST}-{digest_id}"));
    }

    #[tokio::test]
    async fn advance_enqueues_the_next_stage_with_a_dedup_job_id() {
        let orch = orchestrator().await;
        let digest_id = orch.trigger(UserId::new(), ConfigId::new()).await.unwrap();
        orch.advance(digest_id, QUEUE_INGEST, serde_json::json!({})).await.unwrap();

        let lease = orch
            .queue
            .lease_next(QUEUE_TRANSCRIBE, 60)
            .await
            .unwrap()
            .expect("transcribe job enqueued");
        assert_eq!(lease.job_id, format!("{QUEUE_TRANSCRIBE}-{digest_id}"));
    }

    #[tokio::test]
    async fn fail_transitions_to_failed_with_the_kind_prefixed_message() {
        let orch = orchestrator().await;
        let digest_id = orch.trigger(UserId::new(), ConfigId::new()).await.unwrap();
        orch.fail(digest_id, StageFailureKind::NoEpisodes, "no new episodes")
            .await
            .unwrap();

        let digest = orch.repo.get_digest(digest_id).await.unwrap();
        assert_eq!(digest.status, DigestStatus::Failed);
        assert!(digest.error.unwrap().starts_with("no-episodes"));
    }

    #[tokio::test]
    async fn retry_resets_a_failed_digest_to_pending_and_requeues() {
        let orch = orchestrator().await;
        let digest_id = orch.trigger(UserId::new(), ConfigId::new()).await.unwrap();
        orch.fail(digest_id, StageFailureKind::NoEpisodes, "no new episodes")
            .await
            .unwrap();

        orch.retry(digest_id).await.unwrap();
        let digest = orch.repo.get_digest(digest_id).await.unwrap();
        assert_eq!(digest.status, DigestStatus::Pending);
    }

    #[tokio::test]
    async fn retry_rejects_a_digest_that_is_not_failed() {
        let orch = orchestrator().await;
        let digest_id = orch.trigger(UserId::new(), ConfigId::new()).await.unwrap();
        assert!(orch.retry(digest_id).await.is_err());
    }

    #[tokio::test]
    async fn cancel_strips_pending_jobs_and_fails_the_digest() {
        let orch = orchestrator().await;
        let digest_id = orch.trigger(UserId::new(), ConfigId::new()).await.unwrap();
        orch.advance(digest_id, QUEUE_INGEST, serde_json::json!({})).await.unwrap();

        orch.cancel(digest_id).await.unwrap();
        let digest = orch.repo.get_digest(digest_id).await.unwrap();
        assert_eq!(digest.status, DigestStatus::Failed);
        assert_eq!(digest.error.as_deref(), Some("cancelled"));
        assert!(orch.queue.lease_next(QUEUE_TRANSCRIBE, 60).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_rejects_an_already_terminal_digest() {
        let orch = orchestrator().await;
        let digest_id = orch.trigger(UserId::new(), ConfigId::new()).await.unwrap();
        orch.fail(digest_id, StageFailureKind::NoEpisodes, "x").await.unwrap();
        assert!(orch.cancel(digest_id).await.is_err());
    }
}
