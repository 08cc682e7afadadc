//! Storage trait definitions for PodDigest.
//!
//! These traits define the core persistence abstractions:
//! - `ObjectStore`: content storage for audio/artwork (component A)
//! - `Repository`: the typed CRUD surface over the §3 data model
//!   (component B), backed by SurrealDB in [`crate::repository`]
//! - `Queue`: the durable named FIFO job queue (component C), backed by
//!   SurrealDB in [`crate::queue`]
//!
//! All three are async and backend-agnostic so stages in
//! `poddigest-pipeline` can be unit-tested against fakes without a real
//! database or filesystem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poddigest_domain::{
    Chapter, ClipId, ConfigId, Digest, DigestClip, DigestConfig, DigestId, DigestStatus, Episode,
    EpisodeId, FeedbackTag, Podcast, PodcastId, Subscription, Transcript, UserId,
};
use serde_json::Value;

use crate::error::{ObjectStoreResult, RepositoryResult};

/// Content store for rendered digest audio and narration clips.
///
/// Guarantees:
/// - `put` is idempotent: writing the same key twice overwrites it.
/// - `get` returns `ObjectStoreError::NotFound` for an absent key.
/// - `public_url` is a pure function of the key (no I/O) so callers can
///   build RSS enclosures without a round trip.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key` with the given content type.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> ObjectStoreResult<()>;

    /// Retrieve the bytes stored under `key`.
    async fn get(&self, key: &str) -> ObjectStoreResult<Vec<u8>>;

    /// Check whether `key` exists without fetching its contents.
    async fn head(&self, key: &str) -> ObjectStoreResult<bool>;

    /// Delete `key`. No-op if absent.
    async fn delete(&self, key: &str) -> ObjectStoreResult<()>;

    /// The public (CDN-fronted) URL for `key`.
    fn public_url(&self, key: &str) -> String;
}

/// The repository's typed CRUD surface, covering every operation each
/// pipeline stage needs.
#[async_trait]
pub trait Repository: Send + Sync {
    // ---- Podcasts -----------------------------------------------------
    async fn upsert_podcast(&self, podcast: &Podcast) -> RepositoryResult<Podcast>;
    async fn get_podcast(&self, id: PodcastId) -> RepositoryResult<Podcast>;
    async fn find_podcast_by_feed_url(&self, feed_url: &str) -> RepositoryResult<Option<Podcast>>;
    async fn mark_podcast_crawled(&self, id: PodcastId, at: DateTime<Utc>) -> RepositoryResult<()>;

    // ---- Subscriptions --------------------------------------------------
    async fn upsert_subscription(&self, sub: &Subscription) -> RepositoryResult<Subscription>;
    async fn list_active_subscriptions(&self, user_id: UserId)
        -> RepositoryResult<Vec<Subscription>>;

    // ---- Episodes -------------------------------------------------------
    async fn upsert_episode(&self, episode: &Episode) -> RepositoryResult<Episode>;
    async fn get_episode(&self, id: EpisodeId) -> RepositoryResult<Episode>;
    async fn find_episode_by_guid(
        &self,
        podcast_id: PodcastId,
        guid: &str,
    ) -> RepositoryResult<Option<Episode>>;
    async fn list_recent_episodes(
        &self,
        podcast_id: PodcastId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<Episode>>;

    // ---- Transcripts ----------------------------------------------------
    async fn upsert_transcript(&self, transcript: &Transcript) -> RepositoryResult<Transcript>;
    async fn find_completed_transcript(
        &self,
        episode_id: EpisodeId,
    ) -> RepositoryResult<Option<Transcript>>;

    // ---- Digest configs ---------------------------------------------------
    async fn upsert_digest_config(&self, config: &DigestConfig) -> RepositoryResult<DigestConfig>;
    async fn get_digest_config(&self, id: ConfigId) -> RepositoryResult<DigestConfig>;
    async fn list_active_configs(&self) -> RepositoryResult<Vec<DigestConfig>>;

    // ---- Digests ----------------------------------------------------------
    async fn create_digest(&self, digest: &Digest) -> RepositoryResult<Digest>;
    async fn get_digest(&self, id: DigestId) -> RepositoryResult<Digest>;
    async fn find_digest_for_update(&self, id: DigestId) -> RepositoryResult<Digest>;

    /// Find an existing digest for `config_id` whose `week_start` matches,
    /// so the cron loop never triggers the same config twice for the same
    /// week.
    async fn find_digest_by_config_and_week(
        &self,
        config_id: ConfigId,
        week_start: DateTime<Utc>,
    ) -> RepositoryResult<Option<Digest>>;

    /// All `completed` digests for `user_id`, newest `created_at` first
    /// (§4.I, §6: the syndication feed accumulates history rather than
    /// carrying only the digest that just finished).
    async fn list_completed_digests_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Digest>>;

    /// Conditional status write guarded by `expected_version`.
    /// Returns `RepositoryError::VersionConflict` if the digest's stored
    /// version has moved since it was read.
    async fn set_digest_status(
        &self,
        id: DigestId,
        expected_version: u64,
        status: DigestStatus,
        error: Option<String>,
    ) -> RepositoryResult<Digest>;

    /// Record the selected clip count once the analyzer has finished
    /// selection.
    async fn set_digest_clip_count(
        &self,
        id: DigestId,
        expected_version: u64,
        clip_count: u32,
    ) -> RepositoryResult<Digest>;

    /// Attach the rendered audio's object key, duration, and chapters once
    /// assembly has completed.
    async fn set_digest_audio(
        &self,
        id: DigestId,
        expected_version: u64,
        audio_object_key: String,
        total_duration_sec: f64,
        chapters: Vec<Chapter>,
    ) -> RepositoryResult<Digest>;

    // ---- Clips --------------------------------------------------------------
    async fn append_clip(&self, clip: &DigestClip) -> RepositoryResult<DigestClip>;
    async fn list_clips_for_digest(&self, digest_id: DigestId) -> RepositoryResult<Vec<DigestClip>>;
    async fn set_clip_feedback(&self, clip_id: ClipId, tag: FeedbackTag) -> RepositoryResult<()>;
}

/// A leased row from [`Queue::lease_next`]: the handle a worker holds while
/// it processes one job, passed back unchanged to `ack`/`nack`.
#[derive(Debug, Clone)]
pub struct QueueLease {
    /// The `queue_jobs` record key (table-qualified id as a string).
    pub row_key: String,
    pub queue_name: String,
    pub job_id: String,
    pub payload: Value,
    /// Attempt count *before* this lease (0 on first delivery).
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Durable named FIFO job queue (component C, §4.C).
///
/// At-least-once delivery: a leased-but-unacked job becomes eligible again
/// once its lease expires, so every consumer must be idempotent.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue `payload` onto `queue_name` under the explicit `job_id`.
    ///
    /// Returns `true` if a new row was created, `false` if `job_id` already
    /// existed on this queue (dedup no-op, per §4.C).
    async fn enqueue(
        &self,
        queue_name: &str,
        job_id: &str,
        payload: Value,
        max_attempts: u32,
    ) -> RepositoryResult<bool>;

    /// Atomically claim the oldest available job on `queue_name`, marking it
    /// leased for `lease_secs`. Returns `None` if the queue is empty of
    /// available work.
    async fn lease_next(&self, queue_name: &str, lease_secs: i64) -> RepositoryResult<Option<QueueLease>>;

    /// Mark a leased job permanently done; the row is retained (terminal,
    /// status = `done`) for the inspection window.
    async fn ack(&self, lease: &QueueLease) -> RepositoryResult<()>;

    /// A transient failure: requeue with exponential backoff
    /// (`base_delay_secs * 2^attempts`), or mark terminally `failed` once
    /// `max_attempts` is exhausted.
    async fn nack(&self, lease: &QueueLease, reason: &str, base_delay_secs: i64) -> RepositoryResult<()>;

    /// Remove every still-`pending` job whose job id contains `needle`
    /// (used by `cancel(digestId)` to strip queued-but-not-leased
    /// next-stage jobs for one digest, per §4.J). Returns the count removed.
    async fn cancel_pending_matching(&self, needle: &str) -> RepositoryResult<u64>;
}
