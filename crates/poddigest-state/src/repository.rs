//! SurrealDB-backed implementation of [`crate::Repository`].
//!
//! Each table has a small `*Row` type carrying the SurrealDB-native
//! `id: Thing` alongside the business fields, mirroring the teacher's
//! `CommitRecord`/`CommitId` split (a storage-native key next to the
//! domain-meaningful one). Conversions to/from the `poddigest_domain`
//! types live next to each row so the trait implementation below stays a
//! thin sequence of queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poddigest_domain::{
    Chapter, ClipId, ConfigId, Digest, DigestClip, DigestConfig, DigestId, DigestStatus, Episode,
    EpisodeId, FeedbackTag, Podcast, PodcastId, ScoreDimensions, Subscription, Transcript,
    TranscriptSegment, UserId,
};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use crate::error::RepositoryError;
use crate::schema::{thing_for, uuid_from_thing, SurrealHandle};
use crate::storage_traits::Repository;
use crate::RepositoryResult;

/// Repository implementation backed by a shared [`SurrealHandle`].
pub struct SurrealRepository {
    handle: SurrealHandle,
}

impl SurrealRepository {
    pub fn new(handle: SurrealHandle) -> Self {
        Self { handle }
    }
}

// ---------------------------------------------------------------------------
// Podcasts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PodcastRow {
    id: Thing,
    title: String,
    author: Option<String>,
    feed_url: String,
    artwork_url: Option<String>,
    external_id: Option<String>,
    last_crawled_at: Option<DateTime<Utc>>,
}

impl From<&Podcast> for PodcastRow {
    fn from(p: &Podcast) -> Self {
        Self {
            id: thing_for("podcasts", p.id.0),
            title: p.title.clone(),
            author: p.author.clone(),
            feed_url: p.feed_url.clone(),
            artwork_url: p.artwork_url.clone(),
            external_id: p.external_id.clone(),
            last_crawled_at: p.last_crawled_at,
        }
    }
}

impl TryFrom<PodcastRow> for Podcast {
    type Error = RepositoryError;

    fn try_from(row: PodcastRow) -> Result<Self, Self::Error> {
        Ok(Podcast {
            id: PodcastId(uuid_from_thing(&row.id)?),
            title: row.title,
            author: row.author,
            feed_url: row.feed_url,
            artwork_url: row.artwork_url,
            external_id: row.external_id,
            last_crawled_at: row.last_crawled_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubscriptionRow {
    id: Option<Thing>,
    user_id: String,
    podcast_id: String,
    priority: poddigest_domain::Priority,
    active: bool,
}

impl From<&Subscription> for SubscriptionRow {
    fn from(s: &Subscription) -> Self {
        Self {
            id: None,
            user_id: s.user_id.to_string(),
            podcast_id: s.podcast_id.to_string(),
            priority: s.priority,
            active: s.active,
        }
    }
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = RepositoryError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            user_id: row
                .user_id
                .parse()
                .map_err(|_| RepositoryError::Serialization("bad user_id".into()))?,
            podcast_id: row
                .podcast_id
                .parse()
                .map_err(|_| RepositoryError::Serialization("bad podcast_id".into()))?,
            priority: row.priority,
            active: row.active,
        })
    }
}

// ---------------------------------------------------------------------------
// Episodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EpisodeRow {
    id: Thing,
    podcast_id: String,
    title: String,
    audio_url: String,
    published_at: DateTime<Utc>,
    duration_sec: u64,
    guid: String,
    transcript_status: poddigest_domain::TranscriptStatus,
}

impl From<&Episode> for EpisodeRow {
    fn from(e: &Episode) -> Self {
        Self {
            id: thing_for("episodes", e.id.0),
            podcast_id: e.podcast_id.to_string(),
            title: e.title.clone(),
            audio_url: e.audio_url.clone(),
            published_at: e.published_at,
            duration_sec: e.duration_sec,
            guid: e.guid.clone(),
            transcript_status: e.transcript_status,
        }
    }
}

impl TryFrom<EpisodeRow> for Episode {
    type Error = RepositoryError;

    fn try_from(row: EpisodeRow) -> Result<Self, Self::Error> {
        Ok(Episode {
            id: EpisodeId(uuid_from_thing(&row.id)?),
            podcast_id: row
                .podcast_id
                .parse()
                .map_err(|_| RepositoryError::Serialization("bad podcast_id".into()))?,
            title: row.title,
            audio_url: row.audio_url,
            published_at: row.published_at,
            duration_sec: row.duration_sec,
            guid: row.guid,
            transcript_status: row.transcript_status,
        })
    }
}

// ---------------------------------------------------------------------------
// Transcripts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TranscriptRow {
    id: Option<Thing>,
    episode_id: String,
    full_text: String,
    segments: Vec<TranscriptSegment>,
    language: String,
    status: poddigest_domain::TranscriptStatus,
    error: Option<String>,
}

impl From<&Transcript> for TranscriptRow {
    fn from(t: &Transcript) -> Self {
        Self {
            id: None,
            episode_id: t.episode_id.to_string(),
            full_text: t.full_text.clone(),
            segments: t.segments.clone(),
            language: t.language.clone(),
            status: t.status,
            error: t.error.clone(),
        }
    }
}

impl TryFrom<TranscriptRow> for Transcript {
    type Error = RepositoryError;

    fn try_from(row: TranscriptRow) -> Result<Self, Self::Error> {
        Ok(Transcript {
            episode_id: row
                .episode_id
                .parse()
                .map_err(|_| RepositoryError::Serialization("bad episode_id".into()))?,
            full_text: row.full_text,
            segments: row.segments,
            language: row.language,
            status: row.status,
            error: row.error,
        })
    }
}

// ---------------------------------------------------------------------------
// DigestConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DigestConfigRow {
    id: Thing,
    user_id: String,
    target_length_minutes: poddigest_domain::TargetLengthMinutes,
    clip_length_preference: poddigest_domain::ClipLengthPreference,
    structure: poddigest_domain::Structure,
    breadth_depth: u8,
    voice_id: String,
    narration_depth: poddigest_domain::NarrationDepth,
    music_style: Option<String>,
    transition_style: poddigest_domain::TransitionStyle,
    delivery_day: u8,
    delivery_hour_utc: u8,
    delivery_minute_utc: u8,
    delivery_method: poddigest_domain::DeliveryMethod,
    is_active: bool,
}

impl From<&DigestConfig> for DigestConfigRow {
    fn from(c: &DigestConfig) -> Self {
        Self {
            id: thing_for("digest_configs", c.id.0),
            user_id: c.user_id.to_string(),
            target_length_minutes: c.target_length_minutes,
            clip_length_preference: c.clip_length_preference,
            structure: c.structure,
            breadth_depth: c.breadth_depth,
            voice_id: c.voice_id.clone(),
            narration_depth: c.narration_depth,
            music_style: c.music_style.clone(),
            transition_style: c.transition_style,
            delivery_day: c.delivery_day,
            delivery_hour_utc: c.delivery_hour_utc,
            delivery_minute_utc: c.delivery_minute_utc,
            delivery_method: c.delivery_method,
            is_active: c.is_active,
        }
    }
}

impl TryFrom<DigestConfigRow> for DigestConfig {
    type Error = RepositoryError;

    fn try_from(row: DigestConfigRow) -> Result<Self, Self::Error> {
        Ok(DigestConfig {
            id: ConfigId(uuid_from_thing(&row.id)?),
            user_id: row
                .user_id
                .parse()
                .map_err(|_| RepositoryError::Serialization("bad user_id".into()))?,
            target_length_minutes: row.target_length_minutes,
            clip_length_preference: row.clip_length_preference,
            structure: row.structure,
            breadth_depth: row.breadth_depth,
            voice_id: row.voice_id,
            narration_depth: row.narration_depth,
            music_style: row.music_style,
            transition_style: row.transition_style,
            delivery_day: row.delivery_day,
            delivery_hour_utc: row.delivery_hour_utc,
            delivery_minute_utc: row.delivery_minute_utc,
            delivery_method: row.delivery_method,
            is_active: row.is_active,
        })
    }
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DigestRow {
    id: Thing,
    user_id: String,
    config_id: String,
    title: String,
    week_start: DateTime<Utc>,
    week_end: DateTime<Utc>,
    audio_object_key: Option<String>,
    total_duration_sec: Option<f64>,
    clip_count: u32,
    chapters: Option<Vec<Chapter>>,
    status: DigestStatus,
    error: Option<String>,
    version: u64,
    created_at: DateTime<Utc>,
}

impl From<&Digest> for DigestRow {
    fn from(d: &Digest) -> Self {
        Self {
            id: thing_for("digests", d.id.0),
            user_id: d.user_id.to_string(),
            config_id: d.config_id.to_string(),
            title: d.title.clone(),
            week_start: d.week_start,
            week_end: d.week_end,
            audio_object_key: d.audio_object_key.clone(),
            total_duration_sec: d.total_duration_sec,
            clip_count: d.clip_count,
            chapters: d.chapters.clone(),
            status: d.status,
            error: d.error.clone(),
            version: d.version,
            created_at: d.created_at,
        }
    }
}

impl TryFrom<DigestRow> for Digest {
    type Error = RepositoryError;

    fn try_from(row: DigestRow) -> Result<Self, Self::Error> {
        Ok(Digest {
            id: DigestId(uuid_from_thing(&row.id)?),
            user_id: row
                .user_id
                .parse()
                .map_err(|_| RepositoryError::Serialization("bad user_id".into()))?,
            config_id: row
                .config_id
                .parse()
                .map_err(|_| RepositoryError::Serialization("bad config_id".into()))?,
            title: row.title,
            week_start: row.week_start,
            week_end: row.week_end,
            audio_object_key: row.audio_object_key,
            total_duration_sec: row.total_duration_sec,
            clip_count: row.clip_count,
            chapters: row.chapters,
            status: row.status,
            error: row.error,
            version: row.version,
            created_at: row.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// DigestClip
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DigestClipRow {
    id: Thing,
    digest_id: String,
    episode_id: String,
    start_sec: f64,
    end_sec: f64,
    score: f64,
    score_dimensions: ScoreDimensions,
    position: u32,
    feedback_tag: Option<FeedbackTag>,
}

impl From<&DigestClip> for DigestClipRow {
    fn from(c: &DigestClip) -> Self {
        Self {
            id: thing_for("digest_clips", c.id.0),
            digest_id: c.digest_id.to_string(),
            episode_id: c.episode_id.to_string(),
            start_sec: c.start_sec,
            end_sec: c.end_sec,
            score: c.score,
            score_dimensions: c.score_dimensions,
            position: c.position,
            feedback_tag: c.feedback_tag,
        }
    }
}

impl TryFrom<DigestClipRow> for DigestClip {
    type Error = RepositoryError;

    fn try_from(row: DigestClipRow) -> Result<Self, Self::Error> {
        Ok(DigestClip {
            id: ClipId(uuid_from_thing(&row.id)?),
            digest_id: row
                .digest_id
                .parse()
                .map_err(|_| RepositoryError::Serialization("bad digest_id".into()))?,
            episode_id: row
                .episode_id
                .parse()
                .map_err(|_| RepositoryError::Serialization("bad episode_id".into()))?,
            start_sec: row.start_sec,
            end_sec: row.end_sec,
            score: row.score,
            score_dimensions: row.score_dimensions,
            position: row.position,
            feedback_tag: row.feedback_tag,
        })
    }
}

// ---------------------------------------------------------------------------
// Repository impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Repository for SurrealRepository {
    async fn upsert_podcast(&self, podcast: &Podcast) -> RepositoryResult<Podcast> {
        let row = PodcastRow::from(podcast);
        let key = podcast.id.to_string();
        let created: Option<PodcastRow> = self
            .handle
            .db()
            .upsert(("podcasts", key.as_str()))
            .content(row)
            .await?;
        created
            .ok_or_else(|| RepositoryError::NotFound(format!("podcasts:{key}")))?
            .try_into()
    }

    async fn get_podcast(&self, id: PodcastId) -> RepositoryResult<Podcast> {
        let row: Option<PodcastRow> = self
            .handle
            .db()
            .select(("podcasts", id.to_string().as_str()))
            .await?;
        row.ok_or_else(|| RepositoryError::NotFound(format!("podcasts:{id}")))?
            .try_into()
    }

    async fn find_podcast_by_feed_url(&self, feed_url: &str) -> RepositoryResult<Option<Podcast>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM podcasts WHERE feed_url = $feed_url")
            .bind(("feed_url", feed_url.to_string()))
            .await?;
        let rows: Vec<PodcastRow> = result.take(0)?;
        rows.into_iter().next().map(TryInto::try_into).transpose()
    }

    async fn mark_podcast_crawled(&self, id: PodcastId, at: DateTime<Utc>) -> RepositoryResult<()> {
        let key = id.to_string();
        let _: Option<PodcastRow> = self
            .handle
            .db()
            .update(("podcasts", key.as_str()))
            .merge(serde_json::json!({ "last_crawled_at": at }))
            .await?;
        Ok(())
    }

    async fn upsert_subscription(&self, sub: &Subscription) -> RepositoryResult<Subscription> {
        let mut result = self
            .handle
            .db()
            .query(
                "UPDATE subscriptions SET priority = $priority, active = $active \
                 WHERE user_id = $user_id AND podcast_id = $podcast_id \
                 ELSE CREATE subscriptions CONTENT $content",
            )
            .bind(("priority", sub.priority))
            .bind(("active", sub.active))
            .bind(("user_id", sub.user_id.to_string()))
            .bind(("podcast_id", sub.podcast_id.to_string()))
            .bind(("content", SubscriptionRow::from(sub)))
            .await?;
        let rows: Vec<SubscriptionRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RepositoryError::NotFound("subscription".into()))?
            .try_into()
    }

    async fn list_active_subscriptions(
        &self,
        user_id: UserId,
    ) -> RepositoryResult<Vec<Subscription>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM subscriptions WHERE user_id = $user_id AND active = true")
            .bind(("user_id", user_id.to_string()))
            .await?;
        let rows: Vec<SubscriptionRow> = result.take(0)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn upsert_episode(&self, episode: &Episode) -> RepositoryResult<Episode> {
        let row = EpisodeRow::from(episode);
        let key = episode.id.to_string();
        let created: Option<EpisodeRow> = self
            .handle
            .db()
            .upsert(("episodes", key.as_str()))
            .content(row)
            .await?;
        created
            .ok_or_else(|| RepositoryError::NotFound(format!("episodes:{key}")))?
            .try_into()
    }

    async fn get_episode(&self, id: EpisodeId) -> RepositoryResult<Episode> {
        let row: Option<EpisodeRow> = self
            .handle
            .db()
            .select(("episodes", id.to_string().as_str()))
            .await?;
        row.ok_or_else(|| RepositoryError::NotFound(format!("episodes:{id}")))?
            .try_into()
    }

    async fn find_episode_by_guid(
        &self,
        podcast_id: PodcastId,
        guid: &str,
    ) -> RepositoryResult<Option<Episode>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM episodes WHERE podcast_id = $podcast_id AND guid = $guid")
            .bind(("podcast_id", podcast_id.to_string()))
            .bind(("guid", guid.to_string()))
            .await?;
        let rows: Vec<EpisodeRow> = result.take(0)?;
        rows.into_iter().next().map(TryInto::try_into).transpose()
    }

    async fn list_recent_episodes(
        &self,
        podcast_id: PodcastId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<Episode>> {
        let mut result = self
            .handle
            .db()
            .query(
                "SELECT * FROM episodes WHERE podcast_id = $podcast_id AND published_at > $since \
                 ORDER BY published_at DESC LIMIT $limit",
            )
            .bind(("podcast_id", podcast_id.to_string()))
            .bind(("since", since))
            .bind(("limit", limit as i64))
            .await?;
        let rows: Vec<EpisodeRow> = result.take(0)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn upsert_transcript(&self, transcript: &Transcript) -> RepositoryResult<Transcript> {
        let mut result = self
            .handle
            .db()
            .query(
                "UPDATE transcripts SET full_text = $full_text, segments = $segments, \
                 language = $language, status = $status, error = $error \
                 WHERE episode_id = $episode_id \
                 ELSE CREATE transcripts CONTENT $content",
            )
            .bind(("full_text", transcript.full_text.clone()))
            .bind(("segments", transcript.segments.clone()))
            .bind(("language", transcript.language.clone()))
            .bind(("status", transcript.status))
            .bind(("error", transcript.error.clone()))
            .bind(("episode_id", transcript.episode_id.to_string()))
            .bind(("content", TranscriptRow::from(transcript)))
            .await?;
        let rows: Vec<TranscriptRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RepositoryError::NotFound("transcript".into()))?
            .try_into()
    }

    async fn find_completed_transcript(
        &self,
        episode_id: EpisodeId,
    ) -> RepositoryResult<Option<Transcript>> {
        let mut result = self
            .handle
            .db()
            .query(
                "SELECT * FROM transcripts WHERE episode_id = $episode_id AND status = 'completed'",
            )
            .bind(("episode_id", episode_id.to_string()))
            .await?;
        let rows: Vec<TranscriptRow> = result.take(0)?;
        rows.into_iter().next().map(TryInto::try_into).transpose()
    }

    async fn upsert_digest_config(&self, config: &DigestConfig) -> RepositoryResult<DigestConfig> {
        let row = DigestConfigRow::from(config);
        let key = config.id.to_string();
        let created: Option<DigestConfigRow> = self
            .handle
            .db()
            .upsert(("digest_configs", key.as_str()))
            .content(row)
            .await?;
        created
            .ok_or_else(|| RepositoryError::NotFound(format!("digest_configs:{key}")))?
            .try_into()
    }

    async fn get_digest_config(&self, id: ConfigId) -> RepositoryResult<DigestConfig> {
        let row: Option<DigestConfigRow> = self
            .handle
            .db()
            .select(("digest_configs", id.to_string().as_str()))
            .await?;
        row.ok_or_else(|| RepositoryError::NotFound(format!("digest_configs:{id}")))?
            .try_into()
    }

    async fn list_active_configs(&self) -> RepositoryResult<Vec<DigestConfig>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM digest_configs WHERE is_active = true")
            .await?;
        let rows: Vec<DigestConfigRow> = result.take(0)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_digest(&self, digest: &Digest) -> RepositoryResult<Digest> {
        let row = DigestRow::from(digest);
        let key = digest.id.to_string();
        let created: Option<DigestRow> = self
            .handle
            .db()
            .create(("digests", key.as_str()))
            .content(row)
            .await?;
        created
            .ok_or_else(|| RepositoryError::NotFound(format!("digests:{key}")))?
            .try_into()
    }

    async fn get_digest(&self, id: DigestId) -> RepositoryResult<Digest> {
        let row: Option<DigestRow> = self
            .handle
            .db()
            .select(("digests", id.to_string().as_str()))
            .await?;
        row.ok_or_else(|| RepositoryError::NotFound(format!("digests:{id}")))?
            .try_into()
    }

    async fn find_digest_for_update(&self, id: DigestId) -> RepositoryResult<Digest> {
        self.get_digest(id).await
    }

    async fn find_digest_by_config_and_week(
        &self,
        config_id: ConfigId,
        week_start: DateTime<Utc>,
    ) -> RepositoryResult<Option<Digest>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM digests WHERE config_id = $config_id AND week_start = $week_start LIMIT 1")
            .bind(("config_id", config_id.to_string()))
            .bind(("week_start", week_start))
            .await?;
        let rows: Vec<DigestRow> = result.take(0)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into()?)),
            None => Ok(None),
        }
    }

    async fn list_completed_digests_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Digest>> {
        let mut result = self
            .handle
            .db()
            .query(
                "SELECT * FROM digests WHERE user_id = $user_id AND status = 'completed' \
                 ORDER BY created_at DESC",
            )
            .bind(("user_id", user_id.to_string()))
            .await?;
        let rows: Vec<DigestRow> = result.take(0)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_digest_status(
        &self,
        id: DigestId,
        expected_version: u64,
        status: DigestStatus,
        error: Option<String>,
    ) -> RepositoryResult<Digest> {
        let key = id.to_string();
        let mut result = self
            .handle
            .db()
            .query(
                "UPDATE digests SET status = $status, error = $error, version = version + 1 \
                 WHERE id = $id AND version = $expected",
            )
            .bind(("status", status))
            .bind(("error", error))
            .bind(("id", thing_for("digests", id.0)))
            .bind(("expected", expected_version as i64))
            .await?;
        let rows: Vec<DigestRow> = result.take(0)?;
        match rows.into_iter().next() {
            Some(row) => row.try_into(),
            None => Err(RepositoryError::VersionConflict {
                entity: format!("digests:{key}"),
                expected: expected_version,
            }),
        }
    }

    async fn set_digest_clip_count(
        &self,
        id: DigestId,
        expected_version: u64,
        clip_count: u32,
    ) -> RepositoryResult<Digest> {
        let key = id.to_string();
        let mut result = self
            .handle
            .db()
            .query(
                "UPDATE digests SET clip_count = $clip_count, version = version + 1 \
                 WHERE id = $id AND version = $expected",
            )
            .bind(("clip_count", clip_count))
            .bind(("id", thing_for("digests", id.0)))
            .bind(("expected", expected_version as i64))
            .await?;
        let rows: Vec<DigestRow> = result.take(0)?;
        match rows.into_iter().next() {
            Some(row) => row.try_into(),
            None => Err(RepositoryError::VersionConflict {
                entity: format!("digests:{key}"),
                expected: expected_version,
            }),
        }
    }

    async fn set_digest_audio(
        &self,
        id: DigestId,
        expected_version: u64,
        audio_object_key: String,
        total_duration_sec: f64,
        chapters: Vec<Chapter>,
    ) -> RepositoryResult<Digest> {
        let key = id.to_string();
        let mut result = self
            .handle
            .db()
            .query(
                "UPDATE digests SET audio_object_key = $key, total_duration_sec = $duration, \
                 chapters = $chapters, version = version + 1 \
                 WHERE id = $id AND version = $expected",
            )
            .bind(("key", audio_object_key))
            .bind(("duration", total_duration_sec))
            .bind(("chapters", chapters))
            .bind(("id", thing_for("digests", id.0)))
            .bind(("expected", expected_version as i64))
            .await?;
        let rows: Vec<DigestRow> = result.take(0)?;
        match rows.into_iter().next() {
            Some(row) => row.try_into(),
            None => Err(RepositoryError::VersionConflict {
                entity: format!("digests:{key}"),
                expected: expected_version,
            }),
        }
    }

    async fn append_clip(&self, clip: &DigestClip) -> RepositoryResult<DigestClip> {
        let row = DigestClipRow::from(clip);
        let key = clip.id.to_string();
        let created: Option<DigestClipRow> = self
            .handle
            .db()
            .create(("digest_clips", key.as_str()))
            .content(row)
            .await?;
        created
            .ok_or_else(|| RepositoryError::NotFound(format!("digest_clips:{key}")))?
            .try_into()
    }

    async fn list_clips_for_digest(&self, digest_id: DigestId) -> RepositoryResult<Vec<DigestClip>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM digest_clips WHERE digest_id = $digest_id ORDER BY position ASC")
            .bind(("digest_id", digest_id.to_string()))
            .await?;
        let rows: Vec<DigestClipRow> = result.take(0)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_clip_feedback(&self, clip_id: ClipId, tag: FeedbackTag) -> RepositoryResult<()> {
        let key = clip_id.to_string();
        let _: Option<DigestClipRow> = self
            .handle
            .db()
            .update(("digest_clips", key.as_str()))
            .merge(serde_json::json!({ "feedback_tag": tag }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poddigest_domain::Priority;

    async fn repo() -> SurrealRepository {
        SurrealRepository::new(SurrealHandle::setup_db().await.unwrap())
    }

    fn sample_podcast() -> Podcast {
        Podcast {
            id: PodcastId::new(),
            title: "Test Cast".to_string(),
            author: None,
            feed_url: "https://example.com/feed.xml".to_string(),
            artwork_url: None,
            external_id: None,
            last_crawled_at: None,
        }
    }

    #[tokio::test]
    async fn podcast_round_trips_through_upsert_and_get() {
        let repo = repo().await;
        let podcast = sample_podcast();
        repo.upsert_podcast(&podcast).await.unwrap();
        let fetched = repo.get_podcast(podcast.id).await.unwrap();
        assert_eq!(fetched.feed_url, podcast.feed_url);
    }

    #[tokio::test]
    async fn find_podcast_by_feed_url_returns_none_when_absent() {
        let repo = repo().await;
        let found = repo
            .find_podcast_by_feed_url("https://nowhere.example/feed.xml")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn subscription_upsert_is_idempotent_on_user_and_podcast() {
        let repo = repo().await;
        let podcast = sample_podcast();
        repo.upsert_podcast(&podcast).await.unwrap();
        let user_id = UserId::new();
        let sub = Subscription {
            user_id,
            podcast_id: podcast.id,
            priority: Priority::Must,
            active: true,
        };
        repo.upsert_subscription(&sub).await.unwrap();
        let updated = Subscription {
            priority: Priority::Nice,
            ..sub
        };
        repo.upsert_subscription(&updated).await.unwrap();

        let subs = repo.list_active_subscriptions(user_id).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].priority, Priority::Nice);
    }

    #[tokio::test]
    async fn digest_status_write_rejects_stale_version() {
        let repo = repo().await;
        let digest = Digest::new_pending(
            UserId::new(),
            ConfigId::new(),
            "Weekly Digest".to_string(),
            Utc::now() - chrono::Duration::days(7),
            Utc::now(),
        );
        repo.create_digest(&digest).await.unwrap();

        let updated = repo
            .set_digest_status(digest.id, 0, DigestStatus::Crawling, None)
            .await
            .unwrap();
        assert_eq!(updated.status, DigestStatus::Crawling);
        assert_eq!(updated.version, 1);

        let stale = repo
            .set_digest_status(digest.id, 0, DigestStatus::Transcribing, None)
            .await;
        assert!(matches!(stale, Err(RepositoryError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn list_completed_digests_for_user_orders_newest_first() {
        let repo = repo().await;
        let user_id = UserId::new();
        let config_id = ConfigId::new();
        let older = Digest::new_pending(
            user_id,
            config_id,
            "Week 1".to_string(),
            Utc::now() - chrono::Duration::days(21),
            Utc::now() - chrono::Duration::days(14),
        );
        let newer = Digest::new_pending(
            user_id,
            config_id,
            "Week 2".to_string(),
            Utc::now() - chrono::Duration::days(14),
            Utc::now() - chrono::Duration::days(7),
        );
        let pending = Digest::new_pending(
            user_id,
            config_id,
            "Week 3".to_string(),
            Utc::now() - chrono::Duration::days(7),
            Utc::now(),
        );
        repo.create_digest(&older).await.unwrap();
        repo.create_digest(&newer).await.unwrap();
        repo.create_digest(&pending).await.unwrap();
        repo.set_digest_status(older.id, 0, DigestStatus::Completed, None)
            .await
            .unwrap();
        repo.set_digest_status(newer.id, 0, DigestStatus::Completed, None)
            .await
            .unwrap();

        let completed = repo.list_completed_digests_for_user(user_id).await.unwrap();
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].id, newer.id);
        assert_eq!(completed[1].id, older.id);
    }

    #[tokio::test]
    async fn clips_list_in_position_order() {
        let repo = repo().await;
        let digest_id = DigestId::new();
        let episode_id = EpisodeId::new();
        for position in [1u32, 0u32] {
            let clip = DigestClip {
                id: ClipId::new(),
                digest_id,
                episode_id,
                start_sec: 0.0,
                end_sec: 60.0,
                score: 80.0,
                score_dimensions: ScoreDimensions::clamped(80, 80, 80, 80, 80),
                position,
                feedback_tag: None,
            };
            repo.append_clip(&clip).await.unwrap();
        }
        let clips = repo.list_clips_for_digest(digest_id).await.unwrap();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].position, 0);
        assert_eq!(clips[1].position, 1);
    }
}
