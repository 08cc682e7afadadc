//! SurrealDB connection handle and schema initialization.
//!
//! Tables:
//! - `podcasts`, `subscriptions`, `episodes`, `transcripts`,
//!   `digest_configs`, `digests`, `digest_clips` — the §3 data model
//! - `queue_jobs` — the durable job queue (component C), owned by
//!   `poddigest-pipeline` but sharing this connection and schema, mirroring
//!   how the teacher's ledger and CAS tables shared one `SurrealHandle`.

use crate::error::RepositoryError;
use crate::Result;
use surrealdb::engine::local::{Db, Mem};
use surrealdb::sql::Thing;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// SurrealDB connection handle for the PodDigest repository and queue.
///
/// Cheap to clone: `Surreal<Db>` is itself a thin handle onto a shared
/// connection, so `SurrealRepository` and `SurrealQueue` can each hold a
/// clone that talks to the same underlying database (§4.C: the queue broker
/// shares the repository's connection rather than opening its own).
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Db>,
}

impl SurrealHandle {
    /// Connect to an in-memory SurrealDB instance and initialize the
    /// schema. Production deployments point `Surreal::new` at a real
    /// endpoint instead; the in-memory engine is what the teacher's test
    /// suite and local `poddigestd` runs use.
    #[instrument(skip_all)]
    pub async fn setup_db() -> Result<Self> {
        info!("connecting to SurrealDB (in-memory)");

        let db = Surreal::new::<Mem>(())
            .await
            .map_err(|e| RepositoryError::Connection(e.to_string()))?;

        db.use_ns("poddigest")
            .use_db("main")
            .await
            .map_err(|e| RepositoryError::Connection(e.to_string()))?;

        let handle = SurrealHandle { db };
        handle.init_schema().await?;

        info!("schema initialized");
        Ok(handle)
    }

    /// Access the underlying connection. Visible to the crate only; stage
    /// code goes through [`crate::Repository`] / the queue trait, never
    /// the raw handle.
    pub(crate) fn db(&self) -> &Surreal<Db> {
        &self.db
    }

    async fn init_schema(&self) -> Result<()> {
        debug!("defining PodDigest schema");

        let schema = r#"
            DEFINE TABLE podcasts SCHEMAFULL;
            DEFINE FIELD title ON podcasts TYPE string;
            DEFINE FIELD author ON podcasts TYPE option<string>;
            DEFINE FIELD feed_url ON podcasts TYPE string;
            DEFINE FIELD artwork_url ON podcasts TYPE option<string>;
            DEFINE FIELD external_id ON podcasts TYPE option<string>;
            DEFINE FIELD last_crawled_at ON podcasts TYPE option<datetime>;
            DEFINE INDEX idx_podcast_feed_url ON podcasts FIELDS feed_url UNIQUE;

            DEFINE TABLE subscriptions SCHEMAFULL;
            DEFINE FIELD user_id ON subscriptions TYPE string;
            DEFINE FIELD podcast_id ON subscriptions TYPE string;
            DEFINE FIELD priority ON subscriptions TYPE string;
            DEFINE FIELD active ON subscriptions TYPE bool;
            DEFINE INDEX idx_subscription_user_podcast ON subscriptions
                FIELDS user_id, podcast_id UNIQUE;

            DEFINE TABLE episodes SCHEMAFULL;
            DEFINE FIELD podcast_id ON episodes TYPE string;
            DEFINE FIELD title ON episodes TYPE string;
            DEFINE FIELD audio_url ON episodes TYPE string;
            DEFINE FIELD published_at ON episodes TYPE datetime;
            DEFINE FIELD duration_sec ON episodes TYPE int;
            DEFINE FIELD guid ON episodes TYPE string;
            DEFINE FIELD transcript_status ON episodes TYPE string;
            DEFINE INDEX idx_episode_podcast_guid ON episodes
                FIELDS podcast_id, guid UNIQUE;

            DEFINE TABLE transcripts SCHEMAFULL;
            DEFINE FIELD episode_id ON transcripts TYPE string;
            DEFINE FIELD full_text ON transcripts TYPE string;
            DEFINE FIELD segments ON transcripts FLEXIBLE TYPE array;
            DEFINE FIELD language ON transcripts TYPE string;
            DEFINE FIELD status ON transcripts TYPE string;
            DEFINE FIELD error ON transcripts TYPE option<string>;
            DEFINE INDEX idx_transcript_episode ON transcripts FIELDS episode_id UNIQUE;

            DEFINE TABLE digest_configs SCHEMAFULL;
            DEFINE FIELD user_id ON digest_configs TYPE string;
            DEFINE FIELD target_length_minutes ON digest_configs TYPE int;
            DEFINE FIELD clip_length_preference ON digest_configs TYPE string;
            DEFINE FIELD structure ON digest_configs TYPE string;
            DEFINE FIELD breadth_depth ON digest_configs TYPE int;
            DEFINE FIELD voice_id ON digest_configs TYPE string;
            DEFINE FIELD narration_depth ON digest_configs TYPE string;
            DEFINE FIELD music_style ON digest_configs TYPE option<string>;
            DEFINE FIELD transition_style ON digest_configs TYPE string;
            DEFINE FIELD delivery_day ON digest_configs TYPE int;
            DEFINE FIELD delivery_hour_utc ON digest_configs TYPE int;
            DEFINE FIELD delivery_minute_utc ON digest_configs TYPE int;
            DEFINE FIELD delivery_method ON digest_configs TYPE string;
            DEFINE FIELD is_active ON digest_configs TYPE bool;

            DEFINE TABLE digests SCHEMAFULL;
            DEFINE FIELD user_id ON digests TYPE string;
            DEFINE FIELD config_id ON digests TYPE string;
            DEFINE FIELD title ON digests TYPE string;
            DEFINE FIELD week_start ON digests TYPE datetime;
            DEFINE FIELD week_end ON digests TYPE datetime;
            DEFINE FIELD audio_object_key ON digests TYPE option<string>;
            DEFINE FIELD total_duration_sec ON digests TYPE option<float>;
            DEFINE FIELD clip_count ON digests TYPE int;
            DEFINE FIELD chapters ON digests FLEXIBLE TYPE option<array>;
            DEFINE FIELD status ON digests TYPE string;
            DEFINE FIELD error ON digests TYPE option<string>;
            DEFINE FIELD version ON digests TYPE int;
            DEFINE FIELD created_at ON digests TYPE datetime;

            DEFINE TABLE digest_clips SCHEMAFULL;
            DEFINE FIELD digest_id ON digest_clips TYPE string;
            DEFINE FIELD episode_id ON digest_clips TYPE string;
            DEFINE FIELD start_sec ON digest_clips TYPE float;
            DEFINE FIELD end_sec ON digest_clips TYPE float;
            DEFINE FIELD score ON digest_clips TYPE float;
            DEFINE FIELD score_dimensions ON digest_clips FLEXIBLE TYPE object;
            DEFINE FIELD position ON digest_clips TYPE int;
            DEFINE FIELD feedback_tag ON digest_clips TYPE option<string>;
            DEFINE INDEX idx_clip_digest_position ON digest_clips
                FIELDS digest_id, position UNIQUE;

            DEFINE TABLE queue_jobs SCHEMAFULL;
            DEFINE FIELD queue_name ON queue_jobs TYPE string;
            DEFINE FIELD job_id ON queue_jobs TYPE string;
            DEFINE FIELD payload ON queue_jobs FLEXIBLE TYPE object;
            DEFINE FIELD attempts ON queue_jobs TYPE int;
            DEFINE FIELD max_attempts ON queue_jobs TYPE int;
            DEFINE FIELD leased_until ON queue_jobs TYPE option<datetime>;
            DEFINE FIELD available_at ON queue_jobs TYPE datetime;
            DEFINE FIELD status ON queue_jobs TYPE string;
            DEFINE FIELD created_at ON queue_jobs TYPE datetime;
            DEFINE INDEX idx_queue_job_dedup ON queue_jobs
                FIELDS queue_name, job_id UNIQUE;
        "#;

        self.db
            .query(schema)
            .await
            .map_err(|e| RepositoryError::SchemaSetup(e.to_string()))?;

        debug!("schema defined successfully");
        Ok(())
    }
}

/// Build a SurrealDB record pointer from a table name and a uuid-backed
/// business id, e.g. `podcasts:3fa85f64-...`.
pub(crate) fn thing_for(table: &str, id: Uuid) -> Thing {
    Thing::from((table, id.to_string().as_str()))
}

/// Parse the uuid out of a record pointer's key component.
pub(crate) fn uuid_from_thing(thing: &Thing) -> Result<Uuid> {
    Uuid::parse_str(&thing.id.to_raw()).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_initialize_schema() {
        let handle = SurrealHandle::setup_db().await;
        assert!(handle.is_ok(), "failed to connect: {:?}", handle.err());
    }
}
