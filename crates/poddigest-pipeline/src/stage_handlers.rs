//! Wiring layer binding each stage to its queue.
//!
//! Every handler follows the same shape: parse the digest id out of the
//! leased payload, `enter_stage` to record the in-progress status, recover
//! whatever else the stage needs from the repository (crash-recoverable
//! state, §2) or from the payload itself when the data has no table of its
//! own (the discovered episode ids between crawl and transcribe, the
//! rendered narration clips between narrate and assemble), run the stage,
//! then translate its `StageOutcome` into `advance`/`fail`/`complete`.
//!
//! A `StageFailure` is a decided, terminal outcome for the digest, not a
//! transient error, so handlers ack those jobs (`Ok(())`) after recording
//! the failure. Only genuine infrastructure errors (a repository query
//! failing, a malformed payload) propagate as `Err` so the queue nacks and
//! retries the job itself.

use std::collections::HashMap;
use std::sync::Arc;

use poddigest_domain::{ConfigId, DigestId, EpisodeId, StageFailureKind, StageOutcome};
use poddigest_state::{ObjectStore, Queue, Repository};
use serde_json::Value;
use tracing::warn;

use crate::analyzer::{Analyzer, CandidateScorer};
use crate::assembler::{Assembler, EpisodeSource};
use crate::deliverer::{Deliverer, Notifier};
use crate::ingestor::FeedIngestor;
use crate::narrator::{NarrationAudio, NarrationKind, Narrator, ScriptGenerator, SpeechSynthesizer};
use crate::orchestrator::{
    Orchestrator, QUEUE_ANALYZE, QUEUE_ASSEMBLE, QUEUE_DELIVER, QUEUE_INGEST, QUEUE_NARRATE,
    QUEUE_TRANSCRIBE,
};
use crate::transcriber::{Transcriber, TranscriptionProvider};
use crate::worker::JobHandler;

fn parse_digest_id(payload: &Value) -> anyhow::Result<DigestId> {
    let raw = payload
        .get("digestId")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("job payload missing digestId"))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("job payload digestId is not a valid uuid: {raw}"))
}

fn parse_episode_ids(payload: &Value) -> anyhow::Result<Vec<EpisodeId>> {
    payload
        .get("episodeIds")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("job payload missing episodeIds"))?
        .iter()
        .map(|v| {
            v.as_str()
                .ok_or_else(|| anyhow::anyhow!("episodeIds entry is not a string"))
                .and_then(|s| s.parse().map_err(|_| anyhow::anyhow!("invalid episode id: {s}")))
        })
        .collect()
}

fn episode_ids_payload(digest_id: DigestId, episode_ids: &[EpisodeId]) -> Value {
    serde_json::json!({
        "digestId": digest_id.to_string(),
        "episodeIds": episode_ids.iter().map(ToString::to_string).collect::<Vec<_>>(),
    })
}

fn digest_only_payload(digest_id: DigestId) -> Value {
    serde_json::json!({ "digestId": digest_id.to_string() })
}

/// Component D, bound to [`crate::orchestrator::QUEUE_INGEST`].
pub struct IngestHandler<R: Repository, Q: Queue> {
    pub orchestrator: Arc<Orchestrator<R, Q>>,
    pub repo: Arc<R>,
    pub ingestor: Arc<FeedIngestor<R>>,
}

#[async_trait::async_trait]
impl<R: Repository + 'static, Q: Queue + 'static> JobHandler for IngestHandler<R, Q> {
    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let digest_id = parse_digest_id(&payload)?;
        self.orchestrator.enter_stage(digest_id, QUEUE_INGEST).await?;
        let digest = self.repo.get_digest(digest_id).await?;

        let outcome = self.ingestor.crawl_for_user(digest.user_id, digest.week_start).await?;
        match outcome {
            StageOutcome::StageFailure { kind, message } => {
                self.orchestrator.fail(digest_id, kind, &message).await?;
            }
            outcome => {
                let episode_ids = outcome.succeeded().expect("non-StageFailure outcome has a payload");
                self.orchestrator
                    .advance(digest_id, QUEUE_INGEST, episode_ids_payload(digest_id, &episode_ids))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Component E, bound to [`crate::orchestrator::QUEUE_TRANSCRIBE`].
pub struct TranscribeHandler<R: Repository, Q: Queue, P: TranscriptionProvider> {
    pub orchestrator: Arc<Orchestrator<R, Q>>,
    pub transcriber: Arc<Transcriber<R, P>>,
}

#[async_trait::async_trait]
impl<R: Repository + 'static, Q: Queue + 'static, P: TranscriptionProvider + 'static> JobHandler
    for TranscribeHandler<R, Q, P>
{
    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let digest_id = parse_digest_id(&payload)?;
        let episode_ids = parse_episode_ids(&payload)?;
        self.orchestrator.enter_stage(digest_id, QUEUE_TRANSCRIBE).await?;

        let outcome = self.transcriber.transcribe_batch(episode_ids).await;
        match outcome {
            StageOutcome::StageFailure { kind, message } => {
                self.orchestrator.fail(digest_id, kind, &message).await?;
            }
            outcome => {
                let episode_ids = outcome.succeeded().expect("non-StageFailure outcome has a payload");
                self.orchestrator
                    .advance(digest_id, QUEUE_TRANSCRIBE, episode_ids_payload(digest_id, &episode_ids))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Component F, bound to [`crate::orchestrator::QUEUE_ANALYZE`].
pub struct AnalyzeHandler<R: Repository, Q: Queue, S: CandidateScorer> {
    pub orchestrator: Arc<Orchestrator<R, Q>>,
    pub repo: Arc<R>,
    pub analyzer: Arc<Analyzer<R, S>>,
}

#[async_trait::async_trait]
impl<R: Repository + 'static, Q: Queue + 'static, S: CandidateScorer + 'static> JobHandler
    for AnalyzeHandler<R, Q, S>
{
    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let digest_id = parse_digest_id(&payload)?;
        let episode_ids = parse_episode_ids(&payload)?;
        self.orchestrator.enter_stage(digest_id, QUEUE_ANALYZE).await?;

        let digest = self.repo.get_digest(digest_id).await?;
        let config = self.repo.get_digest_config(digest.config_id).await?;

        let outcome = self.analyzer.analyze(digest_id, episode_ids, &config).await;
        match outcome {
            StageOutcome::StageFailure { kind, message } => {
                self.orchestrator.fail(digest_id, kind, &message).await?;
            }
            _outcome => {
                // Clips and clip_count are already persisted by `Analyzer::analyze`
                // itself; downstream stages recover them from the repository by
                // digest id rather than carrying clip ids through the queue.
                self.orchestrator
                    .advance(digest_id, QUEUE_ANALYZE, digest_only_payload(digest_id))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Component G, bound to [`crate::orchestrator::QUEUE_NARRATE`].
pub struct NarrateHandler<R: Repository, Q: Queue, O: ObjectStore, G: ScriptGenerator, Sy: SpeechSynthesizer> {
    pub orchestrator: Arc<Orchestrator<R, Q>>,
    pub repo: Arc<R>,
    pub narrator: Arc<Narrator<O, G, Sy>>,
}

fn narration_kind_str(kind: NarrationKind) -> &'static str {
    kind.as_str()
}

fn narration_kind_from_str(s: &str) -> anyhow::Result<NarrationKind> {
    match s {
        "intro" => Ok(NarrationKind::Intro),
        "transition" => Ok(NarrationKind::Transition),
        "outro" => Ok(NarrationKind::Outro),
        other => Err(anyhow::anyhow!("unknown narration kind: {other}")),
    }
}

fn narrations_payload(digest_id: DigestId, narrations: &[NarrationAudio]) -> Value {
    let items: Vec<Value> = narrations
        .iter()
        .map(|n| {
            serde_json::json!({
                "position": n.position,
                "kind": narration_kind_str(n.kind),
                "objectKey": n.object_key,
                "durationSec": n.duration_sec,
            })
        })
        .collect();
    serde_json::json!({ "digestId": digest_id.to_string(), "narrations": items })
}

fn parse_narrations(payload: &Value) -> anyhow::Result<Vec<NarrationAudio>> {
    payload
        .get("narrations")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("job payload missing narrations"))?
        .iter()
        .map(|v| {
            let position = v
                .get("position")
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow::anyhow!("narration entry missing position"))? as u32;
            let kind = v
                .get("kind")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("narration entry missing kind"))?;
            let kind = narration_kind_from_str(kind)?;
            let object_key = v
                .get("objectKey")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("narration entry missing objectKey"))?
                .to_string();
            let duration_sec = v
                .get("durationSec")
                .and_then(Value::as_f64)
                .ok_or_else(|| anyhow::anyhow!("narration entry missing durationSec"))?;
            Ok(NarrationAudio {
                position,
                kind,
                object_key,
                duration_sec,
            })
        })
        .collect()
}

#[async_trait::async_trait]
impl<R, Q, O, G, Sy> JobHandler for NarrateHandler<R, Q, O, G, Sy>
where
    R: Repository + 'static,
    Q: Queue + 'static,
    O: ObjectStore + 'static,
    G: ScriptGenerator + 'static,
    Sy: SpeechSynthesizer + 'static,
{
    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let digest_id = parse_digest_id(&payload)?;
        self.orchestrator.enter_stage(digest_id, QUEUE_NARRATE).await?;

        let digest = self.repo.get_digest(digest_id).await?;
        let config = self.repo.get_digest_config(digest.config_id).await?;

        let outcome = self
            .narrator
            .produce_narration(digest_id, &config, digest.clip_count)
            .await;
        match outcome {
            StageOutcome::StageFailure { kind, message } => {
                self.orchestrator.fail(digest_id, kind, &message).await?;
            }
            outcome => {
                let narrations = outcome.succeeded().expect("non-StageFailure outcome has a payload");
                self.orchestrator
                    .advance(digest_id, QUEUE_NARRATE, narrations_payload(digest_id, &narrations))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Component H, bound to [`crate::orchestrator::QUEUE_ASSEMBLE`].
pub struct AssembleHandler<R: Repository, Q: Queue, O: ObjectStore> {
    pub orchestrator: Arc<Orchestrator<R, Q>>,
    pub repo: Arc<R>,
    pub assembler: Arc<Assembler<O>>,
}

#[async_trait::async_trait]
impl<R: Repository + 'static, Q: Queue + 'static, O: ObjectStore + 'static> JobHandler for AssembleHandler<R, Q, O> {
    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let digest_id = parse_digest_id(&payload)?;
        let narrations = parse_narrations(&payload)?;
        self.orchestrator.enter_stage(digest_id, QUEUE_ASSEMBLE).await?;

        let digest = self.repo.get_digest(digest_id).await?;
        let config = self.repo.get_digest_config(digest.config_id).await?;
        let clips = self.repo.list_clips_for_digest(digest_id).await?;

        let mut sources = HashMap::new();
        for episode_id in clips.iter().map(|c| c.episode_id).collect::<std::collections::HashSet<_>>() {
            let episode = self.repo.get_episode(episode_id).await?;
            let podcast = self.repo.get_podcast(episode.podcast_id).await?;
            sources.insert(
                episode_id,
                EpisodeSource {
                    podcast_title: podcast.title,
                    episode_title: episode.title,
                    audio_url: episode.audio_url,
                },
            );
        }

        match self.assembler.assemble(digest_id, &clips, &narrations, &sources, &config).await {
            Ok(result) => {
                self.repo
                    .set_digest_audio(
                        digest_id,
                        digest.version,
                        result.audio_object_key,
                        result.total_duration_sec,
                        result.chapters,
                    )
                    .await?;
                self.orchestrator
                    .advance(digest_id, QUEUE_ASSEMBLE, digest_only_payload(digest_id))
                    .await?;
            }
            Err(message) => {
                self.orchestrator.fail(digest_id, StageFailureKind::RenderFailed, &message).await?;
            }
        }
        Ok(())
    }
}

/// Component I, bound to [`crate::orchestrator::QUEUE_DELIVER`]. Success
/// calls `complete` directly rather than `advance`: the deliverer is the
/// only stage whose success transitions `Digest.status` to `completed`
/// rather than enqueuing a next stage.
pub struct DeliverHandler<R: Repository, Q: Queue, O: ObjectStore, N: Notifier> {
    pub orchestrator: Arc<Orchestrator<R, Q>>,
    pub repo: Arc<R>,
    pub deliverer: Arc<Deliverer<R, O, N>>,
}

#[async_trait::async_trait]
impl<R: Repository + 'static, Q: Queue + 'static, O: ObjectStore + 'static, N: Notifier + 'static> JobHandler
    for DeliverHandler<R, Q, O, N>
{
    async fn handle(&self, payload: Value) -> anyhow::Result<()> {
        let digest_id = parse_digest_id(&payload)?;
        self.orchestrator.enter_stage(digest_id, QUEUE_DELIVER).await?;

        let digest = self.repo.get_digest(digest_id).await?;
        let config = self.repo.get_digest_config(digest.config_id).await?;

        match self.deliverer.deliver(&digest, &config).await {
            Ok(_result) => {
                self.orchestrator.complete(digest_id).await?;
            }
            Err(message) => {
                warn!(digest_id = %digest_id, error = %message, "delivery failed");
                self.orchestrator
                    .fail(digest_id, StageFailureKind::DeliveryFailed, &message)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_only_payload_round_trips_the_digest_id() {
        let digest_id = DigestId::new();
        let payload = digest_only_payload(digest_id);
        assert_eq!(parse_digest_id(&payload).unwrap(), digest_id);
    }

    #[test]
    fn episode_ids_payload_round_trips() {
        let digest_id = DigestId::new();
        let ids = vec![EpisodeId::new(), EpisodeId::new()];
        let payload = episode_ids_payload(digest_id, &ids);
        assert_eq!(parse_episode_ids(&payload).unwrap(), ids);
    }

    #[test]
    fn parse_digest_id_rejects_missing_field() {
        assert!(parse_digest_id(&serde_json::json!({})).is_err());
    }

    #[test]
    fn narration_round_trips_through_payload() {
        let digest_id = DigestId::new();
        let narrations = vec![NarrationAudio {
            position: 0,
            kind: NarrationKind::Intro,
            object_key: "digests/x/narration/0-intro.mp3".to_string(),
            duration_sec: 12.5,
        }];
        let payload = narrations_payload(digest_id, &narrations);
        let parsed = parse_narrations(&payload).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].position, 0);
        assert_eq!(parsed[0].kind, NarrationKind::Intro);
        assert_eq!(parsed[0].object_key, narrations[0].object_key);
        assert!((parsed[0].duration_sec - 12.5).abs() < 1e-9);
    }
}
