//! Transcriber (component E, §4.E).
//!
//! A thin driver over an external diarizing speech-to-text provider. The
//! provider is isolated behind [`TranscriptionProvider`] so the three
//! segment-construction strategies below can be unit-tested as plain
//! functions over a fixture response, the way the teacher keeps pure
//! decision logic (`gate::evaluate_gate`) separate from the I/O shell
//! around it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use poddigest_domain::{
    Episode, EpisodeId, ItemFailure, StageFailureKind, StageOutcome, Transcript, TranscriptSegment,
    TranscriptStatus,
};
use poddigest_state::Repository;
use tracing::{instrument, warn};

use crate::retry::{retry_with_backoff, Transient};

#[derive(Debug, Clone)]
pub struct ProviderUtterance {
    pub start_sec: f64,
    pub end_sec: f64,
    pub speaker_tag: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ProviderParagraph {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ProviderWord {
    pub start_sec: f64,
    pub end_sec: f64,
    pub speaker_tag: Option<String>,
    pub text: String,
}

/// Normalized shape returned by a provider: every field a parsing strategy
/// might need, since the three strategies are tried in priority order and
/// only one of these need actually be populated by a given provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub language: String,
    pub utterances: Vec<ProviderUtterance>,
    pub paragraphs: Vec<ProviderParagraph>,
    pub words: Vec<ProviderWord>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned an error: {0}")]
    Provider(String),
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Result<ProviderResponse, ProviderError>;
}

/// Generic diarizing STT endpoint accessed over HTTP. The wire shape is
/// provider-specific; this sends the source URL and polls for a JSON
/// result rather than downloading the audio itself (the spec requires
/// streamed, not-downloaded-to-disk input).
pub struct HttpTranscriptionProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTranscriptionProvider {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: String) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl TranscriptionProvider for HttpTranscriptionProvider {
    async fn transcribe(&self, audio_url: &str) -> Result<ProviderResponse, ProviderError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "audio_url": audio_url }))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if resp.status().is_server_error() || resp.status().as_u16() == 429 {
            return Err(ProviderError::Transport(format!(
                "provider returned {}",
                resp.status()
            )));
        }
        if !resp.status().is_success() {
            return Err(ProviderError::Provider(format!(
                "provider returned {}",
                resp.status()
            )));
        }

        resp.json::<ProviderResponse>()
            .await
            .map_err(|e| ProviderError::Provider(e.to_string()))
    }
}

// serde impls kept minimal and hand-written rather than deriving, since
// the wire shape is a thin internal contract, not something the provider
// itself defines a schema for.
impl<'de> serde::Deserialize<'de> for ProviderResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct Raw {
            #[serde(default)]
            language: String,
            #[serde(default)]
            utterances: Vec<RawUtterance>,
            #[serde(default)]
            paragraphs: Vec<RawParagraph>,
            #[serde(default)]
            words: Vec<RawWord>,
        }
        #[derive(serde::Deserialize)]
        struct RawUtterance {
            start_sec: f64,
            end_sec: f64,
            speaker_tag: Option<String>,
            text: String,
        }
        #[derive(serde::Deserialize)]
        struct RawParagraph {
            start_sec: f64,
            end_sec: f64,
            text: String,
        }
        #[derive(serde::Deserialize)]
        struct RawWord {
            start_sec: f64,
            end_sec: f64,
            speaker_tag: Option<String>,
            text: String,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(ProviderResponse {
            language: if raw.language.is_empty() {
                "en".to_string()
            } else {
                raw.language
            },
            utterances: raw
                .utterances
                .into_iter()
                .map(|u| ProviderUtterance {
                    start_sec: u.start_sec,
                    end_sec: u.end_sec,
                    speaker_tag: u.speaker_tag,
                    text: u.text,
                })
                .collect(),
            paragraphs: raw
                .paragraphs
                .into_iter()
                .map(|p| ProviderParagraph {
                    start_sec: p.start_sec,
                    end_sec: p.end_sec,
                    text: p.text,
                })
                .collect(),
            words: raw
                .words
                .into_iter()
                .map(|w| ProviderWord {
                    start_sec: w.start_sec,
                    end_sec: w.end_sec,
                    speaker_tag: w.speaker_tag,
                    text: w.text,
                })
                .collect(),
        })
    }
}

/// Strategy 1: utterance boundaries from the provider, used as-is.
pub fn segments_from_utterances(utterances: &[ProviderUtterance]) -> Vec<TranscriptSegment> {
    utterances
        .iter()
        .map(|u| TranscriptSegment {
            start_sec: u.start_sec,
            end_sec: u.end_sec,
            speaker_tag: u.speaker_tag.clone(),
            text: u.text.clone(),
        })
        .collect()
}

/// Strategy 2: paragraph groupings, used as-is (no speaker tag available).
pub fn segments_from_paragraphs(paragraphs: &[ProviderParagraph]) -> Vec<TranscriptSegment> {
    paragraphs
        .iter()
        .map(|p| TranscriptSegment {
            start_sec: p.start_sec,
            end_sec: p.end_sec,
            speaker_tag: None,
            text: p.text.clone(),
        })
        .collect()
}

/// Strategy 3 (fallback): coalesce consecutive words sharing a speaker tag
/// into one segment.
pub fn segments_from_words_coalesced(words: &[ProviderWord]) -> Vec<TranscriptSegment> {
    let mut segments: Vec<TranscriptSegment> = Vec::new();
    for word in words {
        match segments.last_mut() {
            Some(seg) if seg.speaker_tag == word.speaker_tag => {
                seg.end_sec = word.end_sec;
                seg.text.push(' ');
                seg.text.push_str(&word.text);
            }
            _ => segments.push(TranscriptSegment {
                start_sec: word.start_sec,
                end_sec: word.end_sec,
                speaker_tag: word.speaker_tag.clone(),
                text: word.text.clone(),
            }),
        }
    }
    segments
}

/// Apply the three strategies in priority order; the first to yield at
/// least one segment wins.
pub fn build_segments(response: &ProviderResponse) -> Vec<TranscriptSegment> {
    let utterances = segments_from_utterances(&response.utterances);
    if !utterances.is_empty() {
        return utterances;
    }
    let paragraphs = segments_from_paragraphs(&response.paragraphs);
    if !paragraphs.is_empty() {
        return paragraphs;
    }
    segments_from_words_coalesced(&response.words)
}

pub struct Transcriber<R: Repository, P: TranscriptionProvider> {
    repo: Arc<R>,
    provider: Arc<P>,
    max_attempts: u32,
}

impl<R: Repository, P: TranscriptionProvider> Transcriber<R, P> {
    pub fn new(repo: Arc<R>, provider: Arc<P>) -> Self {
        Self {
            repo,
            provider,
            max_attempts: 3,
        }
    }

    /// Transcribe one episode, short-circuiting if a completed transcript
    /// already exists (idempotent consumer, §9).
    #[instrument(skip(self), fields(episode_id = %episode_id))]
    async fn transcribe_one(&self, episode_id: EpisodeId) -> Result<(), String> {
        if self
            .repo
            .find_completed_transcript(episode_id)
            .await
            .map_err(|e| e.to_string())?
            .is_some()
        {
            return Ok(());
        }

        let episode: Episode = self.repo.get_episode(episode_id).await.map_err(|e| e.to_string())?;

        let provider = Arc::clone(&self.provider);
        let audio_url = episode.audio_url.clone();
        let response = retry_with_backoff(self.max_attempts, Duration::from_secs(1), || {
            let provider = Arc::clone(&provider);
            let audio_url = audio_url.clone();
            async move { provider.transcribe(&audio_url).await }
        })
        .await
        .map_err(|e| e.to_string())?;

        let segments = build_segments(&response);
        if segments.is_empty() {
            let transcript = Transcript {
                episode_id,
                full_text: String::new(),
                segments: Vec::new(),
                language: response.language.clone(),
                status: TranscriptStatus::Failed,
                error: Some(StageFailureKind::EmptyTranscript.as_str().to_string()),
            };
            self.repo.upsert_transcript(&transcript).await.map_err(|e| e.to_string())?;
            self.advance_episode_status(episode, TranscriptStatus::Failed).await?;
            return Err(StageFailureKind::EmptyTranscript.as_str().to_string());
        }

        let full_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let transcript = Transcript {
            episode_id,
            full_text,
            segments,
            language: response.language,
            status: TranscriptStatus::Completed,
            error: None,
        };
        if !transcript.validate_against_episode_duration(episode.duration_sec) {
            warn!(episode_id = %episode_id, "transcript segments exceed episode duration");
        }
        self.repo.upsert_transcript(&transcript).await.map_err(|e| e.to_string())?;
        self.advance_episode_status(episode, TranscriptStatus::Completed).await?;
        Ok(())
    }

    async fn advance_episode_status(&self, mut episode: Episode, status: TranscriptStatus) -> Result<(), String> {
        episode.transcript_status = status;
        self.repo.upsert_episode(&episode).await.map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Process a batch of episode ids sequentially (§5: transcriber
    /// processes episodes sequentially inside one stage job). Per-episode
    /// failures are collected; the stage only fails if zero succeed.
    pub async fn transcribe_batch(
        &self,
        episode_ids: Vec<EpisodeId>,
    ) -> StageOutcome<Vec<EpisodeId>, EpisodeId> {
        let mut succeeded = Vec::new();
        let mut failures = Vec::new();

        for episode_id in episode_ids {
            match self.transcribe_one(episode_id).await {
                Ok(()) => succeeded.push(episode_id),
                Err(reason) => failures.push(ItemFailure {
                    key: episode_id,
                    reason,
                }),
            }
        }

        if succeeded.is_empty() {
            return StageOutcome::StageFailure {
                kind: StageFailureKind::NoTranscripts,
                message: "0 of the batch's episodes produced a transcript".to_string(),
            };
        }

        if failures.is_empty() {
            StageOutcome::Ok(succeeded)
        } else {
            StageOutcome::PerItemFailures { succeeded, failures }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utterance(start: f64, end: f64, speaker: &str, text: &str) -> ProviderUtterance {
        ProviderUtterance {
            start_sec: start,
            end_sec: end,
            speaker_tag: Some(speaker.to_string()),
            text: text.to_string(),
        }
    }

    fn word(start: f64, end: f64, speaker: &str, text: &str) -> ProviderWord {
        ProviderWord {
            start_sec: start,
            end_sec: end,
            speaker_tag: Some(speaker.to_string()),
            text: text.to_string(),
        }
    }

    #[test]
    fn utterance_strategy_wins_when_present() {
        let response = ProviderResponse {
            language: "en".to_string(),
            utterances: vec![utterance(0.0, 3.0, "A", "hello there")],
            paragraphs: vec![ProviderParagraph {
                start_sec: 0.0,
                end_sec: 3.0,
                text: "ignored".to_string(),
            }],
            words: vec![],
        };
        let segments = build_segments(&response);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello there");
    }

    #[test]
    fn falls_back_to_paragraphs_when_no_utterances() {
        let response = ProviderResponse {
            language: "en".to_string(),
            utterances: vec![],
            paragraphs: vec![ProviderParagraph {
                start_sec: 0.0,
                end_sec: 5.0,
                text: "paragraph text".to_string(),
            }],
            words: vec![],
        };
        let segments = build_segments(&response);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "paragraph text");
    }

    #[test]
    fn coalesces_consecutive_words_by_speaker_tag() {
        let words = vec![
            word(0.0, 0.5, "A", "hi"),
            word(0.5, 1.0, "A", "there"),
            word(1.0, 1.5, "B", "hello"),
        ];
        let segments = segments_from_words_coalesced(&words);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "hi there");
        assert_eq!(segments[0].end_sec, 1.0);
        assert_eq!(segments[1].text, "hello");
    }

    #[test]
    fn empty_response_yields_zero_segments() {
        let response = ProviderResponse::default();
        assert!(build_segments(&response).is_empty());
    }
}
