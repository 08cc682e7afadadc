//! Narrator (component G, §4.G).
//!
//! One LLM call produces all N+2 scripts delimited by a fixed token; one
//! TTS call per script renders it to audio. Both external calls sit behind
//! traits ([`ScriptGenerator`], [`SpeechSynthesizer`]), the same shape as
//! the Analyzer's `CandidateScorer`, so script-splitting/validation and
//! the duration-estimate fallback are pure and unit-tested without a
//! network fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use poddigest_domain::{DigestConfig, DigestId, NarrationDepth, StageFailureKind, StageOutcome};
use poddigest_state::ObjectStore;
use tracing::instrument;

use crate::retry::{retry_with_backoff, Transient};

/// Separates the N+2 scripts in the generator's single response.
pub const SCRIPT_DELIMITER: &str = "\n===SCRIPT===\n";
/// Spoken-word rate used when a TTS provider doesn't return a duration.
const FALLBACK_WORDS_PER_SECOND: f64 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationKind {
    Intro,
    Transition,
    Outro,
}

impl NarrationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NarrationKind::Intro => "intro",
            NarrationKind::Transition => "transition",
            NarrationKind::Outro => "outro",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NarrationAudio {
    pub position: u32,
    pub kind: NarrationKind,
    pub object_key: String,
    pub duration_sec: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum NarrationError {
    #[error("transient narration provider error: {0}")]
    Transient(String),
    #[error("narration provider error: {0}")]
    Fatal(String),
}

impl Transient for NarrationError {
    fn is_transient(&self) -> bool {
        matches!(self, NarrationError::Transient(_))
    }
}

#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Generate the raw, delimiter-joined response for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, NarrationError>;
}

pub struct SynthesizedSpeech {
    pub audio_bytes: Vec<u8>,
    /// `None` when the provider doesn't report duration; the caller falls
    /// back to the word-count estimate.
    pub duration_sec: Option<f64>,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, voice_id: &str, text: &str) -> Result<SynthesizedSpeech, NarrationError>;
}

/// Sentence-count bands by `narrationDepth`, used only to build the
/// generation prompt — the model, not this code, counts sentences.
fn length_guidance(depth: NarrationDepth) -> (&'static str, &'static str, &'static str) {
    match depth {
        NarrationDepth::Brief => ("2-3 sentences", "1-2 sentences (~15s spoken)", "1-2 sentences"),
        NarrationDepth::Standard => ("4-6 sentences", "2-4 sentences (~30s spoken)", "2-4 sentences"),
        NarrationDepth::Detailed => ("6-8 sentences", "4-6 sentences (~45s spoken)", "4-6 sentences"),
    }
}

/// Build the single prompt asking for all `clip_count + 2` scripts.
pub fn build_prompt(config: &DigestConfig, clip_count: usize) -> String {
    let (intro, transition, outro) = length_guidance(config.narration_depth);
    format!(
        "Write a weekly podcast digest narration for {n} clips.\n\
         Produce exactly {total} scripts separated by the literal token `{delim}`, in order:\n\
         1 intro ({intro}), {n} transitions ({transition}), 1 outro ({outro}).\n\
         Return nothing else.",
        n = clip_count,
        total = clip_count + 2,
        delim = SCRIPT_DELIMITER.trim(),
        intro = intro,
        transition = transition,
        outro = outro,
    )
}

/// Split the generator's raw response on [`SCRIPT_DELIMITER`] and require
/// exactly `expected_count` non-empty trimmed parts.
pub fn split_scripts(raw: &str, expected_count: usize) -> Option<Vec<String>> {
    let parts: Vec<String> = raw
        .split(SCRIPT_DELIMITER)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() == expected_count {
        Some(parts)
    } else {
        None
    }
}

/// `words / 2.5` fallback duration estimate.
pub fn estimate_duration_sec(text: &str) -> f64 {
    let words = text.split_whitespace().count();
    words as f64 / FALLBACK_WORDS_PER_SECOND
}

fn kind_for_position(position: u32, clip_count: u32) -> NarrationKind {
    if position == 0 {
        NarrationKind::Intro
    } else if position == clip_count + 1 {
        NarrationKind::Outro
    } else {
        NarrationKind::Transition
    }
}

pub struct Narrator<O: ObjectStore, G: ScriptGenerator, S: SpeechSynthesizer> {
    object_store: Arc<O>,
    generator: Arc<G>,
    synthesizer: Arc<S>,
}

impl<O: ObjectStore, G: ScriptGenerator, S: SpeechSynthesizer> Narrator<O, G, S> {
    pub fn new(object_store: Arc<O>, generator: Arc<G>, synthesizer: Arc<S>) -> Self {
        Self {
            object_store,
            generator,
            synthesizer,
        }
    }

    #[instrument(skip(self, config), fields(digest_id = %digest_id, clip_count))]
    pub async fn produce_narration(
        &self,
        digest_id: DigestId,
        config: &DigestConfig,
        clip_count: u32,
    ) -> StageOutcome<Vec<NarrationAudio>, u32> {
        let prompt = build_prompt(config, clip_count as usize);
        let generator = Arc::clone(&self.generator);
        let raw = match retry_with_backoff(3, Duration::from_secs(1), || {
            let generator = Arc::clone(&generator);
            let prompt = prompt.clone();
            async move { generator.generate(&prompt).await }
        })
        .await
        {
            Ok(raw) => raw,
            Err(e) => {
                return StageOutcome::StageFailure {
                    kind: StageFailureKind::MissingNarration,
                    message: format!("script generation failed: {e}"),
                }
            }
        };

        let expected = clip_count as usize + 2;
        let Some(scripts) = split_scripts(&raw, expected) else {
            return StageOutcome::StageFailure {
                kind: StageFailureKind::MissingNarration,
                message: format!("expected {expected} scripts, response did not split cleanly"),
            };
        };

        let mut audios = Vec::with_capacity(scripts.len());
        for (position, text) in scripts.into_iter().enumerate() {
            let position = position as u32;
            let kind = kind_for_position(position, clip_count);
            let synthesizer = Arc::clone(&self.synthesizer);
            let voice_id = config.voice_id.clone();
            let text_clone = text.clone();
            let speech = retry_with_backoff(3, Duration::from_secs(1), || {
                let synthesizer = Arc::clone(&synthesizer);
                let voice_id = voice_id.clone();
                let text = text_clone.clone();
                async move { synthesizer.synthesize(&voice_id, &text).await }
            })
            .await;

            let speech = match speech {
                Ok(s) => s,
                Err(e) => {
                    return StageOutcome::StageFailure {
                        kind: StageFailureKind::MissingNarration,
                        message: format!("synthesis failed for position {position}: {e}"),
                    }
                }
            };

            let duration_sec = speech.duration_sec.unwrap_or_else(|| estimate_duration_sec(&text));
            let object_key = format!("digests/{digest_id}/narration/{position}-{}.mp3", kind.as_str());
            if let Err(e) = self
                .object_store
                .put(&object_key, speech.audio_bytes, "audio/mpeg")
                .await
            {
                return StageOutcome::StageFailure {
                    kind: StageFailureKind::MissingNarration,
                    message: format!("upload failed for position {position}: {e}"),
                };
            }

            audios.push(NarrationAudio {
                position,
                kind,
                object_key,
                duration_sec,
            });
        }

        StageOutcome::Ok(audios)
    }
}
