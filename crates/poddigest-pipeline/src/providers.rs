//! HTTP-backed implementations of the pipeline's remaining I/O boundaries:
//! the LLM call behind [`CandidateScorer`], the LLM call behind
//! [`ScriptGenerator`], the TTS call behind [`SpeechSynthesizer`], and the
//! push/email call behind [`Notifier`]. Each follows
//! [`crate::transcriber::HttpTranscriptionProvider`]'s shape: a bearer-auth
//! POST to a configured endpoint, 5xx/429 mapped to a transient error so
//! `retry_with_backoff` retries it, anything else mapped fatal.

use async_trait::async_trait;
use poddigest_domain::{Digest, ScoreDimensions, UserId};

use crate::analyzer::{CandidateScorer, ScorerError};
use crate::deliverer::{Notifier, NotifierError};
use crate::narrator::{NarrationError, ScriptGenerator, SpeechSynthesizer, SynthesizedSpeech};

fn classify_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status.as_u16() == 429
}

/// Scores one candidate excerpt against an LLM rubric endpoint.
pub struct HttpCandidateScorer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpCandidateScorer {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: String) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[derive(serde::Deserialize)]
struct ScoreResponse {
    insight_density: i32,
    emotional_intensity: i32,
    actionability: i32,
    topical_relevance: i32,
    conversational_quality: i32,
}

#[async_trait]
impl CandidateScorer for HttpCandidateScorer {
    async fn score_region(
        &self,
        episode_id: poddigest_domain::EpisodeId,
        excerpt: &str,
        start_sec: f64,
        end_sec: f64,
    ) -> Result<ScoreDimensions, ScorerError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "episode_id": episode_id.to_string(),
                "excerpt": excerpt,
                "start_sec": start_sec,
                "end_sec": end_sec,
            }))
            .send()
            .await
            .map_err(|e| ScorerError::Transient(e.to_string()))?;

        if classify_status(resp.status()) {
            return Err(ScorerError::Transient(format!("scorer returned {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(ScorerError::Fatal(format!("scorer returned {}", resp.status())));
        }

        let parsed: ScoreResponse = resp.json().await.map_err(|e| ScorerError::Fatal(e.to_string()))?;
        Ok(ScoreDimensions::clamped(
            parsed.insight_density,
            parsed.emotional_intensity,
            parsed.actionability,
            parsed.topical_relevance,
            parsed.conversational_quality,
        ))
    }
}

/// Produces the single delimiter-joined intro/transition/outro response
/// described in [`crate::narrator::build_prompt`].
pub struct HttpScriptGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpScriptGenerator {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: String) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[derive(serde::Deserialize)]
struct GenerateResponse {
    text: String,
}

#[async_trait]
impl ScriptGenerator for HttpScriptGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, NarrationError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| NarrationError::Transient(e.to_string()))?;

        if classify_status(resp.status()) {
            return Err(NarrationError::Transient(format!("generator returned {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(NarrationError::Fatal(format!("generator returned {}", resp.status())));
        }

        resp.json::<GenerateResponse>()
            .await
            .map(|r| r.text)
            .map_err(|e| NarrationError::Fatal(e.to_string()))
    }
}

/// Renders one narration script to speech bytes through a TTS endpoint.
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSpeechSynthesizer {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: String) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, voice_id: &str, text: &str) -> Result<SynthesizedSpeech, NarrationError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "voice_id": voice_id, "text": text }))
            .send()
            .await
            .map_err(|e| NarrationError::Transient(e.to_string()))?;

        if classify_status(resp.status()) {
            return Err(NarrationError::Transient(format!("synthesizer returned {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(NarrationError::Fatal(format!("synthesizer returned {}", resp.status())));
        }

        let duration_sec = resp
            .headers()
            .get("x-audio-duration-sec")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());
        let audio_bytes = resp.bytes().await.map_err(|e| NarrationError::Fatal(e.to_string()))?.to_vec();
        Ok(SynthesizedSpeech {
            audio_bytes,
            duration_sec,
        })
    }
}

/// Push/email side channel. Both methods are best-effort from the
/// deliverer's perspective; failures here are logged, never escalated.
pub struct HttpNotifier {
    client: reqwest::Client,
    push_endpoint: String,
    email_endpoint: String,
    api_key: String,
}

impl HttpNotifier {
    pub fn new(client: reqwest::Client, push_endpoint: String, email_endpoint: String, api_key: String) -> Self {
        Self {
            client,
            push_endpoint,
            email_endpoint,
            api_key,
        }
    }

    async fn post(&self, endpoint: &str, user_id: UserId, digest: &Digest) -> Result<(), NotifierError> {
        let resp = self
            .client
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "user_id": user_id.to_string(),
                "digest_id": digest.id.to_string(),
                "title": digest.title,
            }))
            .send()
            .await
            .map_err(|e| NotifierError::Failed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NotifierError::Failed(format!("notifier returned {}", resp.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_push(&self, user_id: UserId, digest: &Digest) -> Result<(), NotifierError> {
        self.post(&self.push_endpoint, user_id, digest).await
    }

    async fn send_email(&self, user_id: UserId, digest: &Digest) -> Result<(), NotifierError> {
        self.post(&self.email_endpoint, user_id, digest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_treats_server_errors_and_429_as_transient() {
        assert!(classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(!classify_status(reqwest::StatusCode::BAD_REQUEST));
        assert!(!classify_status(reqwest::StatusCode::OK));
    }
}
