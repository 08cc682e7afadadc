//! Episode and transcript entities.

use crate::domain::ids::{EpisodeId, PodcastId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic transcription lifecycle for an episode: advances
/// `pending` -> `processing` -> `{completed | failed}` and never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TranscriptStatus {
    /// Whether `next` is a legal forward move from `self`.
    pub fn can_advance_to(self, next: TranscriptStatus) -> bool {
        use TranscriptStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

/// A discovered item in a podcast feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub podcast_id: PodcastId,
    pub title: String,
    pub audio_url: String,
    pub published_at: DateTime<Utc>,
    pub duration_sec: u64,
    /// Unique within a podcast: `(podcast_id, guid)`.
    pub guid: String,
    pub transcript_status: TranscriptStatus,
}

/// One segment of a word-level, diarized transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub speaker_tag: Option<String>,
    pub text: String,
}

/// At most one per episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub episode_id: EpisodeId,
    pub full_text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
    pub status: TranscriptStatus,
    pub error: Option<String>,
}

impl Transcript {
    /// Validate that segment timestamps are non-decreasing and every
    /// segment ends at or before the episode's known duration.
    pub fn validate_against_episode_duration(&self, episode_duration_sec: u64) -> bool {
        let mut last_start = f64::NEG_INFINITY;
        for seg in &self.segments {
            if seg.start_sec < last_start || seg.end_sec < seg.start_sec {
                return false;
            }
            if seg.end_sec > episode_duration_sec as f64 {
                return false;
            }
            last_start = seg.start_sec;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_status_advances_monotonically() {
        use TranscriptStatus::*;
        assert!(Pending.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Completed));
        assert!(!Completed.can_advance_to(Pending));
        assert!(!Processing.can_advance_to(Pending));
    }

    fn segment(start: f64, end: f64) -> TranscriptSegment {
        TranscriptSegment {
            start_sec: start,
            end_sec: end,
            speaker_tag: None,
            text: "hello".to_string(),
        }
    }

    #[test]
    fn valid_transcript_passes_duration_check() {
        let t = Transcript {
            episode_id: EpisodeId::new(),
            full_text: "hello world".to_string(),
            segments: vec![segment(0.0, 2.0), segment(2.0, 5.0)],
            language: "en".to_string(),
            status: TranscriptStatus::Completed,
            error: None,
        };
        assert!(t.validate_against_episode_duration(10));
    }

    #[test]
    fn segment_past_episode_duration_fails_check() {
        let t = Transcript {
            episode_id: EpisodeId::new(),
            full_text: "hello world".to_string(),
            segments: vec![segment(0.0, 2.0), segment(2.0, 50.0)],
            language: "en".to_string(),
            status: TranscriptStatus::Completed,
            error: None,
        };
        assert!(!t.validate_against_episode_duration(10));
    }

    #[test]
    fn decreasing_start_times_fail_check() {
        let t = Transcript {
            episode_id: EpisodeId::new(),
            full_text: "hello world".to_string(),
            segments: vec![segment(5.0, 8.0), segment(2.0, 4.0)],
            language: "en".to_string(),
            status: TranscriptStatus::Completed,
            error: None,
        };
        assert!(!t.validate_against_episode_duration(10));
    }
}
