//! DigestClip — a selected excerpt, and its five-dimension score.

use crate::domain::ids::{ClipId, DigestId, EpisodeId};
use serde::{Deserialize, Serialize};

/// The five weighted scoring dimensions, each clamped to `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreDimensions {
    pub insight_density: u8,
    pub emotional_intensity: u8,
    pub actionability: u8,
    pub topical_relevance: u8,
    pub conversational_quality: u8,
}

impl ScoreDimensions {
    pub const WEIGHT_INSIGHT_DENSITY: f64 = 0.25;
    pub const WEIGHT_EMOTIONAL_INTENSITY: f64 = 0.20;
    pub const WEIGHT_ACTIONABILITY: f64 = 0.20;
    pub const WEIGHT_TOPICAL_RELEVANCE: f64 = 0.20;
    pub const WEIGHT_CONVERSATIONAL_QUALITY: f64 = 0.15;

    /// Build from raw (possibly out-of-range) values, clamping each to
    /// `[0, 100]`.
    pub fn clamped(
        insight_density: i32,
        emotional_intensity: i32,
        actionability: i32,
        topical_relevance: i32,
        conversational_quality: i32,
    ) -> Self {
        let clamp = |v: i32| v.clamp(0, 100) as u8;
        Self {
            insight_density: clamp(insight_density),
            emotional_intensity: clamp(emotional_intensity),
            actionability: clamp(actionability),
            topical_relevance: clamp(topical_relevance),
            conversational_quality: clamp(conversational_quality),
        }
    }

    /// `score = 0.25*i + 0.20*e + 0.20*a + 0.20*r + 0.15*q`.
    pub fn weighted_score(&self) -> f64 {
        Self::WEIGHT_INSIGHT_DENSITY * self.insight_density as f64
            + Self::WEIGHT_EMOTIONAL_INTENSITY * self.emotional_intensity as f64
            + Self::WEIGHT_ACTIONABILITY * self.actionability as f64
            + Self::WEIGHT_TOPICAL_RELEVANCE * self.topical_relevance as f64
            + Self::WEIGHT_CONVERSATIONAL_QUALITY * self.conversational_quality as f64
    }
}

/// Tag a listener can apply to a delivered clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTag {
    Up,
    Down,
}

/// A selected excerpt belonging exclusively to one digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestClip {
    pub id: ClipId,
    pub digest_id: DigestId,
    pub episode_id: EpisodeId,
    pub start_sec: f64,
    pub end_sec: f64,
    pub score: f64,
    pub score_dimensions: ScoreDimensions,
    /// 0-based, dense within a digest.
    pub position: u32,
    pub feedback_tag: Option<FeedbackTag>,
}

impl DigestClip {
    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }

    /// Whether `self` and `other` overlap in time, given they belong to the
    /// same episode (the no-overlap invariant only applies per-episode).
    pub fn overlaps(&self, other: &DigestClip) -> bool {
        self.episode_id == other.episode_id
            && self.start_sec < other.end_sec
            && other.start_sec < self.end_sec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_score_matches_spec_formula() {
        let dims = ScoreDimensions {
            insight_density: 80,
            emotional_intensity: 60,
            actionability: 70,
            topical_relevance: 90,
            conversational_quality: 50,
        };
        let expected = 0.25 * 80.0 + 0.20 * 60.0 + 0.20 * 70.0 + 0.20 * 90.0 + 0.15 * 50.0;
        assert!((dims.weighted_score() - expected).abs() < 1e-9);
    }

    #[test]
    fn clamped_rejects_out_of_range_inputs() {
        let dims = ScoreDimensions::clamped(150, -10, 50, 50, 50);
        assert_eq!(dims.insight_density, 100);
        assert_eq!(dims.emotional_intensity, 0);
    }

    fn clip(episode: EpisodeId, start: f64, end: f64) -> DigestClip {
        DigestClip {
            id: ClipId::new(),
            digest_id: DigestId::new(),
            episode_id: episode,
            start_sec: start,
            end_sec: end,
            score: 80.0,
            score_dimensions: ScoreDimensions::clamped(80, 80, 80, 80, 80),
            position: 0,
            feedback_tag: None,
        }
    }

    #[test]
    fn overlapping_clips_in_same_episode_detected() {
        let ep = EpisodeId::new();
        let a = clip(ep, 0.0, 100.0);
        let b = clip(ep, 50.0, 150.0);
        assert!(a.overlaps(&b));
    }

    #[test]
    fn adjacent_non_overlapping_clips_are_not_overlapping() {
        let ep = EpisodeId::new();
        let a = clip(ep, 0.0, 100.0);
        let b = clip(ep, 100.0, 150.0);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn clips_in_different_episodes_never_overlap() {
        let a = clip(EpisodeId::new(), 0.0, 100.0);
        let b = clip(EpisodeId::new(), 0.0, 100.0);
        assert!(!a.overlaps(&b));
    }
}
