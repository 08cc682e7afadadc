//! Per-user digest production preferences.

use crate::domain::ids::{ConfigId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipLengthPreference {
    Short,
    Medium,
    Long,
    Mixed,
}

impl ClipLengthPreference {
    /// `[lo, hi]` seconds range for a clip of this preference.
    pub fn range_seconds(self) -> (f64, f64) {
        match self {
            ClipLengthPreference::Short => (120.0, 240.0),
            ClipLengthPreference::Medium => (240.0, 480.0),
            ClipLengthPreference::Long => (480.0, 900.0),
            ClipLengthPreference::Mixed => (120.0, 900.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Structure {
    ByScore,
    ByShow,
    ByTopic,
    Chronological,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationDepth {
    Brief,
    Standard,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStyle {
    Stinger,
    SoftFade,
    Whoosh,
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Syndication,
    Push,
    Email,
    InApp,
}

/// `targetLengthMinutes` is constrained to one of four values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum TargetLengthMinutes {
    Thirty = 30,
    Sixty = 60,
    Ninety = 90,
    OneTwenty = 120,
}

impl TargetLengthMinutes {
    pub fn as_seconds(self) -> f64 {
        (self as u16 as f64) * 60.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestConfig {
    pub id: ConfigId,
    pub user_id: UserId,
    pub target_length_minutes: TargetLengthMinutes,
    pub clip_length_preference: ClipLengthPreference,
    pub structure: Structure,
    /// `[0, 100]`.
    pub breadth_depth: u8,
    pub voice_id: String,
    pub narration_depth: NarrationDepth,
    pub music_style: Option<String>,
    pub transition_style: TransitionStyle,
    /// ISO weekday, 1 = Monday .. 7 = Sunday, compared in UTC.
    pub delivery_day: u8,
    pub delivery_hour_utc: u8,
    pub delivery_minute_utc: u8,
    pub delivery_method: DeliveryMethod,
    pub is_active: bool,
}

impl DigestConfig {
    /// `b = breadthDepth / 100` as used throughout §4.F.
    pub fn breadth_fraction(&self) -> f64 {
        (self.breadth_depth.min(100) as f64) / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_length_ranges_match_spec_table() {
        assert_eq!(ClipLengthPreference::Short.range_seconds(), (120.0, 240.0));
        assert_eq!(ClipLengthPreference::Medium.range_seconds(), (240.0, 480.0));
        assert_eq!(ClipLengthPreference::Long.range_seconds(), (480.0, 900.0));
        assert_eq!(ClipLengthPreference::Mixed.range_seconds(), (120.0, 900.0));
    }

    #[test]
    fn target_length_converts_to_seconds() {
        assert_eq!(TargetLengthMinutes::Thirty.as_seconds(), 1800.0);
        assert_eq!(TargetLengthMinutes::Sixty.as_seconds(), 3600.0);
    }

    #[test]
    fn breadth_fraction_clamps_to_unit_interval() {
        let mut cfg = sample_config();
        cfg.breadth_depth = 50;
        assert_eq!(cfg.breadth_fraction(), 0.5);
        cfg.breadth_depth = 255; // out-of-range input clamps, never panics
        assert_eq!(cfg.breadth_fraction(), 1.0);
    }

    fn sample_config() -> DigestConfig {
        DigestConfig {
            id: ConfigId::new(),
            user_id: UserId::new(),
            target_length_minutes: TargetLengthMinutes::Sixty,
            clip_length_preference: ClipLengthPreference::Medium,
            structure: Structure::ByScore,
            breadth_depth: 50,
            voice_id: "voice-1".to_string(),
            narration_depth: NarrationDepth::Standard,
            music_style: None,
            transition_style: TransitionStyle::Silence,
            delivery_day: 1,
            delivery_hour_utc: 9,
            delivery_minute_utc: 0,
            delivery_method: DeliveryMethod::Syndication,
            is_active: true,
        }
    }
}
