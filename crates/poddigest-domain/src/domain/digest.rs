//! Digest — one production run, and its status state machine.

use crate::domain::ids::{ConfigId, DigestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The total order of in-progress statuses, plus the two terminal states.
/// Any state may transition to `Failed` on exception; `Completed` is only
/// reachable from `Delivering` via the deliverer's success path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestStatus {
    Pending,
    Crawling,
    Transcribing,
    Analyzing,
    Narrating,
    Assembling,
    Delivering,
    Completed,
    Failed,
}

impl DigestStatus {
    /// The ordered sequence a non-failed digest's observed statuses must be
    /// a prefix of.
    pub const ORDER: [DigestStatus; 8] = [
        DigestStatus::Pending,
        DigestStatus::Crawling,
        DigestStatus::Transcribing,
        DigestStatus::Analyzing,
        DigestStatus::Narrating,
        DigestStatus::Assembling,
        DigestStatus::Delivering,
        DigestStatus::Completed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, DigestStatus::Completed | DigestStatus::Failed)
    }

    /// The in-progress status a stage sets on entry, in order.
    pub fn next_in_order(self) -> Option<DigestStatus> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    /// Whether moving from `self` to `to` is legal: forward-in-order, or to
    /// `Failed` from any non-terminal state.
    pub fn can_transition_to(self, to: DigestStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == DigestStatus::Failed {
            return true;
        }
        self.next_in_order() == Some(to)
    }
}

/// One chapter, covering `[start_sec, end_sec)` of the rendered audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start_sec: f64,
    pub end_sec: f64,
}

/// One production run of a `DigestConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub id: DigestId,
    pub user_id: UserId,
    pub config_id: ConfigId,
    pub title: String,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub audio_object_key: Option<String>,
    pub total_duration_sec: Option<f64>,
    pub clip_count: u32,
    pub chapters: Option<Vec<Chapter>>,
    pub status: DigestStatus,
    pub error: Option<String>,
    /// Optimistic concurrency counter guarding status writes.
    pub version: u64,
    /// When this run was created; the syndication feed's item ordering key.
    pub created_at: DateTime<Utc>,
}

impl Digest {
    /// Create a new pending digest for a `trigger()` call.
    pub fn new_pending(
        user_id: UserId,
        config_id: ConfigId,
        title: String,
        week_start: DateTime<Utc>,
        week_end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DigestId::new(),
            user_id,
            config_id,
            title,
            week_start,
            week_end,
            audio_object_key: None,
            total_duration_sec: None,
            clip_count: 0,
            chapters: None,
            status: DigestStatus::Pending,
            error: None,
            version: 0,
            created_at: Utc::now(),
        }
    }

    /// `total_duration_sec` is set iff `audio_object_key` is.
    pub fn duration_key_invariant_holds(&self) -> bool {
        self.audio_object_key.is_some() == self.total_duration_sec.is_some()
    }

    /// Chapters, if present, are ordered by start time and the last one's
    /// end is clamped to the total duration.
    pub fn chapters_invariant_holds(&self) -> bool {
        let Some(chapters) = &self.chapters else {
            return true;
        };
        let Some(total) = self.total_duration_sec else {
            return false;
        };
        for pair in chapters.windows(2) {
            if pair[0].start_sec > pair[1].start_sec {
                return false;
            }
        }
        match chapters.last() {
            Some(last) => last.end_sec <= total + 1e-6,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_is_total_and_monotone() {
        use DigestStatus::*;
        assert!(Pending.can_transition_to(Crawling));
        assert!(Crawling.can_transition_to(Transcribing));
        assert!(!Pending.can_transition_to(Analyzing));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn any_non_terminal_state_can_fail() {
        use DigestStatus::*;
        assert!(Crawling.can_transition_to(Failed));
        assert!(Assembling.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states_accept_no_further_transitions() {
        use DigestStatus::*;
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
    }

    fn digest() -> Digest {
        Digest::new_pending(
            UserId::new(),
            ConfigId::new(),
            "Weekly Digest".to_string(),
            Utc::now() - chrono::Duration::days(7),
            Utc::now(),
        )
    }

    #[test]
    fn duration_and_key_must_be_set_together() {
        let mut d = digest();
        assert!(d.duration_key_invariant_holds());
        d.audio_object_key = Some("digests/x/digest.mp3".to_string());
        assert!(!d.duration_key_invariant_holds());
        d.total_duration_sec = Some(120.0);
        assert!(d.duration_key_invariant_holds());
    }

    #[test]
    fn chapters_must_respect_ordering_and_clamp() {
        let mut d = digest();
        d.total_duration_sec = Some(100.0);
        d.audio_object_key = Some("k".to_string());
        d.chapters = Some(vec![
            Chapter {
                title: "a".to_string(),
                start_sec: 0.0,
                end_sec: 40.0,
            },
            Chapter {
                title: "b".to_string(),
                start_sec: 40.0,
                end_sec: 100.0,
            },
        ]);
        assert!(d.chapters_invariant_holds());
    }

    #[test]
    fn out_of_order_chapter_starts_fail_invariant() {
        let mut d = digest();
        d.total_duration_sec = Some(100.0);
        d.chapters = Some(vec![
            Chapter {
                title: "a".to_string(),
                start_sec: 50.0,
                end_sec: 60.0,
            },
            Chapter {
                title: "b".to_string(),
                start_sec: 10.0,
                end_sec: 100.0,
            },
        ]);
        assert!(!d.chapters_invariant_holds());
    }
}
