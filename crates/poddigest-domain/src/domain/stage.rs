//! Stage outcome sum types.
//!
//! Every pipeline stage worker returns a `StageOutcome<T>` instead of
//! throwing: `Ok` on full success, `PerItemFailures` when some items in a
//! multi-item stage failed but at least one succeeded, and `StageFailure`
//! when the stage cannot produce its required output at all. The worker
//! harness in `poddigest-pipeline` translates this into a queue ack/nack or
//! a `Digest.status = failed` write — this type itself does no I/O.

use serde::{Deserialize, Serialize};

/// The closed set of stage-failure string codes a digest can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageFailureKind {
    NoEpisodes,
    NoTranscripts,
    NoViableClips,
    RenderFailed,
    EmptyTranscript,
    MissingNarration,
    DeliveryFailed,
}

impl StageFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageFailureKind::NoEpisodes => "no-episodes",
            StageFailureKind::NoTranscripts => "no-transcripts",
            StageFailureKind::NoViableClips => "no-viable-clips",
            StageFailureKind::RenderFailed => "render-failed",
            StageFailureKind::EmptyTranscript => "empty-transcript",
            StageFailureKind::MissingNarration => "missing-narration",
            StageFailureKind::DeliveryFailed => "delivery-failed",
        }
    }
}

impl std::fmt::Display for StageFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A per-item failure collected inside a multi-item stage (one episode's
/// transcript came back empty, one region's scoring finally failed, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure<K> {
    pub key: K,
    pub reason: String,
}

/// Outcome of running one stage for one digest.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T, K> {
    /// Every item succeeded.
    Ok(T),
    /// At least one item succeeded; the rest are recorded and skipped.
    PerItemFailures {
        succeeded: T,
        failures: Vec<ItemFailure<K>>,
    },
    /// The stage cannot produce its required output; the digest fails.
    StageFailure {
        kind: StageFailureKind,
        message: String,
    },
}

impl<T, K> StageOutcome<T, K> {
    /// The successful payload, whether total or partial, if the stage did
    /// not fail outright.
    pub fn succeeded(self) -> Option<T> {
        match self {
            StageOutcome::Ok(t) => Some(t),
            StageOutcome::PerItemFailures { succeeded, .. } => Some(succeeded),
            StageOutcome::StageFailure { .. } => None,
        }
    }

    pub fn is_stage_failure(&self) -> bool {
        matches!(self, StageOutcome::StageFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_renders_the_spec_string_codes() {
        assert_eq!(StageFailureKind::NoEpisodes.as_str(), "no-episodes");
        assert_eq!(StageFailureKind::NoViableClips.as_str(), "no-viable-clips");
        assert_eq!(StageFailureKind::RenderFailed.to_string(), "render-failed");
    }

    #[test]
    fn per_item_failures_still_yields_the_succeeded_payload() {
        let outcome: StageOutcome<Vec<u32>, u32> = StageOutcome::PerItemFailures {
            succeeded: vec![1, 2, 3],
            failures: vec![ItemFailure {
                key: 4,
                reason: "empty-transcript".to_string(),
            }],
        };
        assert!(!outcome.is_stage_failure());
        assert_eq!(outcome.succeeded(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn stage_failure_has_no_succeeded_payload() {
        let outcome: StageOutcome<Vec<u32>, u32> = StageOutcome::StageFailure {
            kind: StageFailureKind::NoViableClips,
            message: "no candidates scored >= 40".to_string(),
        };
        assert!(outcome.is_stage_failure());
        assert_eq!(outcome.succeeded(), None);
    }
}
