//! PodDigest domain library.
//!
//! Canonical data model, error taxonomy, and observability primitives
//! shared by every other crate in the workspace. Contains no I/O: storage
//! (`poddigest-state`) and stage execution (`poddigest-pipeline`) depend on
//! this crate, not the other way around.

pub mod domain;
pub mod metrics;
pub mod obs;
pub mod telemetry;

pub use domain::{
    escape_xml, format_hhmmss, parse_duration_seconds, unescape_xml, Chapter, ClipId,
    ClipLengthPreference, ConfigId, DeliveryMethod, Digest, DigestClip, DigestConfig, DigestId,
    DigestStatus, DomainError, Episode, EpisodeId, FeedbackTag, ItemFailure, NarrationDepth,
    Podcast, PodcastId, Priority, Result, ScoreDimensions, StageFailureKind, StageOutcome, Structure,
    Subscription, TargetLengthMinutes, Transcript, TranscriptSegment, TranscriptStatus,
    TransitionStyle, UserId,
};

pub use metrics::METRICS;
pub use obs::{
    emit_digest_completed, emit_digest_failed, emit_digest_triggered, emit_stage_advanced,
    emit_stage_entered, DigestSpan,
};
pub use telemetry::init_tracing;

/// PodDigest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
