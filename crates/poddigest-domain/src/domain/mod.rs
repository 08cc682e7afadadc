//! Domain models for PodDigest.
//!
//! Canonical definitions for the core entities named in the data model:
//! Podcast, Subscription, Episode, Transcript, DigestConfig, Digest, and
//! DigestClip — plus the shared error taxonomy and stage-outcome sum type
//! used by every pipeline stage.

pub mod clip;
pub mod config;
pub mod digest;
pub mod duration;
pub mod episode;
pub mod error;
pub mod ids;
pub mod podcast;
pub mod rss;
pub mod stage;

pub use clip::{DigestClip, FeedbackTag, ScoreDimensions};
pub use config::{
    ClipLengthPreference, DeliveryMethod, DigestConfig, NarrationDepth, Structure,
    TargetLengthMinutes, TransitionStyle,
};
pub use digest::{Chapter, Digest, DigestStatus};
pub use duration::{format_hhmmss, parse_duration_seconds};
pub use episode::{Episode, Transcript, TranscriptSegment, TranscriptStatus};
pub use error::{DomainError, Result};
pub use ids::{ClipId, ConfigId, DigestId, EpisodeId, PodcastId, UserId};
pub use podcast::{Podcast, Priority, Subscription};
pub use rss::{escape_xml, unescape_xml};
pub use stage::{ItemFailure, StageFailureKind, StageOutcome};
