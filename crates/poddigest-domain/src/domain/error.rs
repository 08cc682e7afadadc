//! Domain-level error taxonomy for the PodDigest pipeline.
//!
//! Mirrors the pipeline's four-part error model: `transient` and
//! `per-item` failures are handled inline by stage workers (see
//! `StageOutcome` in `stage.rs`) and never reach this type. `DomainError`
//! covers `contract` violations — invariant breaks that must fail the
//! digest outright — plus validation and serialization failures shared
//! across crates.

use thiserror::Error;

/// Crate-wide domain errors.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid digest config: {0}")]
    InvalidConfig(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("status transition rejected: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type for domain-level operations.
pub type Result<T> = std::result::Result<T, DomainError>;
