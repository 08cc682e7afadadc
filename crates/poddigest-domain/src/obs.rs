//! Structured observability hooks for digest pipeline lifecycle events.
//!
//! This module provides:
//! - Digest-scoped tracing spans via `DigestSpan` RAII guard
//! - Emission functions for key lifecycle events: trigger, stage enter,
//!   stage advance, stage failure, completion
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`). For
//! JSON output, call [`crate::telemetry::init_tracing`] with `json = true`.

use tracing::info;

/// RAII guard that enters a digest-scoped tracing span for the duration of
/// a stage invocation.
///
/// # Example
///
/// ```ignore
/// let _span = DigestSpan::enter("digest-12345", "analyze");
/// // tracing calls inside this scope are tagged with digest_id and stage
/// ```
pub struct DigestSpan {
    _span: tracing::span::EnteredSpan,
}

impl DigestSpan {
    /// Create and enter a span tagged with the digest id and stage name.
    pub fn enter(digest_id: &str, stage: &str) -> Self {
        let span = tracing::info_span!("poddigest.stage", digest_id = %digest_id, stage = %stage);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a digest was triggered.
pub fn emit_digest_triggered(digest_id: &str, user_id: &str, config_id: &str) {
    info!(
        event = "digest.triggered",
        digest_id = %digest_id,
        user_id = %user_id,
        config_id = %config_id,
    );
}

/// Emit event: a stage entered its in-progress status.
pub fn emit_stage_entered(digest_id: &str, status: &str) {
    info!(event = "digest.stage_entered", digest_id = %digest_id, status = %status);
}

/// Emit event: a stage advanced to the next stage successfully.
pub fn emit_stage_advanced(digest_id: &str, from_stage: &str, to_stage: &str) {
    info!(
        event = "digest.stage_advanced",
        digest_id = %digest_id,
        from_stage = %from_stage,
        to_stage = %to_stage,
    );
}

/// Emit event: the digest failed inside a stage.
pub fn emit_digest_failed(digest_id: &str, stage: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "digest.failed", digest_id = %digest_id, stage = %stage, error = %error);
}

/// Emit event: the digest completed successfully.
pub fn emit_digest_completed(digest_id: &str, total_duration_sec: f64, clip_count: u32) {
    info!(
        event = "digest.completed",
        digest_id = %digest_id,
        total_duration_sec = total_duration_sec,
        clip_count = clip_count,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_span_enter_does_not_panic() {
        let _span = DigestSpan::enter("test-digest-id", "analyze");
    }
}
