//! Shared exponential-backoff retry helper.
//!
//! One implementation backs three call sites named in the spec: the queue
//! broker's nack path (`poddigest_state::Queue::nack`), the analyzer's
//! candidate-scoring LLM calls, and the narrator's script/TTS calls — so
//! the "transient" leg of the §7 error taxonomy is not reimplemented three
//! times.

use std::future::Future;
use std::time::Duration;

/// Whether an error is worth retrying. Call sites implement this over
/// their own error type (HTTP status, provider error code, ...).
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Retry `f` up to `max_attempts` times with `base_delay * 2^attempt`
/// backoff (capped at 30s), stopping immediately on a non-transient error.
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut f: F,
) -> Result<T, E>
where
    E: Transient,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < max_attempts && e.is_transient() => {
                let delay = base_delay * 2u32.pow(attempt.min(8));
                let delay = delay.min(Duration::from_secs(30));
                tracing::debug!(attempt, ?delay, "retrying after transient error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
