use std::future::Future;
use std::time::Duration;

use conveyor_common::config::WorkerConfig;

use crate::queue::{KeySet, QueueClient, QueueError};
use crate::shutdown::Shutdown;

use super::ClaimedJob;

/// Attempts per commit step. A step that still fails leaves the payload in
/// the processing list, where the reaper is the backstop.
const COMMIT_ATTEMPTS: u32 = 3;

/// Success: completed list gets the original payload, then the processing
/// list and heartbeat are cleared.
pub(super) async fn success(
    queue: &QueueClient,
    keys: &KeySet,
    processing_key: &str,
    heartbeat_key: &str,
    claimed: &ClaimedJob,
) -> Result<(), QueueError> {
    with_retries("push completed", || {
        queue.push_head(&keys.completed_list, &claimed.raw)
    })
    .await?;
    clear_in_flight(queue, processing_key, heartbeat_key, &claimed.raw).await
}

/// Retry: backoff, then a version bump (`retries + 1`) is head-pushed to the
/// originating priority list before the original payload is cleared.
///
/// The backoff sleep is cancellation-aware, but a shutdown mid-sleep only
/// shortens the wait — the requeue itself always runs, otherwise the job
/// would be stranded until heartbeat expiry.
pub(super) async fn retry(
    queue: &QueueClient,
    keys: &KeySet,
    config: &WorkerConfig,
    processing_key: &str,
    heartbeat_key: &str,
    claimed: &ClaimedJob,
    shutdown: &Shutdown,
) -> Result<(), QueueError> {
    let delay = backoff_delay_ms(
        config.backoff_base_ms,
        config.backoff_max_ms,
        claimed.job.retries,
    );
    shutdown
        .sleep(Duration::from_millis(delay + backoff_jitter_ms(delay)))
        .await;

    let mut bumped = claimed.job.clone();
    bumped.retries += 1;
    let payload = bumped.to_json()?;

    // A rogue priority tag cannot requeue; treat it as undecodable and
    // dead-letter the original payload instead of losing it.
    let Some(queue_key) = keys.queue_for(&bumped.priority) else {
        tracing::error!(
            job_id = %bumped.id,
            priority = %bumped.priority,
            "Unknown priority on retry, routing to dead letter"
        );
        return dead_letter(queue, keys, processing_key, heartbeat_key, &claimed.raw).await;
    };

    with_retries("push retry", || queue.push_head(queue_key, &payload)).await?;
    clear_in_flight(queue, processing_key, heartbeat_key, &claimed.raw).await
}

/// Dead-letter: the payload lands in the DLQ with `retries` frozen at its
/// current value.
pub(super) async fn dead_letter(
    queue: &QueueClient,
    keys: &KeySet,
    processing_key: &str,
    heartbeat_key: &str,
    raw: &str,
) -> Result<(), QueueError> {
    with_retries("push dead letter", || {
        queue.push_head(&keys.dead_letter_list, raw)
    })
    .await?;
    clear_in_flight(queue, processing_key, heartbeat_key, raw).await
}

async fn clear_in_flight(
    queue: &QueueClient,
    processing_key: &str,
    heartbeat_key: &str,
    raw: &str,
) -> Result<(), QueueError> {
    let removed = with_retries("remove from processing", || {
        queue.exact_remove(processing_key, raw)
    })
    .await?;

    if removed == 0 {
        // The reaper already drained this payload; the duplicate delivery is
        // the at-least-once boundary.
        tracing::warn!(
            processing_list = %processing_key,
            "Payload missing from processing list at commit (reaper race)"
        );
        metrics::counter!("jobs.duplicate_commit").increment(1);
    }

    with_retries("clear heartbeat", || queue.delete(heartbeat_key)).await
}

/// `min(base · 2^retries, max)` in milliseconds.
pub(super) fn backoff_delay_ms(base_ms: u64, max_ms: u64, retries: u32) -> u64 {
    base_ms
        .saturating_mul(1u64.checked_shl(retries).unwrap_or(u64::MAX))
        .min(max_ms)
}

/// Jitter bounded by half the delay, hashed off the clock.
fn backoff_jitter_ms(delay_ms: u64) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::hash::DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    hasher.finish() % (delay_ms / 2 + 1)
}

async fn with_retries<T, F, Fut>(op: &str, mut call: F) -> Result<T, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueueError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= COMMIT_ATTEMPTS => {
                tracing::error!(op, attempts = attempt, error = %e, "Commit step failed");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(op, attempt, error = %e, "Commit step failed, retrying");
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        assert_eq!(backoff_delay_ms(50, 500, 0), 50);
        assert_eq!(backoff_delay_ms(50, 500, 1), 100);
        assert_eq!(backoff_delay_ms(50, 500, 2), 200);
        assert_eq!(backoff_delay_ms(50, 500, 3), 400);
        assert_eq!(backoff_delay_ms(50, 500, 4), 500);
        assert_eq!(backoff_delay_ms(50, 500, 30), 500);
    }

    #[test]
    fn test_backoff_survives_extreme_retry_counts() {
        assert_eq!(backoff_delay_ms(500, 30_000, 63), 30_000);
        assert_eq!(backoff_delay_ms(500, 30_000, 64), 30_000);
    }

    #[test]
    fn test_jitter_bounded_by_half_delay() {
        for _ in 0..64 {
            assert!(backoff_jitter_ms(400) <= 200);
        }
        assert_eq!(backoff_jitter_ms(0), 0);
    }
}
