use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use conveyor_common::config::ReaperConfig;
use conveyor_common::types::Job;

use crate::queue::{KeySet, QueueClient, QueueError};
use crate::shutdown::Shutdown;

/// Spawn the reaper as a background task. One per process.
///
/// Restores the orphan invariant: a processing list may only be non-empty
/// while its worker's heartbeat exists. When the heartbeat is gone, the
/// list's payloads go back to their priority lists.
pub fn spawn_reaper(
    queue: Arc<QueueClient>,
    keys: Arc<KeySet>,
    config: ReaperConfig,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(reaper_loop(queue, keys, config, shutdown))
}

async fn reaper_loop(
    queue: Arc<QueueClient>,
    keys: Arc<KeySet>,
    config: ReaperConfig,
    shutdown: Shutdown,
) {
    tracing::info!(
        interval_seconds = config.interval_seconds,
        "Reaper started"
    );

    while !shutdown.is_shutdown() {
        match run_pass(&queue, &keys, &config).await {
            Ok(stats) if stats.rescued > 0 => {
                tracing::info!(
                    rescued = stats.rescued,
                    orphaned_lists = stats.orphaned_lists,
                    "Reaper pass rescued jobs"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Reaper pass failed");
            }
        }

        shutdown.sleep(jittered_interval(config.interval_seconds)).await;
    }

    tracing::info!("Reaper stopped");
}

#[derive(Debug, Default)]
struct PassStats {
    rescued: u32,
    orphaned_lists: u32,
}

/// One bounded pass over the processing-list keyspace.
///
/// Bounds: SCAN page size, a wall-clock budget, and a rescue cap — a single
/// pass during mass recovery must not monopolize Redis. Whatever is left
/// resumes on the next interval.
async fn run_pass(
    queue: &QueueClient,
    keys: &KeySet,
    config: &ReaperConfig,
) -> Result<PassStats, QueueError> {
    let deadline = Instant::now() + Duration::from_millis(config.pass_budget_ms);
    let pattern = keys.processing_scan_pattern();
    let mut stats = PassStats::default();
    let mut cursor = 0u64;

    loop {
        let (next_cursor, page) = queue
            .scan_page(cursor, &pattern, config.scan_page_size)
            .await?;

        for list_key in page {
            if Instant::now() >= deadline || stats.rescued >= config.max_rescue_per_pass {
                return Ok(stats);
            }

            let Some(worker_id) = keys.worker_id_from_processing_key(&list_key) else {
                continue;
            };

            if queue.exists(&keys.heartbeat_key_for(worker_id)).await? {
                // Worker is alive; its list is its own business.
                continue;
            }

            stats.orphaned_lists += 1;
            drain_orphan(queue, keys, config, &list_key, deadline, &mut stats).await?;
        }

        if next_cursor == 0 {
            return Ok(stats);
        }
        cursor = next_cursor;
    }
}

/// Drain one orphaned processing list tail-to-head, routing each payload
/// back to its priority list. The list auto-deletes once empty.
async fn drain_orphan(
    queue: &QueueClient,
    keys: &KeySet,
    config: &ReaperConfig,
    list_key: &str,
    deadline: Instant,
    stats: &mut PassStats,
) -> Result<(), QueueError> {
    while stats.rescued < config.max_rescue_per_pass && Instant::now() < deadline {
        let Some(payload) = queue.pop_tail(list_key).await? else {
            return Ok(());
        };

        let destination = Job::from_json(&payload)
            .ok()
            .and_then(|job| keys.queue_for(&job.priority).map(str::to_string));

        match destination {
            Some(queue_key) => {
                queue.push_head(&queue_key, &payload).await?;
                stats.rescued += 1;
                metrics::counter!("jobs.rescued").increment(1);
                tracing::info!(
                    from = %list_key,
                    to = %queue_key,
                    "Rescued orphaned job"
                );
            }
            None => {
                // Undecodable or unknown priority: dead-letter rather than
                // drop or loop forever.
                queue.push_head(&keys.dead_letter_list, &payload).await?;
                stats.rescued += 1;
                metrics::counter!("jobs.invalid").increment(1);
                tracing::error!(
                    from = %list_key,
                    "Orphaned payload with no routable priority, dead-lettered"
                );
            }
        }
    }

    Ok(())
}

/// `interval ± 25%` so reapers on many hosts do not phase-lock their scans.
fn jittered_interval(interval_seconds: u64) -> Duration {
    use std::hash::{Hash, Hasher};
    let base_ms = interval_seconds.saturating_mul(1000);
    let spread = base_ms / 2;
    if spread == 0 {
        return Duration::from_millis(base_ms.max(100));
    }
    let mut hasher = std::hash::DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    let offset = hasher.finish() % spread;
    Duration::from_millis(base_ms - spread / 2 + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jittered_interval_within_quarter_bounds() {
        for _ in 0..64 {
            let interval = jittered_interval(8);
            assert!(interval >= Duration::from_millis(6000));
            assert!(interval < Duration::from_millis(10_000));
        }
    }

    #[test]
    fn test_jittered_interval_zero_floor() {
        assert!(jittered_interval(0) >= Duration::from_millis(100));
    }
}
