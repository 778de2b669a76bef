use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use conveyor_common::config::ProducerConfig;
use conveyor_common::types::Job;

use crate::queue::{KeySet, QueueClient};
use crate::shutdown::Shutdown;

/// A discovered work item handed to the producer. Scanning and filtering
/// happen outside the core.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct Discovered {
    pub filepath: String,
    pub filesize: u64,
}

/// Converts discovered items into job records and appends them to the
/// owning priority list, honoring the global enqueue rate shared by all
/// producer replicas through the Redis window counter.
pub struct Producer {
    queue: Arc<QueueClient>,
    keys: Arc<KeySet>,
    config: ProducerConfig,
    /// First configured priority — the destination for matched extensions.
    top_priority: String,
    shutdown: Shutdown,
}

impl Producer {
    pub fn new(
        queue: Arc<QueueClient>,
        keys: Arc<KeySet>,
        config: ProducerConfig,
        priorities: &[String],
        shutdown: Shutdown,
    ) -> Self {
        let top_priority = priorities
            .first()
            .cloned()
            .unwrap_or_else(|| config.default_priority.clone());
        Self {
            queue,
            keys,
            config,
            top_priority,
            shutdown,
        }
    }

    /// Consume discovered items until the channel closes or shutdown.
    pub async fn run(self, mut rx: mpsc::Receiver<Discovered>) {
        tracing::info!("Producer started");

        loop {
            let item = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            if !self.acquire_rate_slot().await {
                break;
            }

            if let Err(e) = self.enqueue(item).await {
                tracing::error!(error = %e, "Failed to enqueue job");
            }
        }

        tracing::info!("Producer stopped");
    }

    /// Enqueue one discovered item as a fresh job record.
    pub async fn enqueue(&self, item: Discovered) -> conveyor_common::Result<()> {
        let priority =
            select_priority(&self.config, &self.top_priority, &item.filepath).to_string();
        let job = Job::new(item.filepath, item.filesize, priority);

        let queue_key = self.keys.queue_for(&job.priority).ok_or_else(|| {
            conveyor_common::ConveyorError::Internal(format!(
                "No queue configured for priority {}",
                job.priority
            ))
        })?;

        let payload = job.to_json()?;
        self.queue.push_head(queue_key, &payload).await?;

        metrics::counter!("jobs.produced", "priority" => job.priority.clone()).increment(1);
        tracing::debug!(
            job_id = %job.id,
            priority = %job.priority,
            queue = %queue_key,
            filesize = job.filesize,
            "Enqueued job"
        );

        Ok(())
    }

    /// Fixed-window limiter coordinated through Redis:
    /// INCR; first writer installs the 1 s window; over-limit readers sleep
    /// out the window TTL plus jitter and try again.
    ///
    /// Returns `false` when shutdown interrupted the wait — the caller must
    /// not enqueue.
    async fn acquire_rate_slot(&self) -> bool {
        if self.config.rate_limit_per_sec == 0 {
            return true;
        }

        loop {
            if self.shutdown.is_shutdown() {
                return false;
            }

            let count = match self.queue.incr(&self.config.rate_limit_key).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(error = %e, "Rate counter INCR failed, backing off");
                    if !self.shutdown.sleep(Duration::from_millis(500)).await {
                        return false;
                    }
                    continue;
                }
            };

            if count == 1 {
                if let Err(e) = self.queue.expire(&self.config.rate_limit_key, 1).await {
                    tracing::warn!(error = %e, "Failed to install rate window expiry");
                }
            }

            if count <= i64::from(self.config.rate_limit_per_sec) {
                return true;
            }

            metrics::counter!("producer.rate_limited").increment(1);

            let ttl_ms = match self.queue.pttl_ms(&self.config.rate_limit_key).await {
                Ok(ttl) if ttl > 0 => ttl as u64,
                // Window already expired (or never installed): retry now.
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "PTTL failed, assuming full window");
                    1000
                }
            };

            let wait = Duration::from_millis(ttl_ms + jitter_ms(100));
            if !self.shutdown.sleep(wait).await {
                return false;
            }
        }
    }
}

/// Extension rules first, `default_priority` for everything else.
fn select_priority<'a>(
    config: &'a ProducerConfig,
    top_priority: &'a str,
    filepath: &str,
) -> &'a str {
    if let Some(ext) = extension(filepath) {
        if config
            .high_priority_exts
            .iter()
            .any(|rule| rule.eq_ignore_ascii_case(ext))
        {
            return top_priority;
        }
    }
    &config.default_priority
}

fn extension(filepath: &str) -> Option<&str> {
    std::path::Path::new(filepath)
        .extension()
        .and_then(|ext| ext.to_str())
}

/// Uniform-ish jitter in [0, bound_ms) from a hash of the clock.
fn jitter_ms(bound_ms: u64) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::hash::DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    hasher.finish() % bound_ms.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(high_exts: &[&str], default_priority: &str) -> ProducerConfig {
        ProducerConfig {
            default_priority: default_priority.into(),
            high_priority_exts: high_exts.iter().map(|s| s.to_string()).collect(),
            rate_limit_per_sec: 0,
            rate_limit_key: "jobqueue:rate_limit:producer".into(),
        }
    }

    #[test]
    fn test_matched_extension_routes_to_top_priority() {
        let config = config(&["pdf", "csv"], "low");
        assert_eq!(select_priority(&config, "high", "/in/report.pdf"), "high");
        assert_eq!(select_priority(&config, "high", "/in/REPORT.PDF"), "high");
    }

    #[test]
    fn test_unmatched_extension_routes_to_default() {
        let config = config(&["pdf"], "low");
        assert_eq!(select_priority(&config, "high", "/in/archive.tar.gz"), "low");
        assert_eq!(select_priority(&config, "high", "/in/noext"), "low");
        assert_eq!(select_priority(&config, "high", ""), "low");
    }

    #[test]
    fn test_jitter_stays_in_bound() {
        for _ in 0..64 {
            assert!(jitter_ms(100) < 100);
        }
    }
}
