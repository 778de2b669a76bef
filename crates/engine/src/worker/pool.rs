use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use tokio::task::JoinHandle;
use tracing::Instrument;

use conveyor_common::config::WorkerConfig;
use conveyor_common::types::Job;
use conveyor_common::WorkerId;

use crate::breaker::{Admission, CircuitBreaker};
use crate::queue::{KeySet, QueueClient};
use crate::shutdown::Shutdown;

use super::{commit, ClaimedJob, Processor, ProcessorError};

/// Pool of worker tasks that claim, process, and commit jobs.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.count` workers. Each gets a stable [`WorkerId`] and a
    /// dedicated claim connection.
    pub async fn start(
        config: Arc<WorkerConfig>,
        keys: Arc<KeySet>,
        queue: Arc<QueueClient>,
        processor: Arc<dyn Processor>,
        breaker: Arc<CircuitBreaker>,
        shutdown: Shutdown,
    ) -> Result<Self, crate::queue::QueueError> {
        let mut workers = Vec::with_capacity(config.count as usize);

        for index in 0..config.count {
            let worker_id = WorkerId::for_task(index);
            let claim_conn = queue.claim_connection().await?;

            workers.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&config),
                Arc::clone(&keys),
                Arc::clone(&queue),
                claim_conn,
                Arc::clone(&processor),
                Arc::clone(&breaker),
                shutdown.clone(),
            )));
        }

        tracing::info!(pool_size = config.count, "Worker pool started");

        Ok(Self { workers })
    }

    /// Wait for all workers to finish. Workers exit once shutdown is
    /// signaled and their in-flight job (if any) has committed.
    pub async fn join(self) {
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

/// Main loop for a single worker: gate → prioritized claim → heartbeat →
/// process → commit → record outcome.
#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: WorkerId,
    config: Arc<WorkerConfig>,
    keys: Arc<KeySet>,
    queue: Arc<QueueClient>,
    mut claim_conn: MultiplexedConnection,
    processor: Arc<dyn Processor>,
    breaker: Arc<CircuitBreaker>,
    shutdown: Shutdown,
) {
    let processing_key = keys.processing_list(&worker_id);
    let heartbeat_key = keys.heartbeat_key(&worker_id);
    let per_queue_timeout = Duration::from_millis(config.per_queue_timeout_ms);

    tracing::info!(worker = %worker_id, "Worker started");

    while !shutdown.is_shutdown() {
        match breaker.allow() {
            Admission::Denied(reason) => {
                tracing::debug!(worker = %worker_id, reason, "Fetch denied by breaker");
                shutdown.sleep(breaker.deny_backoff()).await;
                continue;
            }
            Admission::Granted => {}
        }

        // One fetch attempt: the priority lists in order, each with a short
        // blocking claim. First hit wins; lower-priority latency is bounded
        // by per_queue_timeout × (priorities − 1).
        let mut raw: Option<String> = None;
        let mut fetch_failed = false;
        for (priority, src) in keys.queues() {
            if shutdown.is_shutdown() {
                break;
            }
            match queue
                .atomic_claim(&mut claim_conn, src, &processing_key, per_queue_timeout)
                .await
            {
                Ok(Some(payload)) => {
                    tracing::debug!(worker = %worker_id, priority = %priority, "Claimed job");
                    raw = Some(payload);
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(
                        worker = %worker_id,
                        queue = %src,
                        error = %e,
                        "Claim failed"
                    );
                    fetch_failed = true;
                    break;
                }
            }
        }

        if fetch_failed {
            breaker.record_failure();
            shutdown.sleep(Duration::from_secs(1)).await;
            continue;
        }

        let Some(raw) = raw else {
            // All queues idle within their timeouts — a healthy round trip.
            // This also releases a HalfOpen probe slot instead of wedging it.
            breaker.record_success();
            continue;
        };

        metrics::counter!("jobs.consumed").increment(1);

        if let Err(e) = queue
            .set_heartbeat(&heartbeat_key, &raw, config.heartbeat_ttl_seconds)
            .await
        {
            // Processing continues: worst case the reaper rescues early and
            // the processor's idempotency absorbs the duplicate.
            tracing::warn!(worker = %worker_id, error = %e, "Failed to set heartbeat");
        }

        let job = match Job::from_json(&raw) {
            Ok(job) => job,
            Err(e) => {
                // Programmer error: never retried, never blocks the queue.
                tracing::error!(worker = %worker_id, error = %e, "Undecodable payload, dead-lettering");
                metrics::counter!("jobs.invalid").increment(1);
                if let Err(e) =
                    commit::dead_letter(&queue, &keys, &processing_key, &heartbeat_key, &raw).await
                {
                    tracing::error!(worker = %worker_id, error = %e, "Dead-letter commit failed, reaper will rescue");
                }
                breaker.record_success();
                continue;
            }
        };

        let claimed = ClaimedJob { raw, job };
        let span = tracing::info_span!(
            "process_job",
            worker = %worker_id,
            job_id = %claimed.job.id,
            priority = %claimed.job.priority,
            trace_id = claimed.job.trace_id.as_deref().unwrap_or(""),
            span_id = claimed.job.span_id.as_deref().unwrap_or(""),
        );
        run_one(
            &config,
            &keys,
            &queue,
            &processing_key,
            &heartbeat_key,
            processor.as_ref(),
            &breaker,
            &shutdown,
            claimed,
        )
        .instrument(span)
        .await;
    }

    tracing::info!(worker = %worker_id, "Worker stopped");
}

/// Process one claimed job and commit its outcome.
#[allow(clippy::too_many_arguments)]
async fn run_one(
    config: &WorkerConfig,
    keys: &KeySet,
    queue: &Arc<QueueClient>,
    processing_key: &str,
    heartbeat_key: &str,
    processor: &dyn Processor,
    breaker: &CircuitBreaker,
    shutdown: &Shutdown,
    claimed: ClaimedJob,
) {
    let job = &claimed.job;

    metrics::gauge!("worker.pool.active").increment(1.0);

    let refresher = if config.heartbeat_refresh {
        Some(spawn_heartbeat_refresher(
            Arc::clone(queue),
            heartbeat_key.to_string(),
            claimed.raw.clone(),
            config.heartbeat_ttl_seconds,
        ))
    } else {
        None
    };

    let started = Instant::now();
    let result = processor.process(job, shutdown).await;
    metrics::histogram!("jobs.processing_seconds").record(started.elapsed().as_secs_f64());

    if let Some((cancel_tx, handle)) = refresher {
        let _ = cancel_tx.send(());
        let _ = handle.await;
    }

    match result {
        Ok(()) => {
            breaker.record_success();
            match commit::success(queue, keys, processing_key, heartbeat_key, &claimed).await {
                Ok(()) => {
                    metrics::counter!("jobs.completed").increment(1);
                    tracing::info!(duration_ms = started.elapsed().as_millis() as u64, "Job completed");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Success commit failed, reaper will rescue");
                }
            }
        }
        Err(ProcessorError::Retryable(reason)) => {
            breaker.record_failure();
            metrics::counter!("jobs.failed").increment(1);
            if job.retries + 1 <= config.max_retries {
                tracing::warn!(
                    reason = %reason,
                    retries = job.retries,
                    "Job failed, requeueing"
                );
                match commit::retry(
                    queue,
                    keys,
                    config,
                    processing_key,
                    heartbeat_key,
                    &claimed,
                    shutdown,
                )
                .await
                {
                    Ok(()) => {
                        metrics::counter!("jobs.retried").increment(1);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Retry commit failed, reaper will rescue");
                    }
                }
            } else {
                tracing::error!(
                    reason = %reason,
                    retries = job.retries,
                    max_retries = config.max_retries,
                    "Retries exhausted, dead-lettering"
                );
                dead_letter_one(queue, keys, processing_key, heartbeat_key, &claimed.raw).await;
            }
        }
        Err(ProcessorError::Fatal(reason)) => {
            breaker.record_failure();
            metrics::counter!("jobs.failed").increment(1);
            tracing::error!(reason = %reason, "Fatal processor failure, dead-lettering");
            dead_letter_one(queue, keys, processing_key, heartbeat_key, &claimed.raw).await;
        }
    }

    metrics::gauge!("worker.pool.active").decrement(1.0);
}

async fn dead_letter_one(
    queue: &QueueClient,
    keys: &KeySet,
    processing_key: &str,
    heartbeat_key: &str,
    raw: &str,
) {
    match commit::dead_letter(queue, keys, processing_key, heartbeat_key, raw).await {
        Ok(()) => {
            metrics::counter!("jobs.dead_letter").increment(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "Dead-letter commit failed, reaper will rescue");
        }
    }
}

/// Re-SET the heartbeat every ttl/3 until cancelled. Reduces false-positive
/// reaper rescues for long-running processors.
fn spawn_heartbeat_refresher(
    queue: Arc<QueueClient>,
    heartbeat_key: String,
    payload: String,
    ttl_seconds: u64,
) -> (tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let (cancel_tx, mut cancel_rx) = tokio::sync::oneshot::channel::<()>();
    let interval = Duration::from_secs((ttl_seconds / 3).max(1));

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = queue
                        .set_heartbeat(&heartbeat_key, &payload, ttl_seconds)
                        .await
                    {
                        tracing::warn!(
                            heartbeat = %heartbeat_key,
                            error = %e,
                            "Failed to refresh heartbeat"
                        );
                    }
                }
                _ = &mut cancel_rx => {
                    break;
                }
            }
        }
    });

    (cancel_tx, handle)
}
