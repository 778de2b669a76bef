use async_trait::async_trait;
use thiserror::Error;

use conveyor_common::types::Job;

use crate::shutdown::Shutdown;

mod commit;
mod pool;

pub use pool::WorkerPool;

/// How a processor invocation failed.
///
/// Retryable failures re-enter the originating priority list until
/// `max_retries` is exhausted; fatal failures go straight to the
/// dead-letter list.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

/// The pluggable job processor, implemented outside the core.
///
/// Must be safe to invoke concurrently and idempotent on job identity: a
/// slow processor racing a reaper rescue yields a benign duplicate delivery,
/// which is the documented at-least-once boundary.
#[async_trait]
pub trait Processor: Send + Sync {
    /// `ctx` is the cancellation signal; long-running processors are
    /// expected to honor it.
    async fn process(&self, job: &Job, ctx: &Shutdown) -> Result<(), ProcessorError>;
}

/// A job as held by a worker between claim and commit.
///
/// `raw` is the exact byte sequence Redis returned — exact-removal from the
/// processing list uses it untouched, because re-marshaling could reorder
/// JSON fields and miss.
#[derive(Clone, Debug)]
pub struct ClaimedJob {
    pub raw: String,
    pub job: Job,
}
