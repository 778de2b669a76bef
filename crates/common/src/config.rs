use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level system configuration, deserialized from conveyor.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConveyorConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            worker: WorkerConfig::default(),
            producer: ProducerConfig::default(),
            breaker: BreakerConfig::default(),
            reaper: ReaperConfig::default(),
        }
    }
}

/// Redis connection parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedisConfig {
    /// `host:port`, or a full `redis://` URL.
    #[serde(default = "default_redis_addr")]
    pub addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
    /// Connection budget per logical core. The effective pool size is
    /// `pool_size_multiplier × logical cores`, computed once at startup.
    #[serde(default = "default_pool_size_multiplier")]
    pub pool_size_multiplier: u32,
    #[serde(default = "default_min_idle_conns")]
    pub min_idle_conns: u32,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Client-level retries for individual commands.
    #[serde(default = "default_redis_max_retries")]
    pub max_retries: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: default_redis_addr(),
            username: None,
            password: None,
            db: 0,
            pool_size_multiplier: default_pool_size_multiplier(),
            min_idle_conns: default_min_idle_conns(),
            dial_timeout_ms: default_dial_timeout_ms(),
            read_timeout_ms: default_io_timeout_ms(),
            write_timeout_ms: default_io_timeout_ms(),
            max_retries: default_redis_max_retries(),
        }
    }
}

/// Worker pool parameters and the Redis key layout the pool writes to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of worker tokio tasks in the pool.
    #[serde(default = "default_worker_count")]
    pub count: u32,
    /// Heartbeat TTL in seconds. Expired = worker presumed dead.
    #[serde(default = "default_heartbeat_ttl")]
    pub heartbeat_ttl_seconds: u64,
    /// Refresh the heartbeat every ttl/3 while the processor runs.
    /// Off by default — set-once semantics assume short jobs.
    #[serde(default)]
    pub heartbeat_refresh: bool,
    /// Retryable failures beyond this count escalate to the dead-letter list.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Priority classes in claim order (highest first).
    #[serde(default = "default_priorities")]
    pub priorities: Vec<String>,
    /// Priority class → Redis list key. Must cover every entry in `priorities`.
    #[serde(default = "default_queues")]
    pub queues: HashMap<String, String>,
    /// Must contain the `{worker_id}` placeholder exactly once.
    #[serde(default = "default_processing_list_pattern")]
    pub processing_list_pattern: String,
    /// Must contain the `{worker_id}` placeholder exactly once.
    #[serde(default = "default_heartbeat_key_pattern")]
    pub heartbeat_key_pattern: String,
    #[serde(default = "default_completed_list")]
    pub completed_list: String,
    #[serde(default = "default_dead_letter_list")]
    pub dead_letter_list: String,
    /// Block timeout for one priority list inside the claim loop.
    /// Must satisfy `per_queue_timeout ≤ heartbeat_ttl / 2`.
    #[serde(default = "default_per_queue_timeout_ms")]
    pub per_queue_timeout_ms: u64,
    /// Upper bound on waiting for in-flight processors at shutdown.
    #[serde(default = "default_grace_deadline")]
    pub grace_deadline_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            heartbeat_ttl_seconds: default_heartbeat_ttl(),
            heartbeat_refresh: false,
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            priorities: default_priorities(),
            queues: default_queues(),
            processing_list_pattern: default_processing_list_pattern(),
            heartbeat_key_pattern: default_heartbeat_key_pattern(),
            completed_list: default_completed_list(),
            dead_letter_list: default_dead_letter_list(),
            per_queue_timeout_ms: default_per_queue_timeout_ms(),
            grace_deadline_seconds: default_grace_deadline(),
        }
    }
}

/// Producer-side parameters. Filesystem scanning and filtering live outside
/// the core; the producer only consumes discovered items.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Priority assigned when no rule matches. Must be in `worker.priorities`.
    #[serde(default = "default_default_priority")]
    pub default_priority: String,
    /// File extensions (lowercase, no dot) routed to the highest priority.
    #[serde(default)]
    pub high_priority_exts: Vec<String>,
    /// Global enqueue rate across all producer replicas. 0 disables limiting.
    #[serde(default)]
    pub rate_limit_per_sec: u32,
    #[serde(default = "default_rate_limit_key")]
    pub rate_limit_key: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            default_priority: default_default_priority(),
            high_priority_exts: Vec::new(),
            rate_limit_per_sec: 0,
            rate_limit_key: default_rate_limit_key(),
        }
    }
}

/// Circuit breaker parameters for the dequeue gate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failure ratio in (0, 1) that trips the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    /// Sliding window over which outcomes are counted.
    #[serde(default = "default_breaker_window")]
    pub window_seconds: u64,
    #[serde(default = "default_breaker_cooldown")]
    pub cooldown_seconds: u64,
    /// Minimum outcomes in the window before the ratio is evaluated.
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_seconds: default_breaker_window(),
            cooldown_seconds: default_breaker_cooldown(),
            min_samples: default_min_samples(),
        }
    }
}

/// Reaper pacing and per-pass bounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_interval")]
    pub interval_seconds: u64,
    /// Never move more than this many payloads in a single pass.
    #[serde(default = "default_max_rescue_per_pass")]
    pub max_rescue_per_pass: u32,
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: u32,
    /// Wall-clock budget for one pass so the reaper cannot starve Redis.
    #[serde(default = "default_pass_budget_ms")]
    pub pass_budget_ms: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_reaper_interval(),
            max_rescue_per_pass: default_max_rescue_per_pass(),
            scan_page_size: default_scan_page_size(),
            pass_budget_ms: default_pass_budget_ms(),
        }
    }
}

fn default_redis_addr() -> String {
    "127.0.0.1:6379".into()
}

fn default_pool_size_multiplier() -> u32 {
    10
}

fn default_min_idle_conns() -> u32 {
    2
}

fn default_dial_timeout_ms() -> u64 {
    5000
}

fn default_io_timeout_ms() -> u64 {
    3000
}

fn default_redis_max_retries() -> u32 {
    3
}

fn default_worker_count() -> u32 {
    4
}

fn default_heartbeat_ttl() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_priorities() -> Vec<String> {
    vec!["high".into(), "low".into()]
}

fn default_queues() -> HashMap<String, String> {
    HashMap::from([
        ("high".into(), "jobqueue:high_priority".into()),
        ("low".into(), "jobqueue:low_priority".into()),
    ])
}

fn default_processing_list_pattern() -> String {
    "jobqueue:worker:{worker_id}:processing".into()
}

fn default_heartbeat_key_pattern() -> String {
    "jobqueue:processing:worker:{worker_id}".into()
}

fn default_completed_list() -> String {
    "jobqueue:completed".into()
}

fn default_dead_letter_list() -> String {
    "jobqueue:dead_letter".into()
}

fn default_per_queue_timeout_ms() -> u64 {
    1000
}

fn default_grace_deadline() -> u64 {
    30
}

fn default_default_priority() -> String {
    "low".into()
}

fn default_rate_limit_key() -> String {
    "jobqueue:rate_limit:producer".into()
}

fn default_failure_threshold() -> f64 {
    0.5
}

fn default_breaker_window() -> u64 {
    60
}

fn default_breaker_cooldown() -> u64 {
    30
}

fn default_min_samples() -> u32 {
    20
}

fn default_reaper_interval() -> u64 {
    10
}

fn default_max_rescue_per_pass() -> u32 {
    100
}

fn default_scan_page_size() -> u32 {
    100
}

fn default_pass_budget_ms() -> u64 {
    200
}
