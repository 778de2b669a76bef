use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, routing::post, Json,
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::mpsc;

use conveyor_common::types::Job;
use conveyor_engine::breaker::CircuitBreaker;
use conveyor_engine::config;
use conveyor_engine::producer::{Discovered, Producer};
use conveyor_engine::queue::{KeySet, QueueClient};
use conveyor_engine::reaper;
use conveyor_engine::shutdown::{self, Shutdown};
use conveyor_engine::worker::{Processor, ProcessorError, WorkerPool};

/// Shared application state accessible from axum handlers.
struct AppState {
    queue: Arc<QueueClient>,
    jobs_tx: mpsc::Sender<Discovered>,
    metrics_handle: PrometheusHandle,
}

/// Placeholder processor wired into the standalone binary. Deployments embed
/// the core as a library and pass their own implementation to
/// `WorkerPool::start`.
struct LogProcessor;

#[async_trait::async_trait]
impl Processor for LogProcessor {
    async fn process(&self, job: &Job, _ctx: &Shutdown) -> Result<(), ProcessorError> {
        tracing::info!(
            job_id = %job.id,
            filepath = %job.filepath,
            filesize = job.filesize,
            "Processing file"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Conveyor engine starting");

    // Load configuration — fail loudly on misconfiguration.
    let config_path = std::env::var("CONVEYOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("conveyor.toml"));

    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration — refusing to start");
            std::process::exit(1);
        }
    };

    // Connection budget: multiplier × logical cores, computed once. Each
    // worker holds a dedicated claim connection plus the shared pipe.
    let logical_cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);
    let pool_budget = config.redis.pool_size_multiplier * logical_cores;
    if config.worker.count + 2 > pool_budget {
        tracing::warn!(
            pool_budget,
            workers = config.worker.count,
            "Worker count exceeds the configured Redis connection budget"
        );
    }

    // Install Prometheus metrics recorder.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    // Redis.
    let queue = match QueueClient::connect(&config.redis).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to Redis");
            std::process::exit(1);
        }
    };

    let keys = Arc::new(KeySet::from_config(&config.worker));
    let breaker = Arc::new(CircuitBreaker::new("dequeue", &config.breaker));
    let (shutdown_tx, shutdown_handle) = shutdown::channel();

    // Reaper.
    let reaper_handle = reaper::spawn_reaper(
        Arc::clone(&queue),
        Arc::clone(&keys),
        config.reaper.clone(),
        shutdown_handle.clone(),
    );

    // Producer, fed by the HTTP surface (scanners run outside the core).
    let (jobs_tx, jobs_rx) = mpsc::channel::<Discovered>(1024);
    let producer = Producer::new(
        Arc::clone(&queue),
        Arc::clone(&keys),
        config.producer.clone(),
        &config.worker.priorities,
        shutdown_handle.clone(),
    );
    let producer_handle = tokio::spawn(producer.run(jobs_rx));

    // Worker pool.
    let worker_config = Arc::new(config.worker.clone());
    let pool = match WorkerPool::start(
        Arc::clone(&worker_config),
        Arc::clone(&keys),
        Arc::clone(&queue),
        Arc::new(LogProcessor),
        Arc::clone(&breaker),
        shutdown_handle.clone(),
    )
    .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start worker pool");
            std::process::exit(1);
        }
    };

    // Periodic gauge reporter: per-priority queue lengths and breaker state.
    {
        let queue = Arc::clone(&queue);
        let keys = Arc::clone(&keys);
        let breaker = Arc::clone(&breaker);
        let shutdown = shutdown_handle.clone();
        tokio::spawn(async move {
            while shutdown.sleep(Duration::from_secs(15)).await {
                for (priority, list_key) in keys.queues() {
                    if let Ok(len) = queue.len(list_key).await {
                        metrics::gauge!("queue.length", "priority" => priority.clone())
                            .set(len as f64);
                    }
                }
                if let Ok(len) = queue.len(&keys.dead_letter_list).await {
                    metrics::gauge!("queue.dead_letter_length").set(len as f64);
                }
                breaker.report_metrics();
            }
        });
    }

    // HTTP surface.
    let state = Arc::new(AppState {
        queue: Arc::clone(&queue),
        jobs_tx,
        metrics_handle,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/jobs", post(submit_job_handler))
        .with_state(state);

    let port: u16 = std::env::var("CONVEYOR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = port, "Conveyor engine listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("HTTP server error");

    // Drain: stop gates, let in-flight processors commit, bounded by the
    // grace deadline. Anything still in flight afterwards belongs to the
    // reaper via heartbeat expiry.
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(worker_config.grace_deadline_seconds);
    if tokio::time::timeout(grace, pool.join()).await.is_err() {
        tracing::warn!(
            grace_seconds = worker_config.grace_deadline_seconds,
            "Grace deadline expired, leaving in-flight jobs to the reaper"
        );
    }

    let _ = tokio::time::timeout(Duration::from_secs(2), reaper_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), producer_handle).await;

    tracing::info!("Conveyor engine stopped");
}

/// Health check endpoint — verifies the Redis connection.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.queue.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "healthy", "redis": "healthy"})),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "unhealthy", "redis": e.to_string()})),
        ),
    }
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

/// POST /jobs — hand a discovered file to the producer.
async fn submit_job_handler(
    State(state): State<Arc<AppState>>,
    Json(item): Json<Discovered>,
) -> impl IntoResponse {
    match state.jobs_tx.send(item).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "accepted"})),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "rejected", "error": "producer stopped"})),
        ),
    }
}
