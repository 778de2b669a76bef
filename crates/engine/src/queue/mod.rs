use std::time::Duration;

use redis::aio::MultiplexedConnection;

use conveyor_common::config::RedisConfig;

mod keys;

pub use keys::{KeySet, WORKER_ID_PLACEHOLDER};

/// Redis client for the job queue key layout.
///
/// Non-blocking operations share one multiplexed connection. Blocking claims
/// (BRPOPLPUSH) run on dedicated per-worker connections obtained from
/// [`QueueClient::claim_connection`] — a blocked claim must not stall the
/// shared pipe that heartbeats and commits travel on.
pub struct QueueClient {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl QueueClient {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn connect(config: &RedisConfig) -> Result<Self, QueueError> {
        tracing::info!(addr = %config.addr, "Connecting to Redis");

        let client = open_client(config)?;

        let mut attempt = 0;
        let conn = loop {
            attempt += 1;
            match client
                .get_multiplexed_async_connection_with_timeouts(
                    Duration::from_millis(config.read_timeout_ms),
                    Duration::from_millis(config.dial_timeout_ms),
                )
                .await
            {
                Ok(conn) => break conn,
                Err(e) if attempt > config.max_retries => {
                    return Err(QueueError::Connection(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Redis connection failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
            }
        };

        let queue_client = Self { client, conn };
        queue_client.health_check().await?;
        tracing::info!("Redis connection established");

        Ok(queue_client)
    }

    /// Dedicated connection for blocking claims. Carries no response timeout:
    /// BRPOPLPUSH legitimately blocks server-side up to the per-queue timeout.
    pub async fn claim_connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    /// Verify the connection is alive (PING).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        if pong != "PONG" {
            return Err(QueueError::Command(format!(
                "Unexpected PING response: {}",
                pong
            )));
        }
        Ok(())
    }

    /// LPUSH — enqueue, retry requeue, dead-letter append, reaper rescue.
    pub async fn push_head(&self, list: &str, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(list)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    /// Atomic move from the tail of `src` to the head of `dst`, blocking up
    /// to `timeout` when `src` is empty. `None` on timeout.
    ///
    /// BRPOPLPUSH is single-source; multi-priority blocking is emulated by
    /// the caller looping short per-queue timeouts. That loop is the
    /// documented latency trade-off of the claim path, not an accident.
    pub async fn atomic_claim(
        &self,
        conn: &mut MultiplexedConnection,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> Result<Option<String>, QueueError> {
        redis::cmd("BRPOPLPUSH")
            .arg(src)
            .arg(dst)
            .arg(timeout.as_secs_f64())
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    /// LREM count=1 — remove the first occurrence equal to `payload`.
    /// The payload must be the exact byte sequence Redis returned at claim
    /// time; a re-marshal could reorder fields and miss. Returns the number
    /// of removed elements (0 means a reaper got there first).
    pub async fn exact_remove(&self, list: &str, payload: &str) -> Result<i64, QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("LREM")
            .arg(list)
            .arg(1)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    /// RPOP — reaper drain, one element at a time.
    pub async fn pop_tail(&self, list: &str) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("RPOP")
            .arg(list)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    /// LRANGE — non-destructive peek, head first. Admin surfaces and tests.
    pub async fn range(
        &self,
        list: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("LRANGE")
            .arg(list)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    pub async fn len(&self, list: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(list)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    /// SET key payload EX ttl — liveness marker for one worker.
    pub async fn set_heartbeat(
        &self,
        key: &str,
        payload: &str,
        ttl_seconds: u64,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    pub async fn exists(&self, key: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    pub async fn delete(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    /// INCR — fixed-window rate counter. The first writer in a window sees 1
    /// and must install the window expiry.
    pub async fn incr(&self, key: &str) -> Result<i64, QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    /// PTTL in milliseconds; negative values mean no key or no expiry.
    pub async fn pttl_ms(&self, key: &str) -> Result<i64, QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }

    /// One SCAN page. Returns the next cursor (0 = iteration complete) and
    /// the keys matched on this page.
    pub async fn scan_page(
        &self,
        cursor: u64,
        pattern: &str,
        count: u32,
    ) -> Result<(u64, Vec<String>), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))
    }
}

fn open_client(config: &RedisConfig) -> Result<redis::Client, QueueError> {
    if config.addr.contains("://") {
        return redis::Client::open(config.addr.as_str())
            .map_err(|e| QueueError::Connection(e.to_string()));
    }

    let (host, port) = match config.addr.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| QueueError::Connection(format!("Invalid port in addr: {}", config.addr)))?;
            (host.to_string(), port)
        }
        None => (config.addr.clone(), 6379),
    };

    let info = redis::ConnectionInfo {
        addr: redis::ConnectionAddr::Tcp(host, port),
        redis: redis::RedisConnectionInfo {
            db: config.db,
            username: config.username.clone(),
            password: config.password.clone(),
            ..Default::default()
        },
    };

    redis::Client::open(info).map_err(|e| QueueError::Connection(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Payload encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<QueueError> for conveyor_common::ConveyorError {
    fn from(e: QueueError) -> Self {
        conveyor_common::ConveyorError::Redis(e.to_string())
    }
}
