//! Best-effort wake-up channel between the orchestrator and idle workers.
//!
//! Tokens carry a job id but consumers never trust them: a token only means
//! "try to claim now". Lost tokens are covered by the bounded wait, which
//! doubles as the polling interval.

use async_trait::async_trait;
use jobrelay_core::{Error, Result};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

#[async_trait]
pub trait WakeQueue: Send + Sync {
    async fn push(&self, token: &str) -> Result<()>;

    /// Block for at most `timeout` waiting for a token. `None` on timeout.
    async fn wait(&self, timeout: Duration) -> Result<Option<String>>;
}

fn unavailable(err: redis::RedisError) -> Error {
    Error::Unavailable(format!("redis: {}", err))
}

/// Redis list used as a queue: LPUSH to publish, BRPOP to wait.
pub struct RedisWakeQueue {
    conn: MultiplexedConnection,
    key: String,
}

impl RedisWakeQueue {
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        Ok(Self {
            conn,
            key: key.into(),
        })
    }
}

#[async_trait]
impl WakeQueue for RedisWakeQueue {
    async fn push(&self, token: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.key, token)
            .await
            .map_err(unavailable)
    }

    async fn wait(&self, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        // BRPOP treats 0 as "forever".
        let seconds = timeout.as_secs_f64().max(0.001);
        let popped: Option<(String, String)> = conn
            .brpop(&self.key, seconds)
            .await
            .map_err(unavailable)?;
        if let Some((_, token)) = &popped {
            debug!(queue = %self.key, token = %token, "Popped wake token");
        }
        Ok(popped.map(|(_, token)| token))
    }
}

/// In-process queue with the same FIFO semantics as the Redis list.
#[derive(Default)]
pub struct MemoryWakeQueue {
    tokens: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl MemoryWakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.lock().await.is_empty()
    }
}

#[async_trait]
impl WakeQueue for MemoryWakeQueue {
    async fn push(&self, token: &str) -> Result<()> {
        self.tokens.lock().await.push_front(token.to_string());
        self.notify.notify_one();
        Ok(())
    }

    async fn wait(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(token) = self.tokens.lock().await.pop_back() {
                return Ok(Some(token));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }
}
