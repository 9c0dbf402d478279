//! Bounded pool of Redis connections.
//!
//! Every component borrows through [`ConnectionPool::acquire`] and returns
//! the handle by dropping the guard, so a connection is released on every
//! exit path. Connections are created lazily up to the configured capacity
//! and validated with PING when taken from the idle list.

use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::redis_config::RedisConfig;
use crate::error::PresenceError;

struct PoolInner {
    config: RedisConfig,
    idle: Mutex<Vec<MultiplexedConnection>>,
    permits: Arc<Semaphore>,
    active: AtomicUsize,
    waiting: AtomicUsize,
    capacity: usize,
    acquire_timeout: Duration,
}

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

/// Leased connection. Dropping it returns the underlying handle to the idle
/// list and frees a permit for the next waiter.
pub struct PooledConnection {
    conn: MultiplexedConnection,
    inner: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.inner.idle.lock().push(self.conn.clone());
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        // the permit field drops after this body, waking one waiter
    }
}

impl ConnectionPool {
    pub fn new(config: RedisConfig, capacity: usize, acquire_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                config,
                idle: Mutex::new(Vec::with_capacity(capacity)),
                permits: Arc::new(Semaphore::new(capacity)),
                active: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                capacity,
                acquire_timeout,
            }),
        }
    }

    /// Borrow a connection, waiting at most the configured timeout.
    pub async fn acquire(&self) -> Result<PooledConnection, PresenceError> {
        self.acquire_with_timeout(self.inner.acquire_timeout).await
    }

    pub async fn acquire_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledConnection, PresenceError> {
        self.inner.waiting.fetch_add(1, Ordering::SeqCst);
        let outcome =
            tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned()).await;
        self.inner.waiting.fetch_sub(1, Ordering::SeqCst);

        let permit = match outcome {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(PresenceError::StoreUnavailable("pool closed".to_string()));
            }
            Err(_) => return Err(PresenceError::ResourceExhausted(timeout)),
        };

        let reused = self.inner.idle.lock().pop();
        let conn = match reused {
            Some(mut conn) => {
                if validate(&mut conn).await {
                    conn
                } else {
                    debug!("dropping broken pooled connection, opening a fresh one");
                    self.connect().await?
                }
            }
            None => self.connect().await?,
        };

        self.inner.active.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            conn,
            inner: self.inner.clone(),
            _permit: permit,
        })
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PresenceError> {
        self.inner
            .config
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(PresenceError::from)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn num_active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn num_idle(&self) -> usize {
        self.inner.idle.lock().len()
    }

    pub fn num_waiting(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }
}

async fn validate(conn: &mut MultiplexedConnection) -> bool {
    redis::cmd("PING")
        .query_async::<_, String>(conn)
        .await
        .is_ok()
}
