//! Fixed-size pool of long-lived database sessions (component A, spec
//! §4.A). Grounded directly in `SqlWrapper.c`'s `DBConnectionListHead` /
//! `SQL_get_database_connection` / `SQL_release_database_connection`:
//! every entry carries a serial id and an in-use flag, `acquire()` scans
//! under one pool-wide lock with a bounded retry count, `release()` clears
//! the flag. The pool never reconnects a dead session — a lost connection
//! surfaces as a `sqlx::Error` on next use, exactly as spec.md requires.
//!
//! Generic over the session type so the acquire/release bookkeeping (and
//! its invariant — `#in_use + #free == pool_size` at every quiescent point)
//! can be exercised in tests without a live PostgreSQL instance.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{EngineError, Result};

/// Anything the pool can open fresh sessions of. Implemented for
/// `sqlx::PgConnection` in production; a dummy type stands in for tests.
#[async_trait]
pub trait Connect: Sized + Send {
    async fn connect(url: &str) -> Result<Self>;
}

#[async_trait]
impl Connect for sqlx::PgConnection {
    async fn connect(url: &str) -> Result<Self> {
        use sqlx::Connection;
        sqlx::PgConnection::connect(url)
            .await
            .map_err(|_| EngineError::SqlOpen)
    }
}

struct Slot<C> {
    serial_id: usize,
    in_use: bool,
    conn: Option<C>,
}

struct Inner<C> {
    slots: Vec<Slot<C>>,
}

pub struct DbPool<C> {
    inner: Mutex<Inner<C>>,
    size: usize,
    acquire_retries: usize,
    retry_backoff: Duration,
}

/// A connection handle on loan from the pool. Dropping it without calling
/// `release` explicitly still returns the slot (Rust's ownership makes the
/// "caller forgot to release" class of bug in the original C pool
/// unrepresentable), but `release` is also exposed directly so callers can
/// observe the explicit acquire/release pairing the spec describes.
pub struct Lease<'a, C> {
    pool: &'a DbPool<C>,
    serial_id: usize,
    conn: Option<C>,
}

impl<'a, C> std::ops::Deref for Lease<'a, C> {
    type Target = C;
    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection taken")
    }
}

impl<'a, C> std::ops::DerefMut for Lease<'a, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection taken")
    }
}

impl<'a, C> Lease<'a, C> {
    pub fn serial_id(&self) -> usize {
        self.serial_id
    }
}

impl<'a, C> Drop for Lease<'a, C> {
    fn drop(&mut self) {
        let conn = self.conn.take();
        self.pool.release(self.serial_id, conn);
    }
}

impl<C: Connect> DbPool<C> {
    /// Opens `size` long-lived sessions against `database_url` up front.
    pub async fn connect(database_url: &str, size: usize) -> Result<Self> {
        let mut slots = Vec::with_capacity(size);
        for serial_id in 0..size {
            let conn = C::connect(database_url).await?;
            slots.push(Slot {
                serial_id,
                in_use: false,
                conn: Some(conn),
            });
        }
        Ok(Self {
            inner: Mutex::new(Inner { slots }),
            size,
            acquire_retries: 50,
            retry_backoff: Duration::from_millis(20),
        })
    }
}

impl<C> DbPool<C> {
    /// Scans for a free slot under the pool-wide mutex; fails with
    /// `SqlOpen` after a bounded retry count rather than reconnecting.
    pub async fn acquire(&self) -> Result<Lease<'_, C>> {
        for attempt in 0..=self.acquire_retries {
            {
                let mut inner = self.inner.lock().expect("db pool mutex poisoned");
                if let Some(slot) = inner.slots.iter_mut().find(|s| !s.in_use) {
                    slot.in_use = true;
                    let serial_id = slot.serial_id;
                    let conn = slot.conn.take().expect("slot missing connection");
                    return Ok(Lease {
                        pool: self,
                        serial_id,
                        conn: Some(conn),
                    });
                }
            }
            if attempt < self.acquire_retries {
                tokio::time::sleep(self.retry_backoff).await;
            }
        }
        Err(EngineError::SqlOpen)
    }

    fn release(&self, serial_id: usize, conn: Option<C>) {
        let mut inner = self.inner.lock().expect("db pool mutex poisoned");
        if let Some(slot) = inner.slots.iter_mut().find(|s| s.serial_id == serial_id) {
            slot.conn = conn;
            slot.in_use = false;
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_use(&self) -> usize {
        let inner = self.inner.lock().expect("db pool mutex poisoned");
        inner.slots.iter().filter(|s| s.in_use).count()
    }

    pub fn free(&self) -> usize {
        self.size - self.in_use()
    }

    /// Walks the pool, dropping each session. Matches
    /// `SQL_destroy_database_connection_pool`'s close-everything semantics.
    pub fn destroy(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeConn {
        id: u32,
    }

    #[async_trait]
    impl Connect for FakeConn {
        async fn connect(_url: &str) -> Result<Self> {
            Ok(FakeConn { id: 0 })
        }
    }

    #[tokio::test]
    async fn in_use_and_free_sum_to_pool_size_at_every_quiescent_point() {
        let pool: DbPool<FakeConn> = DbPool::connect("fake://", 3).await.unwrap();
        assert_eq!(pool.in_use() + pool.free(), pool.size());

        let a = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use() + pool.free(), pool.size());
        assert_eq!(pool.in_use(), 1);

        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use(), 2);

        drop(a);
        assert_eq!(pool.in_use(), 1);
        assert_eq!(pool.in_use() + pool.free(), pool.size());

        drop(b);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn acquire_reuses_released_serial_id() {
        let pool: DbPool<FakeConn> = DbPool::connect("fake://", 1).await.unwrap();
        let lease = pool.acquire().await.unwrap();
        let sid = lease.serial_id();
        drop(lease);
        let lease2 = pool.acquire().await.unwrap();
        assert_eq!(lease2.serial_id(), sid);
    }

    #[tokio::test]
    async fn exhausted_pool_fails_with_sql_open_after_bounded_retry() {
        let mut pool: DbPool<FakeConn> = DbPool::connect("fake://", 1).await.unwrap();
        pool.acquire_retries = 2;
        pool.retry_backoff = Duration::from_millis(1);
        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(EngineError::SqlOpen)));
    }
}
