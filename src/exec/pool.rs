//! Bounded pool of in-memory DuckDB connections.
//!
//! Connections are opened lazily up to `max_size`. A checkout waits for a free
//! connection until its deadline; the guard puts the connection back when it is
//! dropped, including when a timed-out query finally finishes on its worker thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use duckdb::Connection;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{FusionError, FusionResult};
use crate::ident::Identifier;

/// A pooled connection plus the catalog its views were registered for.
pub struct PooledConn {
    pub conn: Connection,
    pub(crate) registered: Option<(PathBuf, u64)>,
    pub(crate) views: Vec<Identifier>,
}

struct PoolState {
    idle: Vec<PooledConn>,
    created: usize,
}

struct PoolInner {
    max_size: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

pub struct PoolGuard {
    conn: Option<PooledConn>,
    pool: Arc<PoolInner>,
}

impl std::ops::Deref for PoolGuard {
    type Target = PooledConn;
    fn deref(&self) -> &PooledConn {
        // only None during drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!("pool guard used after release"))
    }
}

impl std::ops::DerefMut for PoolGuard {
    fn deref_mut(&mut self) -> &mut PooledConn {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("pool guard used after release"))
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(c) = self.conn.take() {
            self.pool.state.lock().idle.push(c);
            self.pool.available.notify_one();
        }
    }
}

impl ConnectionPool {
    pub fn new(max_size: usize) -> Self {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                max_size: max_size.max(1),
                state: Mutex::new(PoolState { idle: Vec::new(), created: 0 }),
                available: Condvar::new(),
            }),
        }
    }

    pub fn max_size(&self) -> usize { self.inner.max_size }

    /// (idle, created)
    pub fn status(&self) -> (usize, usize) {
        let st = self.inner.state.lock();
        (st.idle.len(), st.created)
    }

    /// Take a connection, opening one if the pool is below capacity. With a
    /// timeout, gives up with `QueryTimeout` once it elapses.
    pub fn checkout(&self, timeout: Option<Duration>) -> FusionResult<PoolGuard> {
        let deadline = timeout.map(|t| (t, Instant::now() + t));
        let mut st = self.inner.state.lock();
        loop {
            if let Some(c) = st.idle.pop() {
                return Ok(PoolGuard { conn: Some(c), pool: self.inner.clone() });
            }
            if st.created < self.inner.max_size {
                st.created += 1;
                let n = st.created;
                drop(st);
                return match Connection::open_in_memory() {
                    Ok(conn) => {
                        debug!(target: "datafuse::exec", "opened pooled connection {}/{}", n, self.inner.max_size);
                        Ok(PoolGuard { conn: Some(PooledConn { conn, registered: None, views: Vec::new() }), pool: self.inner.clone() })
                    }
                    Err(e) => {
                        self.inner.state.lock().created -= 1;
                        self.inner.available.notify_one();
                        Err(e.into())
                    }
                };
            }
            match deadline {
                Some((t, d)) => {
                    if self.inner.available.wait_until(&mut st, d).timed_out() && st.idle.is_empty() {
                        return Err(FusionError::timeout(t, "no connection became available"));
                    }
                }
                None => self.inner.available.wait(&mut st),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_are_reused() {
        let pool = ConnectionPool::new(2);
        {
            let g = pool.checkout(None).unwrap();
            (*g).conn.execute_batch("CREATE TABLE t(x INTEGER)").unwrap();
        }
        assert_eq!(pool.status(), (1, 1));
        let g = pool.checkout(None).unwrap();
        // same in-memory database as before
        (*g).conn.execute_batch("INSERT INTO t VALUES (1)").unwrap();
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = ConnectionPool::new(1);
        let _held = pool.checkout(None).unwrap();
        let err = pool.checkout(Some(Duration::from_millis(30))).err().unwrap();
        assert_eq!(err.kind(), "query_timeout");
    }

    #[test]
    fn waiters_wake_when_a_guard_drops() {
        let pool = ConnectionPool::new(1);
        let held = pool.checkout(None).unwrap();
        let p2 = pool.clone();
        let h = std::thread::spawn(move || p2.checkout(Some(Duration::from_secs(5))).map(|_| ()));
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(h.join().unwrap().is_ok());
        assert_eq!(pool.status().1, 1);
    }
}
