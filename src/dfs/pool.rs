//! Bounded pool of remote connections with scoped handles

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A single logical connection to a remote filesystem
#[derive(Debug)]
pub struct Connection {
    id: usize,
}

impl Connection {
    pub fn id(&self) -> usize {
        self.id
    }
}

struct PoolInner {
    free: Mutex<Vec<Connection>>,
    reachable: AtomicBool,
    capacity: usize,
}

/// Connection pool for one namenode
///
/// Connections are handed out as [`PooledConnection`] guards and go back to
/// the pool when the guard is dropped.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        let free = (0..capacity).map(|id| Connection { id }).collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                reachable: AtomicBool::new(true),
                capacity,
            }),
        }
    }

    /// Take a free connection
    ///
    /// The returned handle is invalid when the pool is exhausted or the
    /// remote side is marked unreachable.
    pub fn get_free_connection(&self) -> PooledConnection {
        if !self.inner.reachable.load(Ordering::Acquire) {
            return PooledConnection {
                connection: None,
                pool: self.inner.clone(),
            };
        }
        let connection = self.inner.free.lock().pop();
        PooledConnection {
            connection,
            pool: self.inner.clone(),
        }
    }

    /// Mark the remote side as (un)reachable
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::Release);
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn free_count(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// Scoped connection handle, returned to its pool on drop
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    pub fn valid(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.free.lock().push(connection);
        }
    }
}
