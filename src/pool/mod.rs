/// Connection pooling boundary
///
/// The monitor drives its pool through the `ConnectionPool` trait and never
/// sees the free-list. `BoundedPool` is the built-in implementation: a
/// bounded idle set with generation-tagged bulk invalidation. `clear` bumps
/// the generation; handles returned from an older generation are discarded,
/// so one call invalidates idle and outstanding connections alike. Discarded
/// connections close their transport on drop.
use crate::config::MonitorConfig;
use crate::error::{VigiaError, VigiaResult};
use crate::wire::{ConnectionFactory, NodeConnection};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Pool contract consumed by the monitor
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Borrow a connection, opening a fresh one while below capacity
    async fn borrow(&self) -> VigiaResult<PooledConn>;

    /// Return a borrowed connection to the idle set
    fn check_in(&self, conn: PooledConn);

    /// Invalidate every connection handed out or held so far
    fn clear(&self);

    /// Hint that the pool should revisit its size when convenient
    fn request_size_maintenance(&self);
}

/// Borrowed connection handle. Returns itself to its pool on drop; a handle
/// outliving a `clear` call is discarded instead.
pub struct PooledConn {
    conn: Option<Box<dyn NodeConnection>>,
    generation: u64,
    home: Weak<PoolCore>,
}

impl PooledConn {
    pub fn connection(&mut self) -> &mut dyn NodeConnection {
        self.conn
            .as_mut()
            .expect("pooled connection already returned")
            .as_mut()
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let (Some(conn), Some(core)) = (self.conn.take(), self.home.upgrade()) {
            core.restore(conn, self.generation);
        }
    }
}

struct IdleSet {
    conns: Vec<Box<dyn NodeConnection>>,
    generation: u64,
    /// Connections created in the current generation, idle or borrowed
    live: usize,
}

struct PoolCore {
    idle: Mutex<IdleSet>,
    capacity: usize,
}

impl PoolCore {
    fn restore(&self, conn: Box<dyn NodeConnection>, generation: u64) {
        let mut idle = self.lock_idle();
        if idle.generation == generation {
            idle.conns.push(conn);
        }
        // Stale generation: the connection is dropped here and closes
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, IdleSet> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Built-in bounded pool
pub struct BoundedPool {
    factory: Arc<dyn ConnectionFactory>,
    core: Arc<PoolCore>,
    connect_timeout: Duration,
    maintenance_requests: AtomicU64,
}

impl BoundedPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: &MonitorConfig) -> Self {
        Self {
            factory,
            core: Arc::new(PoolCore {
                idle: Mutex::new(IdleSet {
                    conns: Vec::new(),
                    generation: 0,
                    live: 0,
                }),
                capacity: config.max_pool_size,
            }),
            connect_timeout: config.connect_timeout(),
            maintenance_requests: AtomicU64::new(0),
        }
    }

    /// Connections currently resting in the idle set
    pub fn idle_count(&self) -> usize {
        self.core.lock_idle().conns.len()
    }

    /// Connections created in the current generation, idle or borrowed
    pub fn live_count(&self) -> usize {
        self.core.lock_idle().live
    }

    /// Number of size-maintenance hints received so far
    pub fn maintenance_requests(&self) -> u64 {
        self.maintenance_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionPool for BoundedPool {
    async fn borrow(&self) -> VigiaResult<PooledConn> {
        // Reserve under the lock, open outside it
        let generation = {
            let mut idle = self.core.lock_idle();
            if let Some(conn) = idle.conns.pop() {
                return Ok(PooledConn {
                    conn: Some(conn),
                    generation: idle.generation,
                    home: Arc::downgrade(&self.core),
                });
            }
            if idle.live >= self.core.capacity {
                return Err(VigiaError::pool_exhausted(format!(
                    "all {} connections are in use",
                    self.core.capacity
                )));
            }
            idle.live += 1;
            idle.generation
        };

        let opened = match timeout(self.connect_timeout, self.factory.open()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                self.release_reservation(generation);
                return Err(e);
            }
            Err(_) => {
                self.release_reservation(generation);
                return Err(VigiaError::timeout("open pooled connection"));
            }
        };

        Ok(PooledConn {
            conn: Some(opened),
            generation,
            home: Arc::downgrade(&self.core),
        })
    }

    fn check_in(&self, mut conn: PooledConn) {
        if let Some(inner) = conn.conn.take() {
            self.core.restore(inner, conn.generation);
        }
    }

    fn clear(&self) {
        let mut idle = self.core.lock_idle();
        idle.generation += 1;
        idle.conns.clear();
        idle.live = 0;
        debug!("connection pool cleared, generation {}", idle.generation);
    }

    fn request_size_maintenance(&self) {
        self.maintenance_requests.fetch_add(1, Ordering::SeqCst);
        debug!("pool size maintenance requested");
    }
}

impl BoundedPool {
    // Undo a reservation after a failed open, unless a clear already reset it
    fn release_reservation(&self, generation: u64) {
        let mut idle = self.core.lock_idle();
        if idle.generation == generation {
            idle.live -= 1;
        }
    }
}
