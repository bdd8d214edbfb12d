/// Per-node connection lifecycle and health monitoring
///
/// `NodeMonitor` owns everything the client tracks about one remote node:
/// the connection state machine, the published identity snapshot, the
/// rolling latency average, the connection pool, and the background
/// verification timer. State and snapshot are published together as one
/// atomic unit; readers never take a lock.
use crate::address::NodeAddress;
use crate::config::MonitorConfig;
use crate::error::{VigiaError, VigiaResult};
use crate::events::{NodeObserver, ObserverRegistry};
use crate::latency::LatencyAggregator;
use crate::lookup;
use crate::pool::{BoundedPool, ConnectionPool, PooledConn};
use crate::snapshot::{BuildInfo, ReplicaSetInfo, ServerRole, ServerSnapshot};
use crate::wire::{commands, ConnectionFactory, NodeConnection};
use arc_swap::{ArcSwap, ArcSwapOption};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant as TokioInstant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Monotonic source for monitor identities across the process
static NEXT_SEQUENTIAL_ID: AtomicU64 = AtomicU64::new(1);

/// Connection lifecycle state of a monitored node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// The atomically published (state, snapshot) pair
struct NodeStatus {
    state: ConnectionState,
    snapshot: Arc<ServerSnapshot>,
}

/// Background verification timer, stored under the lifecycle lock
struct TimerHandle {
    task: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl TimerHandle {
    // The loop observes the signal between ticks; an in-flight tick finishes
    fn stop(self) {
        let _ = self.stop.send(true);
        drop(self.task);
    }
}

struct Lifecycle {
    timer: Option<TimerHandle>,
}

/// Clears the verification reentrancy flag on every exit path
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Health-monitoring and connection-lifecycle controller for one node
pub struct NodeMonitor {
    address: NodeAddress,
    sequential_id: u64,
    config: MonitorConfig,
    factory: Arc<dyn ConnectionFactory>,
    pool: Arc<dyn ConnectionPool>,
    status: ArcSwap<NodeStatus>,
    last_error: ArcSwapOption<VigiaError>,
    average_rtt: ArcSwapOption<Duration>,
    latency: Mutex<LatencyAggregator>,
    lifecycle: AsyncMutex<Lifecycle>,
    verifying: AtomicBool,
    observers: ObserverRegistry,
    resolved: OnceLock<SocketAddr>,
}

impl NodeMonitor {
    /// Create a monitor with the built-in bounded pool
    pub fn new(
        address: NodeAddress,
        config: MonitorConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Arc<Self> {
        let pool = Arc::new(BoundedPool::new(factory.clone(), &config));
        Self::with_pool(address, config, factory, pool)
    }

    /// Create a monitor over a caller-supplied pool
    pub fn with_pool(
        address: NodeAddress,
        config: MonitorConfig,
        factory: Arc<dyn ConnectionFactory>,
        pool: Arc<dyn ConnectionPool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sequential_id: NEXT_SEQUENTIAL_ID.fetch_add(1, Ordering::Relaxed),
            address,
            config,
            factory,
            pool,
            status: ArcSwap::from_pointee(NodeStatus {
                state: ConnectionState::Disconnected,
                snapshot: Arc::new(ServerSnapshot::unknown()),
            }),
            last_error: ArcSwapOption::empty(),
            average_rtt: ArcSwapOption::empty(),
            latency: Mutex::new(LatencyAggregator::new()),
            lifecycle: AsyncMutex::new(Lifecycle { timer: None }),
            verifying: AtomicBool::new(false),
            observers: ObserverRegistry::new(),
            resolved: OnceLock::new(),
        })
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Process-wide creation order of this monitor
    pub fn sequential_id(&self) -> u64 {
        self.sequential_id
    }

    pub fn state(&self) -> ConnectionState {
        self.status.load().state
    }

    /// Full identity snapshot, shared with the publisher
    pub fn snapshot(&self) -> Arc<ServerSnapshot> {
        self.status.load().snapshot.clone()
    }

    /// State and snapshot as one coherent pair
    pub fn status(&self) -> (ConnectionState, Arc<ServerSnapshot>) {
        let status = self.status.load();
        (status.state, status.snapshot.clone())
    }

    pub fn role(&self) -> ServerRole {
        self.status.load().snapshot.role()
    }

    pub fn is_primary(&self) -> bool {
        self.status.load().snapshot.is_primary()
    }

    pub fn is_secondary(&self) -> bool {
        self.status.load().snapshot.is_secondary()
    }

    pub fn is_passive(&self) -> bool {
        self.status.load().snapshot.is_passive()
    }

    pub fn is_arbiter(&self) -> bool {
        self.status.load().snapshot.is_arbiter()
    }

    pub fn max_document_size(&self) -> i32 {
        self.status.load().snapshot.max_document_size()
    }

    pub fn max_message_length(&self) -> i32 {
        self.status.load().snapshot.max_message_length()
    }

    pub fn build_info(&self) -> Option<BuildInfo> {
        self.status.load().snapshot.build_info().cloned()
    }

    pub fn replica_set_info(&self) -> Option<ReplicaSetInfo> {
        self.status.load().snapshot.replica_set().cloned()
    }

    /// Error recorded by the most recent failed connect attempt
    pub fn last_error(&self) -> Option<Arc<VigiaError>> {
        self.last_error.load_full()
    }

    /// Rolling round-trip average, `None` until a ping succeeded
    pub fn average_round_trip_time(&self) -> Option<Duration> {
        self.average_rtt.load().as_deref().copied()
    }

    pub fn subscribe(&self, observer: Arc<dyn NodeObserver>) {
        self.observers.subscribe(observer);
    }

    /// Resolve the node address, caching the first successful result.
    /// Resolution is synchronous; concurrent first calls may both resolve,
    /// after which one result wins and is returned to everyone.
    pub fn resolve(&self) -> VigiaResult<SocketAddr> {
        if let Some(addr) = self.resolved.get() {
            return Ok(*addr);
        }
        let addr = (self.address.host(), self.address.port())
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                VigiaError::address(format!("no addresses resolved for {}", self.address))
            })?;
        let _ = self.resolved.set(addr);
        Ok(self.resolved.get().copied().unwrap_or(addr))
    }

    /// Establish the node connection and publish its identity.
    ///
    /// Idempotent while connecting or connected. Any other entry state
    /// starts a fresh attempt: the last connection error is cleared, the
    /// state moves through `Connecting`, a pooled connection is probed and
    /// queried for identity, and the outcome is published. The verification
    /// timer is started after the first attempt regardless of outcome.
    pub async fn connect(self: &Arc<Self>) -> VigiaResult<()> {
        let entry = {
            let mut lifecycle = self.lifecycle.lock().await;
            match self.state() {
                ConnectionState::Connecting | ConnectionState::Connected => None,
                _ => {
                    self.last_error.store(None);
                    Some(self.apply_status(
                        &mut lifecycle,
                        Some(ConnectionState::Connecting),
                        None,
                    ))
                }
            }
        };
        let changed = match entry {
            None => return Ok(()),
            Some(changed) => changed,
        };
        if changed {
            self.observers.notify_server_changed();
        }

        let result = match self.pool.borrow().await {
            Ok(mut conn) => {
                let probed = self.check_and_refresh(conn.connection()).await;
                self.pool.check_in(conn);
                probed
            }
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(()) => {
                self.update_status(Some(ConnectionState::Connected), None)
                    .await;
                info!("connected to node {}", self.address);
                Ok(())
            }
            Err(e) => {
                warn!("connection to node {} failed: {}", self.address, e);
                self.last_error.store(Some(Arc::new(e.clone())));
                self.update_status(Some(ConnectionState::Disconnected), None)
                    .await;
                Err(e)
            }
        };

        {
            let mut lifecycle = self.lifecycle.lock().await;
            self.spawn_timer(&mut lifecycle);
        }

        outcome
    }

    /// Tear the node connection down.
    ///
    /// Fails fast when a disconnect is already in progress. Stops the
    /// verification timer, then publishes `Disconnecting` followed by
    /// `Disconnected`; the pool is cleared by the `Disconnected` publication
    /// itself, so no stale connection survives.
    pub async fn disconnect(&self) -> VigiaResult<()> {
        let timer = {
            let mut lifecycle = self.lifecycle.lock().await;
            if self.state() == ConnectionState::Disconnecting {
                return Err(VigiaError::state(format!(
                    "disconnect of node {} is already in progress",
                    self.address
                )));
            }
            lifecycle.timer.take()
        };
        if let Some(timer) = timer {
            debug!("stopping verification timer for node {}", self.address);
            timer.stop();
        }
        if self.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        self.update_status(Some(ConnectionState::Disconnecting), None)
            .await;
        self.update_status(Some(ConnectionState::Disconnected), None)
            .await;
        info!("disconnected from node {}", self.address);
        Ok(())
    }

    /// Measure one round trip on a dedicated connection, so a health probe
    /// never consumes or waits on pool capacity.
    ///
    /// The sample feeds the rolling average; a moved average fires the
    /// latency notification. A failed ping clears the aggregator and
    /// publishes `Disconnected` before the error is returned.
    pub async fn ping(&self) -> VigiaResult<Duration> {
        let mut conn = self.open_dedicated().await?;
        let result = self.probe_with(conn.as_mut()).await;
        conn.close().await;
        result
    }

    /// Re-check the node on a dedicated connection and force `Connected`.
    ///
    /// Runs the health check and the identity lookup outside the pool, so a
    /// node that recovered behind the client's back is readmitted. Errors
    /// propagate after the failure paths have already degraded the state.
    pub async fn verify(&self) -> VigiaResult<()> {
        let mut conn = self.open_dedicated().await?;
        let result = self.check_and_refresh(conn.as_mut()).await;
        conn.close().await;
        result?;
        self.update_status(Some(ConnectionState::Connected), None)
            .await;
        Ok(())
    }

    /// Borrow a pooled connection for application use.
    ///
    /// Fails with a state error unless the node is connected; the borrow
    /// happens under the lifecycle lock so a concurrent disconnect cannot
    /// slip between the check and the borrow. Credentials are verified on
    /// the borrowed connection afterwards; on any verification failure the
    /// connection goes back to the pool and the error propagates.
    pub async fn acquire_connection(&self, database: &str) -> VigiaResult<PooledConn> {
        let mut conn = {
            let _lifecycle = self.lifecycle.lock().await;
            let state = self.state();
            if state != ConnectionState::Connected {
                return Err(VigiaError::state(format!(
                    "node {} is {}, not connected",
                    self.address, state
                )));
            }
            self.pool.borrow().await?
        };

        match conn.connection().verify_credentials(database).await {
            Ok(()) => Ok(conn),
            Err(e) => {
                self.pool.check_in(conn);
                Err(e)
            }
        }
    }

    /// Return a previously acquired connection. Dropping the handle has the
    /// same effect.
    pub fn release_connection(&self, conn: PooledConn) {
        self.pool.check_in(conn);
    }

    // Ping followed by identity lookup on the given connection. The lookup
    // result is published with the state left as it is; lookup failure
    // publishes a degraded snapshot together with a forced disconnect.
    async fn check_and_refresh(&self, conn: &mut dyn NodeConnection) -> VigiaResult<()> {
        self.probe_with(conn).await?;
        match lookup::describe(conn, &self.config.admin_database).await {
            Ok(snapshot) => {
                self.update_status(None, Some(Arc::new(snapshot))).await;
                Ok(())
            }
            Err(e) => {
                let degraded = ServerSnapshot::degraded(self.role());
                self.update_status(Some(ConnectionState::Disconnected), Some(Arc::new(degraded)))
                    .await;
                Err(e)
            }
        }
    }

    async fn probe_with(&self, conn: &mut dyn NodeConnection) -> VigiaResult<Duration> {
        match self.timed_ping(conn).await {
            Ok(rtt) => {
                let (before, after) = {
                    let mut aggregator = self.lock_latency();
                    let before = aggregator.average();
                    aggregator.include(rtt);
                    (before, aggregator.average())
                };
                self.average_rtt.store(after.map(Arc::new));
                if before != after {
                    if let Some(average) = after {
                        debug!(
                            "round trip to node {} now averages {:?}",
                            self.address, average
                        );
                        self.observers.notify_latency_changed(average);
                    }
                }
                Ok(rtt)
            }
            Err(e) => {
                self.lock_latency().clear();
                self.average_rtt.store(None);
                self.update_status(Some(ConnectionState::Disconnected), None)
                    .await;
                Err(e)
            }
        }
    }

    async fn timed_ping(&self, conn: &mut dyn NodeConnection) -> VigiaResult<Duration> {
        let started = Instant::now();
        let pinged = timeout(
            self.config.check_timeout(),
            conn.run_admin_command(&self.config.admin_database, commands::ping(), true),
        )
        .await;
        let reply = match pinged {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(VigiaError::timeout("ping")),
        };
        if !reply.ok() {
            return Err(reply.command_error("ping"));
        }
        Ok(started.elapsed())
    }

    async fn open_dedicated(&self) -> VigiaResult<Box<dyn NodeConnection>> {
        match timeout(self.config.connect_timeout(), self.factory.open()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VigiaError::timeout("open dedicated connection")),
        }
    }

    // One tick of the background timer. Reentrancy-guarded; every error is
    // swallowed here so nothing escapes into the timer task.
    async fn tick(&self) {
        if self
            .verifying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("verification of node {} already in flight", self.address);
            return;
        }
        let _guard = InFlightGuard(&self.verifying);
        match self.verify().await {
            Ok(()) => self.pool.request_size_maintenance(),
            Err(e) => debug!("background verification of node {} failed: {}", self.address, e),
        }
    }

    async fn update_status(
        &self,
        state: Option<ConnectionState>,
        snapshot: Option<Arc<ServerSnapshot>>,
    ) {
        let changed = {
            let mut lifecycle = self.lifecycle.lock().await;
            self.apply_status(&mut lifecycle, state, snapshot)
        };
        if changed {
            self.observers.notify_server_changed();
        }
    }

    // Caller holds the lifecycle lock. Stores the new pair only when the
    // state or the curated snapshot content changed, and reports whether it
    // did; entering Disconnected clears the pool as part of the same update.
    fn apply_status(
        &self,
        _lifecycle: &mut Lifecycle,
        state: Option<ConnectionState>,
        snapshot: Option<Arc<ServerSnapshot>>,
    ) -> bool {
        let current = self.status.load_full();
        let target_state = state.unwrap_or(current.state);
        let target_snapshot = snapshot.unwrap_or_else(|| current.snapshot.clone());
        let changed = target_state != current.state || *target_snapshot != *current.snapshot;

        if state == Some(ConnectionState::Disconnected) {
            self.pool.clear();
        }
        if changed {
            debug!(
                "node {} now {} (was {})",
                self.address, target_state, current.state
            );
            self.status.store(Arc::new(NodeStatus {
                state: target_state,
                snapshot: target_snapshot,
            }));
        }
        changed
    }

    // Caller holds the lifecycle lock. The timer survives until disconnect
    // takes it, so repeated connect calls never stack timers.
    fn spawn_timer(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        if lifecycle.timer.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(verification_loop(
            Arc::downgrade(self),
            self.config.heartbeat_interval(),
            stop_rx,
        ));
        lifecycle.timer = Some(TimerHandle {
            task,
            stop: stop_tx,
        });
    }

    fn lock_latency(&self) -> std::sync::MutexGuard<'_, LatencyAggregator> {
        match self.latency.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for NodeMonitor {
    fn drop(&mut self) {
        if let Ok(mut lifecycle) = self.lifecycle.try_lock() {
            if let Some(timer) = lifecycle.timer.take() {
                timer.stop();
            }
        }
    }
}

/// Timer task body: verify the node once per period, first fire one full
/// period after start, skipping ticks that pile up behind a slow check.
async fn verification_loop(
    monitor: std::sync::Weak<NodeMonitor>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(TokioInstant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.tick().await;
            }
            _ = stop.changed() => {
                debug!("verification timer shutting down");
                break;
            }
        }
    }
}
