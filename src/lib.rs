/// Vigia - Per-node health monitoring for MongoDB-style clustered deployments
///
/// Vigia tracks one monitor per remote node (standalone server, replica set
/// member or shard router): it drives the connection lifecycle state machine,
/// keeps an identity snapshot from the node's own handshake replies, maintains
/// a rolling round-trip average, pools application connections and re-verifies
/// the node on a background timer.
pub mod address;
pub mod config;
pub mod error;
pub mod events;
pub mod latency;
pub mod lookup;
pub mod monitor;
pub mod pool;
pub mod snapshot;
pub mod wire;

pub use address::{DEFAULT_PORT, NodeAddress};
pub use config::MonitorConfig;
pub use error::{ConfigError, VigiaError, VigiaResult};
pub use events::NodeObserver;
pub use monitor::{ConnectionState, NodeMonitor};
pub use pool::{BoundedPool, ConnectionPool, PooledConn};
pub use snapshot::{BuildInfo, ReplicaSetInfo, ServerRole, ServerSnapshot};
pub use wire::{ConnectionFactory, Document, NodeConnection, Reply};
