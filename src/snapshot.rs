/// Last-known node identity
///
/// `ServerSnapshot` is the immutable value the monitor publishes after each
/// successful identity lookup. Equality is curated: it covers every field a
/// topology layer routes on, and deliberately excludes the raw handshake
/// reply so byte-level reply churn does not fire change notifications.
use crate::address::NodeAddress;
use crate::wire::Document;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Size limit applied when the handshake reply carries none
pub const DEFAULT_MAX_DOCUMENT_SIZE: i32 = 4 * 1024 * 1024;

/// Message length limit applied when the handshake reply carries none
pub const DEFAULT_MAX_MESSAGE_LENGTH: i32 = 16_000_000;

/// Deployment role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Unknown,
    StandAlone,
    ReplicaSetMember,
    ShardRouter,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Unknown => write!(f, "unknown"),
            ServerRole::StandAlone => write!(f, "standalone"),
            ServerRole::ReplicaSetMember => write!(f, "replica set member"),
            ServerRole::ShardRouter => write!(f, "shard router"),
        }
    }
}

/// Server build metadata from the build-info command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub git_version: Option<String>,
}

/// Replica-set membership as reported by the node itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSetInfo {
    pub set_name: String,
    pub primary: Option<NodeAddress>,
    /// Union of regular, passive and arbiter members
    pub members: BTreeSet<NodeAddress>,
    pub tags: BTreeMap<String, String>,
}

/// Immutable description of a node at one point in time
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    pub(crate) role: ServerRole,
    pub(crate) is_primary: bool,
    pub(crate) is_secondary: bool,
    pub(crate) is_passive: bool,
    pub(crate) is_arbiter: bool,
    pub(crate) max_document_size: i32,
    pub(crate) max_message_length: i32,
    pub(crate) build_info: Option<BuildInfo>,
    pub(crate) replica_set: Option<ReplicaSetInfo>,
    pub(crate) raw_reply: Option<Document>,
}

impl ServerSnapshot {
    /// Snapshot for a node nothing is known about yet
    pub fn unknown() -> Self {
        Self {
            role: ServerRole::Unknown,
            is_primary: false,
            is_secondary: false,
            is_passive: false,
            is_arbiter: false,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            build_info: None,
            replica_set: None,
            raw_reply: None,
        }
    }

    /// Snapshot published when an identity lookup fails. Only the last-known
    /// role survives; every other field reverts to its unknown value.
    pub fn degraded(previous_role: ServerRole) -> Self {
        Self {
            role: previous_role,
            ..Self::unknown()
        }
    }

    pub fn role(&self) -> ServerRole {
        self.role
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn is_secondary(&self) -> bool {
        self.is_secondary
    }

    pub fn is_passive(&self) -> bool {
        self.is_passive
    }

    pub fn is_arbiter(&self) -> bool {
        self.is_arbiter
    }

    pub fn max_document_size(&self) -> i32 {
        self.max_document_size
    }

    pub fn max_message_length(&self) -> i32 {
        self.max_message_length
    }

    pub fn build_info(&self) -> Option<&BuildInfo> {
        self.build_info.as_ref()
    }

    pub fn replica_set(&self) -> Option<&ReplicaSetInfo> {
        self.replica_set.as_ref()
    }

    /// The raw identity reply, kept for diagnostics. Not part of equality.
    pub fn raw_reply(&self) -> Option<&Document> {
        self.raw_reply.as_ref()
    }
}

impl Default for ServerSnapshot {
    fn default() -> Self {
        Self::unknown()
    }
}

impl PartialEq for ServerSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.role == other.role
            && self.is_primary == other.is_primary
            && self.is_secondary == other.is_secondary
            && self.is_passive == other.is_passive
            && self.is_arbiter == other.is_arbiter
            && self.max_document_size == other.max_document_size
            && self.max_message_length == other.max_message_length
            && self.build_info == other.build_info
            && self.replica_set == other.replica_set
    }
}

impl Eq for ServerSnapshot {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn primary_snapshot() -> ServerSnapshot {
        ServerSnapshot {
            role: ServerRole::ReplicaSetMember,
            is_primary: true,
            is_secondary: false,
            is_passive: false,
            is_arbiter: false,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            build_info: Some(BuildInfo {
                version: "4.4.1".to_string(),
                git_version: None,
            }),
            replica_set: Some(ReplicaSetInfo {
                set_name: "rs0".to_string(),
                primary: Some(NodeAddress::new("db1", 27017)),
                members: BTreeSet::from([
                    NodeAddress::new("db1", 27017),
                    NodeAddress::new("db2", 27017),
                ]),
                tags: BTreeMap::new(),
            }),
            raw_reply: Some(json!({ "ok": 1, "ismaster": true })),
        }
    }

    #[test]
    fn test_unknown_snapshot_defaults() {
        let snapshot = ServerSnapshot::unknown();
        assert_eq!(snapshot.role(), ServerRole::Unknown);
        assert!(!snapshot.is_primary());
        assert_eq!(snapshot.max_document_size(), DEFAULT_MAX_DOCUMENT_SIZE);
        assert_eq!(snapshot.max_message_length(), DEFAULT_MAX_MESSAGE_LENGTH);
        assert!(snapshot.build_info().is_none());
        assert!(snapshot.replica_set().is_none());
    }

    #[test]
    fn test_degraded_keeps_only_the_role() {
        let degraded = ServerSnapshot::degraded(ServerRole::ShardRouter);
        assert_eq!(degraded.role(), ServerRole::ShardRouter);
        assert!(!degraded.is_primary());
        assert!(degraded.build_info().is_none());
        assert!(degraded.replica_set().is_none());
        assert!(degraded.raw_reply().is_none());
    }

    #[test]
    fn test_equality_ignores_raw_reply() {
        let a = primary_snapshot();
        let mut b = primary_snapshot();
        b.raw_reply = Some(json!({ "ok": 1, "ismaster": true, "localTime": 12345 }));
        assert_eq!(a, b);

        b.raw_reply = None;
        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_covers_curated_fields() {
        let a = primary_snapshot();

        let mut stepped_down = primary_snapshot();
        stepped_down.is_primary = false;
        stepped_down.is_secondary = true;
        assert_ne!(a, stepped_down);

        let mut upgraded = primary_snapshot();
        upgraded.build_info = Some(BuildInfo {
            version: "5.0.0".to_string(),
            git_version: None,
        });
        assert_ne!(a, upgraded);

        let mut new_member = primary_snapshot();
        if let Some(rs) = new_member.replica_set.as_mut() {
            rs.members.insert(NodeAddress::new("db3", 27017));
        }
        assert_ne!(a, new_member);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(ServerRole::ShardRouter.to_string(), "shard router");
        assert_eq!(ServerRole::Unknown.to_string(), "unknown");
    }
}
