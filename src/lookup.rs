/// Identity lookup over an established connection
///
/// Runs the identity and build-info commands against a node and assembles a
/// `ServerSnapshot` from the replies. Build-info failures caused by missing
/// authentication are tolerated; every other failure aborts the lookup and
/// leaves the caller to publish a degraded snapshot.
use crate::address::NodeAddress;
use crate::error::{VigiaError, VigiaResult};
use crate::snapshot::{
    BuildInfo, ReplicaSetInfo, ServerRole, ServerSnapshot, DEFAULT_MAX_DOCUMENT_SIZE,
    DEFAULT_MAX_MESSAGE_LENGTH,
};
use crate::wire::{commands, Document, NodeConnection};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Typed view of the identity command reply
#[derive(Debug, Deserialize)]
pub(crate) struct IdentityReply {
    #[serde(default, rename = "ismaster")]
    pub is_master: bool,
    #[serde(default)]
    pub secondary: bool,
    #[serde(default)]
    pub passive: bool,
    #[serde(default, rename = "arbiterOnly")]
    pub arbiter_only: bool,
    #[serde(rename = "setName")]
    pub set_name: Option<String>,
    pub primary: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub passives: Vec<String>,
    #[serde(default)]
    pub arbiters: Vec<String>,
    pub msg: Option<String>,
    #[serde(rename = "maxBsonObjectSize")]
    pub max_bson_object_size: Option<i32>,
    #[serde(rename = "maxMessageSizeBytes")]
    pub max_message_size_bytes: Option<i32>,
}

/// Typed view of the build-info command reply
#[derive(Debug, Deserialize)]
pub(crate) struct BuildInfoReply {
    pub version: String,
    #[serde(rename = "gitVersion")]
    pub git_version: Option<String>,
}

/// Query a healthy connection for the node's identity and build a snapshot
pub async fn describe(
    conn: &mut dyn NodeConnection,
    admin_database: &str,
) -> VigiaResult<ServerSnapshot> {
    let reply = conn
        .run_admin_command(admin_database, commands::is_master(), true)
        .await?;
    if !reply.ok() {
        return Err(reply.command_error("ismaster"));
    }
    let raw = reply.into_document();
    let identity: IdentityReply = serde_json::from_value(raw.clone())
        .map_err(|e| VigiaError::protocol(format!("malformed ismaster reply: {}", e)))?;

    let build_info = match fetch_build_info(conn, admin_database).await {
        Ok(info) => Some(info),
        Err(e) if e.is_not_authenticated() => {
            debug!("build info unavailable without authentication: {}", e);
            None
        }
        Err(e) => return Err(e),
    };

    assemble(identity, build_info, raw)
}

async fn fetch_build_info(
    conn: &mut dyn NodeConnection,
    admin_database: &str,
) -> VigiaResult<BuildInfo> {
    let reply = conn
        .run_admin_command(admin_database, commands::build_info(), true)
        .await?;
    if !reply.ok() {
        return Err(reply.command_error("buildinfo"));
    }
    let parsed: BuildInfoReply = serde_json::from_value(reply.into_document())
        .map_err(|e| VigiaError::protocol(format!("malformed buildinfo reply: {}", e)))?;
    Ok(BuildInfo {
        version: parsed.version,
        git_version: parsed.git_version,
    })
}

fn assemble(
    identity: IdentityReply,
    build_info: Option<BuildInfo>,
    raw: Document,
) -> VigiaResult<ServerSnapshot> {
    let max_document_size = identity
        .max_bson_object_size
        .unwrap_or(DEFAULT_MAX_DOCUMENT_SIZE);
    let max_message_length = match identity.max_message_size_bytes {
        Some(length) => length,
        None => DEFAULT_MAX_MESSAGE_LENGTH.max(max_document_size + 1024),
    };

    let (role, replica_set) = match identity.set_name {
        Some(ref set_name) if !set_name.is_empty() => {
            let mut members = BTreeSet::new();
            for host in identity
                .hosts
                .iter()
                .chain(&identity.passives)
                .chain(&identity.arbiters)
            {
                members.insert(host.parse::<NodeAddress>()?);
            }
            let primary = match identity.primary {
                Some(ref primary) => Some(primary.parse::<NodeAddress>()?),
                None => None,
            };
            (
                ServerRole::ReplicaSetMember,
                Some(ReplicaSetInfo {
                    set_name: set_name.clone(),
                    primary,
                    members,
                    tags: BTreeMap::new(),
                }),
            )
        }
        _ if identity.msg.as_deref() == Some("isdbgrid") => (ServerRole::ShardRouter, None),
        _ => (ServerRole::StandAlone, None),
    };

    Ok(ServerSnapshot {
        role,
        is_primary: identity.is_master,
        is_secondary: identity.secondary,
        is_passive: identity.passive,
        is_arbiter: identity.arbiter_only,
        max_document_size,
        max_message_length,
        build_info,
        replica_set,
        raw_reply: Some(raw),
    })
}
