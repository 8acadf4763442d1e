//! Orphan detection messages.

use crate::BusMessage;
use fleet_types::{Credentials, NodeId, ServiceError, ServiceHandle, ServiceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Broadcast of every handle known upstream; nodes compare it with what
/// they host and answer on `{service}.orphan_result`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckOrphanRequest {
    #[serde(default)]
    pub handles: Vec<ServiceHandle>,
}

impl BusMessage for CheckOrphanRequest {
    fn operation() -> &'static str {
        "check_orphan"
    }
}

/// A node's orphan report.
///
/// Keyed by node id so reports from several nodes merge into one map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckOrphanResponse {
    pub success: bool,

    #[serde(default, alias = "orphan_ins_hash")]
    pub orphan_instances: BTreeMap<NodeId, Vec<ServiceId>>,

    #[serde(default, alias = "orphan_binding_hash")]
    pub orphan_bindings: BTreeMap<NodeId, Vec<Credentials>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

impl BusMessage for CheckOrphanResponse {
    fn operation() -> &'static str {
        "orphan_result"
    }
}
