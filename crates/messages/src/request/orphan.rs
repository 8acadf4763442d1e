//! Orphan purge request.

use crate::response::SimpleResponse;
use crate::{BusMessage, Request};
use fleet_types::{Credentials, ServiceId};
use serde::{Deserialize, Serialize};

/// Ask a node to delete instances and bindings unknown upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurgeOrphanRequest {
    #[serde(default)]
    pub orphan_ins_list: Vec<ServiceId>,
    #[serde(default)]
    pub orphan_binding_list: Vec<Credentials>,
}

impl BusMessage for PurgeOrphanRequest {
    fn operation() -> &'static str {
        "purge_orphan"
    }
}

impl Request for PurgeOrphanRequest {
    type Response = SimpleResponse;
}
