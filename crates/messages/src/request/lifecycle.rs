//! Instance lifecycle requests.

use crate::response::{ProvisionResponse, SimpleResponse};
use crate::{BusMessage, Request};
use fleet_types::{Credentials, ServiceId};
use serde::{Deserialize, Serialize};

/// Ask a node to create an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Service plan, e.g. `free`. Forwarded as the client gave it, so it
    /// may be absent.
    #[serde(default)]
    pub plan: Option<String>,

    /// Credentials of a previous incarnation.
    ///
    /// Set during recovery so the node can recreate the same instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl ProvisionRequest {
    pub fn new(plan: impl Into<String>) -> Self {
        Self {
            plan: Some(plan.into()),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

impl BusMessage for ProvisionRequest {
    fn operation() -> &'static str {
        "provision"
    }
}

impl Request for ProvisionRequest {
    type Response = ProvisionResponse;
}

/// Ask a node to destroy an instance and every binding on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnprovisionRequest {
    /// The instance to remove.
    pub name: ServiceId,

    /// Credentials of the instance's bindings, so dependent grants are
    /// cleaned up with it.
    #[serde(default)]
    pub bindings: Vec<Credentials>,
}

impl BusMessage for UnprovisionRequest {
    fn operation() -> &'static str {
        "unprovision"
    }
}

impl Request for UnprovisionRequest {
    type Response = SimpleResponse;
}

/// Ask a node to restore an instance's data from a backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub instance_id: ServiceId,
    pub backup_path: String,
}

impl BusMessage for RestoreRequest {
    fn operation() -> &'static str {
        "restore"
    }
}

impl Request for RestoreRequest {
    type Response = SimpleResponse;
}
