//! Binding requests.

use crate::response::{BindResponse, SimpleResponse};
use crate::{BusMessage, Request};
use fleet_types::{Credentials, ServiceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ask a node to create a binding (a set of credentials) on an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindRequest {
    /// The instance being bound.
    pub name: ServiceId,

    /// Binding options from the gateway, opaque to the provisioner.
    #[serde(default)]
    pub bind_opts: Value,

    /// Credentials of a previous binding, set during recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl BusMessage for BindRequest {
    fn operation() -> &'static str {
        "bind"
    }
}

impl Request for BindRequest {
    type Response = BindResponse;
}

/// Ask a node to revoke a binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnbindRequest {
    pub credentials: Credentials,
}

impl BusMessage for UnbindRequest {
    fn operation() -> &'static str {
        "unbind"
    }
}

impl Request for UnbindRequest {
    type Response = SimpleResponse;
}
