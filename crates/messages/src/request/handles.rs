//! Node-originated handle queries.
//!
//! These flow the other way: a node asks the provisioner, which answers on
//! the node's reply inbox.

use crate::response::{HandlesResponse, SimpleResponse};
use crate::{BusMessage, Request};
use fleet_types::{ServiceHandle, ServiceId};
use serde::{Deserialize, Serialize};

/// Ask for known handles.
///
/// On the wire the payload is either empty (all handles) or an instance
/// id (the credentials of that instance's bindings); see
/// [`HandlesQuery::from_payload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlesQuery {
    All,
    BindingsOf(ServiceId),
}

impl HandlesQuery {
    /// Interpret a raw query payload.
    ///
    /// Accepts an empty payload, a bare instance id, or a JSON string.
    pub fn from_payload(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();
        if text.is_empty() || text == "\"\"" {
            return HandlesQuery::All;
        }
        match serde_json::from_str::<String>(text) {
            Ok(id) => HandlesQuery::BindingsOf(ServiceId::new(id)),
            Err(_) => HandlesQuery::BindingsOf(ServiceId::new(text)),
        }
    }
}

impl BusMessage for HandlesQuery {
    fn operation() -> &'static str {
        "handles"
    }
}

impl Request for HandlesQuery {
    type Response = HandlesResponse;
}

/// A node asking the provisioner to persist a corrected handle upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateServiceHandle(pub ServiceHandle);

impl BusMessage for UpdateServiceHandle {
    fn operation() -> &'static str {
        "update_service_handle"
    }
}

impl Request for UpdateServiceHandle {
    type Response = SimpleResponse;
}
