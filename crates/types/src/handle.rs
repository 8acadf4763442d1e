//! Service instance records and handles.
//!
//! The provisioner's directory and the upstream system of record exchange
//! the same shape: `{service_id, configuration, credentials}`. Instances and
//! bindings share it; a binding's `credentials.name` points at its instance.

use crate::{NodeId, ServiceId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Replacement shown for secrets in status output.
pub const MASKED_PASSWORD: &str = "********";

/// Opaque configuration recorded with a handle.
pub type Configuration = Map<String, Value>;

/// Credentials returned by a node.
///
/// Opaque apart from two well-known fields: `name` (the owning instance)
/// and `node_id` (where the instance lives).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub Map<String, Value>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a string field, returning the updated credentials.
    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.0.insert(field.to_string(), Value::String(value.into()));
        self
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// The instance these credentials belong to.
    pub fn name(&self) -> Option<ServiceId> {
        self.get_str("name").map(ServiceId::from)
    }

    /// The node hosting the instance.
    pub fn node_id(&self) -> Option<NodeId> {
        self.get_str("node_id").map(NodeId::from)
    }

    /// Copy with `pass` and `password` replaced by [`MASKED_PASSWORD`].
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        for field in ["pass", "password"] {
            if let Some(value) = masked.0.get_mut(field) {
                *value = Value::String(MASKED_PASSWORD.to_string());
            }
        }
        masked
    }
}

/// A provisioned instance or binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub service_id: ServiceId,
    #[serde(default)]
    pub configuration: Configuration,
    pub credentials: Credentials,
}

impl ServiceHandle {
    pub fn new(service_id: ServiceId, configuration: Configuration, credentials: Credentials) -> Self {
        Self {
            service_id,
            configuration,
            credentials,
        }
    }

    /// Whether this handle is a binding of `instance`.
    ///
    /// The instance's own handle also carries `credentials.name == instance`,
    /// so it is excluded by id.
    pub fn is_binding_of(&self, instance: &ServiceId) -> bool {
        self.service_id != *instance && self.credentials.name().as_ref() == Some(instance)
    }

    /// Binding options recorded under `configuration.data.binding_options`.
    pub fn binding_options(&self) -> Option<&Value> {
        self.configuration
            .get("data")
            .and_then(|data| data.get("binding_options"))
    }

    pub fn masked(&self) -> Self {
        Self {
            service_id: self.service_id.clone(),
            configuration: self.configuration.clone(),
            credentials: self.credentials.masked(),
        }
    }
}
