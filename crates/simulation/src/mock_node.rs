//! Scripted in-process service nodes.
//!
//! A [`MockNode`] keeps a tiny model of what it hosts (instances keyed by
//! name, bindings keyed by user) and answers every provisioner message the
//! way a real node would. Behaviour can be scripted per operation to fail,
//! stay silent, reply late or reply with garbage.

use fleet_messages::codec;
use fleet_messages::{
    BindRequest, BindResponse, CheckOrphanRequest, CheckOrphanResponse, NodeAnnouncement,
    ProvisionRequest, ProvisionResponse, PurgeOrphanRequest, RestoreRequest, SimpleResponse,
    UnbindRequest, UnprovisionRequest,
};
use fleet_types::{Capacity, Credentials, ErrorCode, NodeId, ServiceError, ServiceId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

/// Error a failing node reports.
pub const NODE_FAILURE: ErrorCode = ErrorCode::new(31100, 500, "Node failure: %s");
/// Error a node reports for an instance it does not host.
pub const INSTANCE_NOT_FOUND: ErrorCode = ErrorCode::new(31102, 404, "Could not find instance: %s");

/// How a node answers.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeBehavior {
    Healthy,
    /// Reply `success = false` with this error.
    Failing(ServiceError),
    /// Never reply.
    Silent,
    /// Reply with an undecodable payload.
    Malformed,
    /// Behave normally but reply after this extra delay.
    Slow(Duration),
}

/// What a node does in response to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// Answer on the request's reply inbox.
    Reply { payload: Vec<u8>, delay: Duration },
    /// Publish on `{service}.{operation}`.
    Publish {
        operation: &'static str,
        payload: Vec<u8>,
    },
    Nothing,
}

/// A scripted node.
#[derive(Debug, Clone)]
pub struct MockNode {
    id: NodeId,
    capacity: Capacity,
    behavior: NodeBehavior,
    overrides: HashMap<String, NodeBehavior>,
    instances: BTreeMap<ServiceId, Credentials>,
    /// Bindings by user name.
    bindings: BTreeMap<String, Credentials>,
    restores: Vec<(ServiceId, String)>,
    received: Vec<String>,
    next_id: u64,
}

impl MockNode {
    pub fn new(id: impl Into<NodeId>, capacity: Capacity) -> Self {
        Self {
            id: id.into(),
            capacity,
            behavior: NodeBehavior::Healthy,
            overrides: HashMap::new(),
            instances: BTreeMap::new(),
            bindings: BTreeMap::new(),
            restores: Vec::new(),
            received: Vec::new(),
            next_id: 0,
        }
    }

    /// Set the behaviour for every operation without an override.
    pub fn with_behavior(mut self, behavior: NodeBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Set the behaviour for one operation.
    pub fn with_operation_behavior(mut self, operation: &str, behavior: NodeBehavior) -> Self {
        self.overrides.insert(operation.to_string(), behavior);
        self
    }

    pub fn set_behavior(&mut self, behavior: NodeBehavior) {
        self.behavior = behavior;
    }

    pub fn set_operation_behavior(&mut self, operation: &str, behavior: NodeBehavior) {
        self.overrides.insert(operation.to_string(), behavior);
    }

    pub fn set_capacity(&mut self, capacity: Capacity) {
        self.capacity = capacity;
    }

    /// Host an instance the provisioner never asked for.
    pub fn host_instance(&mut self, name: &str) {
        let credentials = self.instance_credentials(ServiceId::from(name));
        self.instances.insert(ServiceId::from(name), credentials);
    }

    /// Host a binding the provisioner never asked for.
    pub fn host_binding(&mut self, instance: &str, user: &str) {
        let credentials = Credentials::new()
            .with("name", instance)
            .with("node_id", self.id.as_str())
            .with("user", user)
            .with("password", "secret");
        self.bindings.insert(user.to_string(), credentials);
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn instances(&self) -> &BTreeMap<ServiceId, Credentials> {
        &self.instances
    }

    pub fn bindings(&self) -> &BTreeMap<String, Credentials> {
        &self.bindings
    }

    pub fn restores(&self) -> &[(ServiceId, String)] {
        &self.restores
    }

    /// Operations received, in order.
    pub fn received(&self) -> &[String] {
        &self.received
    }

    pub fn received_count(&self, operation: &str) -> usize {
        self.received.iter().filter(|op| *op == operation).count()
    }

    /// Payload of a `{service}.announce` message.
    pub fn announcement(&self) -> Vec<u8> {
        encode(&NodeAnnouncement::new(self.id.clone(), self.capacity.clone()))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Message handling
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn handle(&mut self, operation: &str, payload: &[u8]) -> NodeOutput {
        self.received.push(operation.to_string());
        let behavior = self
            .overrides
            .get(operation)
            .unwrap_or(&self.behavior)
            .clone();
        debug!(node = %self.id, operation, ?behavior, "Mock node received message");

        let delay = match behavior {
            NodeBehavior::Silent => return NodeOutput::Nothing,
            NodeBehavior::Malformed => {
                return NodeOutput::Reply {
                    payload: b"{not json".to_vec(),
                    delay: Duration::ZERO,
                }
            }
            NodeBehavior::Failing(error) => return self.fail(operation, error),
            NodeBehavior::Slow(delay) => delay,
            NodeBehavior::Healthy => Duration::ZERO,
        };

        let result = match operation {
            "discover" => Ok(self.announcement()),
            "provision" => self.on_provision(payload),
            "unprovision" => self.on_unprovision(payload),
            "bind" => self.on_bind(payload),
            "unbind" => self.on_unbind(payload),
            "restore" => self.on_restore(payload),
            "purge_orphan" => self.on_purge_orphan(payload),
            "check_orphan" => {
                return match self.on_check_orphan(payload) {
                    Some(payload) => NodeOutput::Publish {
                        operation: "orphan_result",
                        payload,
                    },
                    None => NodeOutput::Nothing,
                }
            }
            other => {
                warn!(node = %self.id, operation = other, "Mock node ignoring unknown operation");
                return NodeOutput::Nothing;
            }
        };
        let payload = match result {
            Ok(payload) => payload,
            Err(error) => encode(&SimpleResponse::failed(error)),
        };
        NodeOutput::Reply { payload, delay }
    }

    fn fail(&self, operation: &str, error: ServiceError) -> NodeOutput {
        let payload = match operation {
            "discover" => self.announcement(),
            "check_orphan" => {
                let response = CheckOrphanResponse {
                    success: false,
                    error: Some(error),
                    ..CheckOrphanResponse::default()
                };
                return NodeOutput::Publish {
                    operation: "orphan_result",
                    payload: encode(&response),
                };
            }
            _ => encode(&SimpleResponse::failed(error)),
        };
        NodeOutput::Reply {
            payload,
            delay: Duration::ZERO,
        }
    }

    fn instance_credentials(&mut self, name: ServiceId) -> Credentials {
        self.next_id += 1;
        Credentials::new()
            .with("name", name.as_str())
            .with("node_id", self.id.as_str())
            .with("host", "127.0.0.1")
            .with("user", format!("admin{}", self.next_id))
            .with("password", "secret")
    }

    fn on_provision(&mut self, payload: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let request: ProvisionRequest = decode(payload)?;
        let credentials = match request.credentials {
            Some(prior) => {
                let mut credentials = prior;
                credentials
                    .0
                    .insert("node_id".into(), self.id.as_str().into());
                credentials
            }
            None => {
                let name = ServiceId::new(format!("{}-ins-{}", self.id, self.next_id + 1));
                self.instance_credentials(name)
            }
        };
        let Some(name) = credentials.name() else {
            return Err(ServiceError::new(NODE_FAILURE, &["credentials without name"]));
        };
        self.instances.insert(name, credentials.clone());
        Ok(encode(&ProvisionResponse::ok(credentials)))
    }

    fn on_unprovision(&mut self, payload: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let request: UnprovisionRequest = decode(payload)?;
        if self.instances.remove(&request.name).is_none() {
            return Err(ServiceError::new(INSTANCE_NOT_FOUND, &[request.name.as_str()]));
        }
        for binding in &request.bindings {
            if let Some(user) = binding.get_str("user") {
                self.bindings.remove(user);
            }
        }
        Ok(encode(&SimpleResponse::ok()))
    }

    fn on_bind(&mut self, payload: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let request: BindRequest = decode(payload)?;
        if !self.instances.contains_key(&request.name) {
            return Err(ServiceError::new(INSTANCE_NOT_FOUND, &[request.name.as_str()]));
        }
        let credentials = match request.credentials {
            Some(prior) => prior,
            None => {
                self.next_id += 1;
                Credentials::new()
                    .with("name", request.name.as_str())
                    .with("node_id", self.id.as_str())
                    .with("user", format!("user{}", self.next_id))
                    .with("password", "secret")
            }
        };
        let user = credentials.get_str("user").unwrap_or_default().to_string();
        self.bindings.insert(user, credentials.clone());
        Ok(encode(&BindResponse::ok(credentials)))
    }

    fn on_unbind(&mut self, payload: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let request: UnbindRequest = decode(payload)?;
        let user = request.credentials.get_str("user").unwrap_or_default();
        if self.bindings.remove(user).is_none() {
            return Err(ServiceError::new(NODE_FAILURE, &["unknown binding"]));
        }
        Ok(encode(&SimpleResponse::ok()))
    }

    fn on_restore(&mut self, payload: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let request: RestoreRequest = decode(payload)?;
        if !self.instances.contains_key(&request.instance_id) {
            return Err(ServiceError::new(
                INSTANCE_NOT_FOUND,
                &[request.instance_id.as_str()],
            ));
        }
        self.restores.push((request.instance_id, request.backup_path));
        Ok(encode(&SimpleResponse::ok()))
    }

    fn on_purge_orphan(&mut self, payload: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let request: PurgeOrphanRequest = decode(payload)?;
        for instance in &request.orphan_ins_list {
            self.instances.remove(instance);
        }
        for binding in &request.orphan_binding_list {
            if let Some(user) = binding.get_str("user") {
                self.bindings.remove(user);
            }
        }
        Ok(encode(&SimpleResponse::ok()))
    }

    /// Compare hosted state with the upstream handles.
    fn on_check_orphan(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        let request: CheckOrphanRequest = decode(payload).ok()?;
        let known_users: Vec<&str> = request
            .handles
            .iter()
            .filter_map(|h| h.credentials.get_str("user"))
            .collect();

        let instances: Vec<ServiceId> = self
            .instances
            .keys()
            .filter(|id| !request.handles.iter().any(|h| &h.service_id == *id))
            .cloned()
            .collect();
        let bindings: Vec<Credentials> = self
            .bindings
            .iter()
            .filter(|(user, _)| !known_users.contains(&user.as_str()))
            .map(|(_, credentials)| credentials.clone())
            .collect();

        let mut response = CheckOrphanResponse {
            success: true,
            ..CheckOrphanResponse::default()
        };
        if !instances.is_empty() {
            response.orphan_instances.insert(self.id.clone(), instances);
        }
        if !bindings.is_empty() {
            response.orphan_bindings.insert(self.id.clone(), bindings);
        }
        Some(encode(&response))
    }
}

fn encode<T: Serialize>(message: &T) -> Vec<u8> {
    codec::encode(message).unwrap_or_default()
}

fn decode<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, ServiceError> {
    codec::decode(payload)
        .map_err(|e| ServiceError::new(ErrorCode::BAD_MESSAGE, &[&e.to_string()]))
}
