//! Instance lifecycle operations: provision, bind, unbind, unprovision and
//! restore.
//!
//! Every operation has the same shape: validate, locate the target node,
//! send one timeboxed request, and on reply update the directory and
//! complete. Validation failures complete immediately without contacting
//! any node.

use crate::barrier::BarrierStart;
use crate::pending::{Completion, Discovery, PendingKind};
use crate::{select_best, Barrier, ProvisionerState};
use fleet_core::{Action, CorrelationId, OperationFailure, OperationOutput, OperationResult,
    OutboundMessage, TimerId};
use fleet_messages::codec;
use fleet_messages::{
    BindRequest, BindResponse, DiscoverRequest, NodeAnnouncement, ProvisionRequest,
    ProvisionResponse, Reply, RestoreRequest, SimpleResponse, Subject, UnbindRequest,
    UnprovisionRequest,
};
use fleet_types::{Configuration, NodeId, ServiceHandle, ServiceId};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

impl ProvisionerState {
    // ═══════════════════════════════════════════════════════════════════════════
    // Provision
    // ═══════════════════════════════════════════════════════════════════════════

    /// Discover nodes, then provision on the best one.
    ///
    /// `prior` is the handle of a previous incarnation; its credentials are
    /// forwarded so the node can recreate the same instance.
    pub(crate) fn provision_service(
        &mut self,
        request: Configuration,
        prior: Option<ServiceHandle>,
        completion: Completion,
    ) -> Vec<Action> {
        let label = request.get("label").and_then(Value::as_str).unwrap_or("");
        let plan = request.get("plan").and_then(Value::as_str).unwrap_or("");
        debug!(label, plan, "Attempting to provision instance");

        let correlation = self.next_correlation();
        let mut barrier = Barrier::new(self.registry.len(), self.config.node_timeout);
        let start = barrier.open();
        let mut actions = vec![Action::Request {
            subject: Subject::broadcast::<DiscoverRequest>(&self.config.service_name),
            message: OutboundMessage::Discover(DiscoverRequest::default()),
            correlation,
        }];

        match start {
            BarrierStart::Completed(responses) => {
                actions.push(Action::Unsubscribe { correlation });
                actions.extend(self.provision_node(request, responses, prior, completion));
            }
            BarrierStart::Armed(timeout) => {
                self.discoveries.insert(
                    correlation,
                    Discovery {
                        barrier,
                        request,
                        prior,
                        completion,
                    },
                );
                actions.push(Action::SetTimer {
                    id: TimerId::Discovery(correlation),
                    duration: timeout,
                });
            }
        }
        actions
    }

    pub(crate) fn on_discovery_reply(
        &mut self,
        correlation: CorrelationId,
        payload: &[u8],
    ) -> Vec<Action> {
        let Some(discovery) = self.discoveries.get_mut(&correlation) else {
            return vec![];
        };
        let Some(responses) = discovery.barrier.record(payload.to_vec()) else {
            return vec![];
        };
        let mut actions = vec![Action::CancelTimer {
            id: TimerId::Discovery(correlation),
        }];
        actions.extend(self.finish_discovery(correlation, responses));
        actions
    }

    pub(crate) fn on_discovery_timeout(&mut self, correlation: CorrelationId) -> Vec<Action> {
        let Some(discovery) = self.discoveries.get_mut(&correlation) else {
            return vec![];
        };
        let Some(responses) = discovery.barrier.expire() else {
            return vec![];
        };
        debug!(
            %correlation,
            received = responses.len(),
            expected = discovery.barrier.expected(),
            "Discovery timed out"
        );
        self.finish_discovery(correlation, responses)
    }

    fn finish_discovery(
        &mut self,
        correlation: CorrelationId,
        responses: Vec<Vec<u8>>,
    ) -> Vec<Action> {
        let mut actions = vec![Action::Unsubscribe { correlation }];
        if let Some(discovery) = self.discoveries.remove(&correlation) {
            actions.extend(self.provision_node(
                discovery.request,
                responses,
                discovery.prior,
                discovery.completion,
            ));
        }
        actions
    }

    /// Pick the best node among the discovery replies and provision on it.
    fn provision_node(
        &mut self,
        request: Configuration,
        responses: Vec<Vec<u8>>,
        prior: Option<ServiceHandle>,
        completion: Completion,
    ) -> Vec<Action> {
        let nodes: Vec<NodeAnnouncement> = responses
            .iter()
            .filter_map(|payload| match codec::decode::<NodeAnnouncement>(payload) {
                Ok(node) if node.id.is_some() => Some(node),
                Ok(_) => {
                    debug!("Discovery reply without node id");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Failed to parse discovery reply");
                    None
                }
            })
            .collect();
        debug!(nodes = nodes.len(), "Found nodes for provisioning");

        let best = select_best(self.scorer.as_ref(), &nodes).and_then(|(index, score)| {
            let node_id = nodes[index].id.clone()?;
            Some((node_id, score))
        });
        let node_id = match best {
            Some((node_id, score)) if score > 0.0 || self.config.allow_over_provisioning => node_id,
            _ => {
                warn!(
                    service = %self.config.service_name,
                    nodes = nodes.len(),
                    "Could not find a node to provision"
                );
                return self.complete(completion, Err(OperationFailure::no_capacity()));
            }
        };
        debug!(node = %node_id, "Provisioning on node");

        // The plan is forwarded as given; nodes reject a missing one
        let mut message = ProvisionRequest {
            plan: request.get("plan").and_then(Value::as_str).map(str::to_string),
            credentials: None,
        };
        if let Some(prior) = prior {
            message = message.with_credentials(prior.credentials);
        }

        // Credentials are not kept in the recorded configuration
        let mut configuration = request;
        configuration.remove("credentials");

        self.send_to_node(
            node_id.clone(),
            Subject::node::<ProvisionRequest>(&self.config.service_name, &node_id),
            OutboundMessage::Provision(message),
            PendingKind::Provision { configuration },
            completion,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Unprovision
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn unprovision_service(
        &mut self,
        instance_id: ServiceId,
        completion: Completion,
    ) -> Vec<Action> {
        debug!(instance = %instance_id, "Unprovision service");
        let node_id = match self.locate(&instance_id, "unprovision") {
            Ok(node_id) => node_id,
            Err(failure) => return self.complete(completion, Err(failure)),
        };

        let bindings = self.directory.find_all_bindings(&instance_id);
        let binding_ids: Vec<ServiceId> = bindings.iter().map(|b| b.service_id.clone()).collect();
        let request = UnprovisionRequest {
            name: instance_id.clone(),
            bindings: bindings.iter().map(|b| b.credentials.clone()).collect(),
        };
        debug!(
            instance = %instance_id,
            node = %node_id,
            bindings = binding_ids.len(),
            "Unprovisioning instance"
        );

        self.send_to_node(
            node_id.clone(),
            Subject::node::<UnprovisionRequest>(&self.config.service_name, &node_id),
            OutboundMessage::Unprovision(request),
            PendingKind::Unprovision {
                instance_id,
                binding_ids,
            },
            completion,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Bind / unbind
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create a binding on an instance.
    ///
    /// With `prior`, the binding keeps its previous id and the node receives
    /// its previous credentials.
    pub(crate) fn bind_instance(
        &mut self,
        instance_id: ServiceId,
        binding_options: Value,
        prior: Option<ServiceHandle>,
        completion: Completion,
    ) -> Vec<Action> {
        debug!(instance = %instance_id, "Attempting to bind to service");
        let node_id = match self.locate(&instance_id, "bind") {
            Ok(node_id) => node_id,
            Err(failure) => return self.complete(completion, Err(failure)),
        };

        let (binding_id, credentials) = match prior {
            Some(prior) => (prior.service_id, Some(prior.credentials)),
            None => (ServiceId::new(self.mint_id()), None),
        };

        let mut configuration = self
            .directory
            .get(&instance_id)
            .map(|svc| svc.configuration.clone())
            .unwrap_or_default();
        attach_binding_options(&mut configuration, binding_options.clone());

        let request = BindRequest {
            name: instance_id.clone(),
            bind_opts: binding_options,
            credentials,
        };
        debug!(instance = %instance_id, node = %node_id, binding = %binding_id, "Binding instance");

        self.send_to_node(
            node_id.clone(),
            Subject::node::<BindRequest>(&self.config.service_name, &node_id),
            OutboundMessage::Bind(request),
            PendingKind::Bind {
                binding_id,
                configuration,
            },
            completion,
        )
    }

    pub(crate) fn unbind_instance(
        &mut self,
        instance_id: ServiceId,
        handle_id: ServiceId,
        _binding_options: Value,
        completion: Completion,
    ) -> Vec<Action> {
        debug!(instance = %instance_id, handle = %handle_id, "Attempting to unbind from service");
        let node_id = match self.locate(&instance_id, "unbind") {
            Ok(node_id) => node_id,
            Err(failure) => return self.complete(completion, Err(failure)),
        };
        let Some(handle) = self.directory.get(&handle_id) else {
            let what = format!("handle_id {}", handle_id);
            return self.complete(completion, Err(OperationFailure::not_found(&what)));
        };

        let request = UnbindRequest {
            credentials: handle.credentials.clone(),
        };
        self.send_to_node(
            node_id.clone(),
            Subject::node::<UnbindRequest>(&self.config.service_name, &node_id),
            OutboundMessage::Unbind(request),
            PendingKind::Unbind { handle_id },
            completion,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Restore
    // ═══════════════════════════════════════════════════════════════════════════

    /// Restore an instance's data from a backup. The directory is untouched.
    pub(crate) fn restore_instance(
        &mut self,
        instance_id: ServiceId,
        backup_path: String,
        completion: Completion,
    ) -> Vec<Action> {
        debug!(instance = %instance_id, backup_path = %backup_path, "Attempting to restore instance");
        let node_id = match self.locate(&instance_id, "restore") {
            Ok(node_id) => node_id,
            Err(failure) => return self.complete(completion, Err(failure)),
        };

        let request = RestoreRequest {
            instance_id,
            backup_path,
        };
        self.send_to_node(
            node_id.clone(),
            Subject::node::<RestoreRequest>(&self.config.service_name, &node_id),
            OutboundMessage::Restore(request),
            PendingKind::Restore,
            completion,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Replies
    // ═══════════════════════════════════════════════════════════════════════════

    /// Find the node hosting an instance.
    fn locate(&self, instance_id: &ServiceId, operation: &str) -> Result<NodeId, OperationFailure> {
        let Some(svc) = self.directory.get(instance_id) else {
            return Err(OperationFailure::not_found(&format!("instance_id {}", instance_id)));
        };
        svc.credentials.node_id().ok_or_else(|| {
            warn!(instance = %instance_id, operation, "Cannot find node_id for instance");
            OperationFailure::internal()
        })
    }

    /// Decode a node's reply and apply it to the directory.
    pub(crate) fn apply_reply(
        &mut self,
        node_id: &NodeId,
        kind: PendingKind,
        payload: &[u8],
    ) -> OperationResult {
        let operation = kind.name();
        match kind {
            PendingKind::Provision { configuration } => {
                let response: ProvisionResponse = decode_reply(node_id, operation, payload)?;
                let credentials = check_credentials(node_id, operation, response)?;
                let Some(service_id) = credentials.name() else {
                    warn!(node = %node_id, operation, "Provision credentials carry no name");
                    return Err(OperationFailure::internal());
                };
                let handle = ServiceHandle::new(service_id, configuration, credentials);
                info!(service_id = %handle.service_id, node = %node_id, "Provisioned instance");
                self.directory.insert(handle.clone());
                Ok(OperationOutput::Handle(handle))
            }
            PendingKind::Bind {
                binding_id,
                configuration,
            } => {
                let response: BindResponse = decode_reply(node_id, operation, payload)?;
                let credentials = check_credentials(node_id, operation, response)?;
                let handle = ServiceHandle::new(binding_id, configuration, credentials);
                debug!(binding = %handle.service_id, node = %node_id, "Bound instance");
                self.directory.insert(handle.clone());
                Ok(OperationOutput::Handle(handle))
            }
            PendingKind::Unprovision {
                instance_id,
                binding_ids,
            } => {
                check_simple(decode_reply(node_id, operation, payload)?)?;
                self.directory.remove(&instance_id);
                for id in &binding_ids {
                    self.directory.remove(id);
                }
                info!(
                    instance = %instance_id,
                    bindings = binding_ids.len(),
                    "Unprovisioned instance"
                );
                Ok(OperationOutput::Done)
            }
            PendingKind::Unbind { handle_id } => {
                check_simple(decode_reply(node_id, operation, payload)?)?;
                self.directory.remove(&handle_id);
                debug!(handle = %handle_id, "Unbound handle");
                Ok(OperationOutput::Done)
            }
            PendingKind::Restore | PendingKind::PurgeOrphan => {
                check_simple(decode_reply(node_id, operation, payload)?)?;
                Ok(OperationOutput::Done)
            }
        }
    }
}

/// Record binding options under `data.binding_options`.
fn attach_binding_options(configuration: &mut Configuration, binding_options: Value) {
    let data = configuration
        .entry("data")
        .or_insert_with(|| Value::Object(Map::new()));
    if !data.is_object() {
        *data = Value::Object(Map::new());
    }
    if let Value::Object(data) = data {
        data.insert("binding_options".to_string(), binding_options);
    }
}

fn decode_reply<T: Reply>(
    node_id: &NodeId,
    operation: &str,
    payload: &[u8],
) -> Result<T, OperationFailure> {
    codec::decode(payload).map_err(|e| {
        warn!(node = %node_id, operation, error = %e, "Malformed node reply");
        OperationFailure::internal()
    })
}

fn check_simple(response: SimpleResponse) -> Result<(), OperationFailure> {
    if response.success {
        Ok(())
    } else {
        Err(OperationFailure::node_reported(response.error))
    }
}

fn check_credentials(
    node_id: &NodeId,
    operation: &str,
    response: ProvisionResponse,
) -> Result<fleet_types::Credentials, OperationFailure> {
    if !response.success {
        return Err(OperationFailure::node_reported(response.error));
    }
    response.credentials.ok_or_else(|| {
        warn!(node = %node_id, operation, "Successful reply without credentials");
        OperationFailure::internal()
    })
}
