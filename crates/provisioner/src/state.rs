//! Provisioner state machine.

use crate::orphan::{OrphanTracker, PurgeBatch};
use crate::pending::{Completion, Discovery, PendingKind, PendingRequest, UpdatePurpose};
use crate::recovery::RecoveryTask;
use crate::{InstanceDirectory, NodeRegistry, NodeScorer, ProvisionerConfig};
use fleet_core::{
    Action, CorrelationId, Event, Operation, OperationFailure, OperationResult, OutboundMessage,
    RequestId, StateMachine, TimerId, UpdateTicket,
};
use fleet_messages::codec;
use fleet_messages::{
    BusMessage, DiscoverRequest, HandlesQuery, HandlesResponse, NodeAnnouncement, SimpleResponse,
    Subject, UpdateServiceHandle,
};
use fleet_types::{ErrorCode, NodeId, ServiceError, ServiceHandle};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Provisioner core.
///
/// Owns the node registry, the instance directory and every in-flight
/// request. Single-threaded: all mutation happens inside [`handle`].
///
/// [`handle`]: StateMachine::handle
pub struct ProvisionerState {
    pub(crate) config: ProvisionerConfig,
    pub(crate) scorer: Arc<dyn NodeScorer>,
    pub(crate) registry: NodeRegistry,
    pub(crate) directory: InstanceDirectory,
    pub(crate) orphans: OrphanTracker,

    /// Node-bound requests awaiting reply or timeout.
    pub(crate) pending: HashMap<CorrelationId, PendingRequest>,
    /// Provisions awaiting their discovery barrier.
    pub(crate) discoveries: HashMap<CorrelationId, Discovery>,
    /// Recoveries in progress.
    pub(crate) recoveries: HashMap<u64, RecoveryTask>,
    /// Orphan purges awaiting per-node outcomes.
    pub(crate) purges: HashMap<RequestId, PurgeBatch>,
    /// Calls into the update-handle collaborator.
    pub(crate) updates: HashMap<UpdateTicket, UpdatePurpose>,

    next_correlation: u64,
    next_ticket: u64,
    pub(crate) next_recovery: u64,
    rng: ChaCha8Rng,
    pub(crate) now: Duration,
}

/// Snapshot of live nodes and provisioned records, secrets masked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionerStatus {
    pub healthy: bool,
    /// node -> seconds since its last announcement
    pub nodes: Vec<(NodeId, u64)>,
    pub instances: Vec<ServiceHandle>,
}

impl ProvisionerState {
    pub fn new(config: ProvisionerConfig, scorer: Arc<dyn NodeScorer>) -> Self {
        Self {
            registry: NodeRegistry::new(config.node_ttl),
            rng: ChaCha8Rng::seed_from_u64(config.id_seed),
            config,
            scorer,
            directory: InstanceDirectory::new(),
            orphans: OrphanTracker::new(),
            pending: HashMap::new(),
            discoveries: HashMap::new(),
            recoveries: HashMap::new(),
            purges: HashMap::new(),
            updates: HashMap::new(),
            next_correlation: 0,
            next_ticket: 0,
            next_recovery: 0,
            now: Duration::ZERO,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &InstanceDirectory {
        &self.directory
    }

    pub fn orphans(&self) -> &OrphanTracker {
        &self.orphans
    }

    /// Number of node-bound requests still awaiting a reply or timeout.
    pub fn in_flight(&self) -> usize {
        self.pending.len() + self.discoveries.len()
    }

    pub fn status(&self) -> ProvisionerStatus {
        ProvisionerStatus {
            healthy: true,
            nodes: self
                .registry
                .iter()
                .map(|(node, seen)| (node.clone(), self.now.saturating_sub(seen).as_secs()))
                .collect(),
            instances: self.directory.iter().map(ServiceHandle::masked).collect(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Node registry
    // ═══════════════════════════════════════════════════════════════════════════

    fn on_connected(&mut self) -> Vec<Action> {
        debug!(service = %self.config.service_name, "Connected to node bus");
        vec![
            Action::Publish {
                subject: Subject::broadcast::<DiscoverRequest>(&self.config.service_name),
                message: OutboundMessage::Discover(DiscoverRequest::default()),
            },
            Action::SetTimer {
                id: TimerId::RegistrySweep,
                duration: self.config.sweep_interval,
            },
        ]
    }

    /// Handle a node announcement. Malformed payloads are logged and dropped.
    pub fn on_node_announce(&mut self, payload: &[u8]) -> Vec<Action> {
        match codec::decode::<NodeAnnouncement>(payload) {
            Ok(NodeAnnouncement { id: Some(id), .. }) => {
                debug!(node = %id, "Received node announcement");
                self.registry.announce(id, self.now);
            }
            Ok(_) => debug!("Ignoring node announcement without id"),
            Err(e) => warn!(error = %e, "Failed to parse node announcement"),
        }
        vec![]
    }

    fn on_sweep_timer(&mut self) -> Vec<Action> {
        self.registry.sweep(self.now);
        vec![Action::SetTimer {
            id: TimerId::RegistrySweep,
            duration: self.config.sweep_interval,
        }]
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Node-originated queries
    // ═══════════════════════════════════════════════════════════════════════════

    fn on_handles_query(&mut self, payload: &[u8], reply_to: Subject) -> Vec<Action> {
        let response = match HandlesQuery::from_payload(payload) {
            HandlesQuery::All => HandlesResponse::All(self.directory.iter().cloned().collect()),
            HandlesQuery::BindingsOf(instance) => HandlesResponse::Bindings(
                self.directory
                    .find_all_bindings(&instance)
                    .into_iter()
                    .map(|binding| binding.credentials.clone())
                    .collect(),
            ),
        };
        debug!(count = response.len(), "Answering handles query");
        vec![Action::Reply {
            reply_to,
            message: OutboundMessage::Handles(response),
        }]
    }

    fn on_update_service_handle(&mut self, payload: &[u8], reply_to: Subject) -> Vec<Action> {
        match codec::decode::<UpdateServiceHandle>(payload) {
            Ok(UpdateServiceHandle(handle)) => {
                debug!(service_id = %handle.service_id, "Update service handle requested");
                self.update_handle(handle, UpdatePurpose::NodeRequest { reply_to })
            }
            Err(e) => {
                warn!(error = %e, "Malformed {} payload", UpdateServiceHandle::operation());
                let error = ServiceError::new(ErrorCode::BAD_MESSAGE, &[&e.to_string()]);
                vec![Action::Reply {
                    reply_to,
                    message: OutboundMessage::Simple(SimpleResponse::failed(error)),
                }]
            }
        }
    }

    /// Ask the update-handle collaborator to persist `handle`.
    pub(crate) fn update_handle(
        &mut self,
        handle: ServiceHandle,
        purpose: UpdatePurpose,
    ) -> Vec<Action> {
        let ticket = UpdateTicket(self.next_ticket);
        self.next_ticket += 1;
        self.updates.insert(ticket, purpose);
        vec![Action::UpdateHandle { ticket, handle }]
    }

    fn on_handle_update_completed(&mut self, ticket: UpdateTicket, success: bool) -> Vec<Action> {
        let Some(purpose) = self.updates.remove(&ticket) else {
            debug!(%ticket, "Ignoring completion for unknown update ticket");
            return vec![];
        };
        match purpose {
            UpdatePurpose::RecoveryInstance(id) => self.on_recovery_instance_updated(id, success),
            UpdatePurpose::RecoveryBinding(id) => self.on_recovery_binding_updated(id, success),
            UpdatePurpose::NodeRequest { reply_to } => {
                let response = if success {
                    SimpleResponse::ok()
                } else {
                    SimpleResponse::failed(ServiceError::internal())
                };
                vec![Action::Reply {
                    reply_to,
                    message: OutboundMessage::Simple(response),
                }]
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Request plumbing
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn next_correlation(&mut self) -> CorrelationId {
        let id = CorrelationId(self.next_correlation);
        self.next_correlation += 1;
        id
    }

    /// Mint a random identifier for a new binding.
    pub(crate) fn mint_id(&mut self) -> String {
        uuid::Builder::from_random_bytes(self.rng.gen())
            .into_uuid()
            .to_string()
    }

    /// Send a request to one node and arm its timeout.
    pub(crate) fn send_to_node(
        &mut self,
        node_id: NodeId,
        subject: Subject,
        message: OutboundMessage,
        kind: PendingKind,
        completion: Completion,
    ) -> Vec<Action> {
        let correlation = self.next_correlation();
        debug!(
            %correlation,
            node = %node_id,
            %subject,
            operation = kind.name(),
            "Sending request to node"
        );
        self.pending.insert(
            correlation,
            PendingRequest {
                node_id,
                kind,
                completion,
            },
        );
        vec![
            Action::Request {
                subject,
                message,
                correlation,
            },
            Action::SetTimer {
                id: TimerId::Request(correlation),
                duration: self.config.node_timeout,
            },
        ]
    }

    fn on_reply(&mut self, correlation: CorrelationId, payload: &[u8]) -> Vec<Action> {
        if self.discoveries.contains_key(&correlation) {
            return self.on_discovery_reply(correlation, payload);
        }

        let Some(pending) = self.pending.remove(&correlation) else {
            debug!(%correlation, "Dropping late or unknown reply");
            return vec![];
        };

        let mut actions = vec![
            Action::CancelTimer {
                id: TimerId::Request(correlation),
            },
            Action::Unsubscribe { correlation },
        ];
        let PendingRequest {
            node_id,
            kind,
            completion,
        } = pending;
        let result = self.apply_reply(&node_id, kind, payload);
        actions.extend(self.complete(completion, result));
        actions
    }

    fn on_request_timeout(&mut self, correlation: CorrelationId) -> Vec<Action> {
        let Some(pending) = self.pending.remove(&correlation) else {
            return vec![];
        };
        warn!(
            %correlation,
            node = %pending.node_id,
            operation = pending.kind.name(),
            timeout = ?self.config.node_timeout,
            "Node request timed out"
        );
        let mut actions = vec![Action::Unsubscribe { correlation }];
        actions.extend(self.complete(pending.completion, Err(OperationFailure::timeout())));
        actions
    }

    /// Route an operation outcome to whoever is waiting for it.
    pub(crate) fn complete(&mut self, completion: Completion, result: OperationResult) -> Vec<Action> {
        match completion {
            Completion::Client(request_id) => vec![Action::EmitResult { request_id, result }],
            Completion::RecoveryProvision(id) => self.on_recovery_provisioned(id, result),
            Completion::RecoveryRestore(id) => self.on_recovery_restored(id, result),
            Completion::RecoveryRebind(id) => self.on_recovery_rebound(id, result),
            Completion::Purge {
                request_id,
                node_id,
            } => self.on_node_purged(request_id, node_id, result),
        }
    }

    fn on_timer(&mut self, id: TimerId) -> Vec<Action> {
        match id {
            TimerId::RegistrySweep => self.on_sweep_timer(),
            TimerId::Request(correlation) => self.on_request_timeout(correlation),
            TimerId::Discovery(correlation) => self.on_discovery_timeout(correlation),
            TimerId::Rebind(recovery) => self.on_rebind_timeout(recovery),
            TimerId::OrphanCycle => self.on_orphan_cycle_closed(),
        }
    }

    fn on_client(&mut self, request_id: RequestId, op: Operation) -> Vec<Action> {
        let completion = Completion::Client(request_id);
        match op {
            Operation::Provision { request, prior } => {
                self.provision_service(request, prior, completion)
            }
            Operation::Unprovision { instance_id } => {
                self.unprovision_service(instance_id, completion)
            }
            Operation::Bind {
                instance_id,
                binding_options,
                prior,
            } => self.bind_instance(instance_id, binding_options, prior, completion),
            Operation::Unbind {
                instance_id,
                handle_id,
                binding_options,
            } => self.unbind_instance(instance_id, handle_id, binding_options, completion),
            Operation::Restore {
                instance_id,
                backup_path,
            } => self.restore_instance(instance_id, backup_path, completion),
            Operation::Recover {
                instance_id,
                backup_path,
                handles,
            } => self.recover(request_id, instance_id, backup_path, handles),
            Operation::CheckOrphan { handles } => self.check_orphan(request_id, handles),
            Operation::PurgeOrphan {
                orphan_instances,
                orphan_bindings,
            } => self.purge_orphan(request_id, orphan_instances, orphan_bindings),
            Operation::UpdateHandles { handles } => {
                self.directory.update_handles(handles);
                vec![Action::EmitResult {
                    request_id,
                    result: Ok(fleet_core::OperationOutput::Done),
                }]
            }
        }
    }
}

impl StateMachine for ProvisionerState {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::Connected => self.on_connected(),
            Event::NodeAnnounceReceived { payload } => self.on_node_announce(&payload),
            Event::ReplyReceived {
                correlation,
                payload,
            } => self.on_reply(correlation, &payload),
            Event::OrphanResultReceived { payload } => self.on_orphan_result(&payload),
            Event::HandlesQueryReceived { payload, reply_to } => {
                self.on_handles_query(&payload, reply_to)
            }
            Event::UpdateServiceHandleReceived { payload, reply_to } => {
                self.on_update_service_handle(&payload, reply_to)
            }
            Event::HandleUpdateCompleted { ticket, success } => {
                self.on_handle_update_completed(ticket, success)
            }
            Event::TimerFired { id } => self.on_timer(id),
            Event::Client { request_id, op } => self.on_client(request_id, op),
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}
