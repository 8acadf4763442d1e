//! The simulation runner.

use crate::event_queue::{EventKey, Scheduled};
use crate::{MockNode, NetworkConfig, NodeOutput, SimHandleStore, SimulatedNetwork};
use fleet_core::{
    Action, CorrelationId, Event, Operation, OperationResult, OutboundMessage, RequestId,
    StateMachine, TimerId,
};
use fleet_messages::Subject;
use fleet_provisioner::{NodeScorer, ProvisionerConfig, ProvisionerState};
use fleet_types::{NodeId, ServiceHandle};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Upper bound on virtual time for [`SimulationRunner::run_until_complete`].
const COMPLETION_HORIZON: Duration = Duration::from_secs(600);

/// Counters collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub events_processed: u64,
    pub actions_executed: u64,
    pub messages_sent: u64,
    pub timers_fired: u64,
    /// Node replies that reached an inbox already torn down.
    pub replies_dropped: u64,
    /// `EmitResult`s for a request that already had one.
    pub duplicate_results: u64,
}

/// Drives one [`ProvisionerState`] and a set of [`MockNode`]s on a virtual
/// clock.
///
/// Everything happens on the calling thread. Given the same inputs and
/// network seed, every run is identical.
pub struct SimulationRunner {
    provisioner: ProvisionerState,
    network: SimulatedNetwork,
    nodes: BTreeMap<NodeId, MockNode>,
    store: SimHandleStore,

    queue: BTreeMap<EventKey, Scheduled>,
    timers: HashMap<TimerId, EventKey>,
    inboxes: HashSet<CorrelationId>,

    results: BTreeMap<RequestId, OperationResult>,
    purge_results: Vec<(RequestId, NodeId, OperationResult)>,
    replies: Vec<(Subject, OutboundMessage)>,

    now: Duration,
    sequence: u64,
    next_request: u64,
    stats: SimulationStats,
}

impl SimulationRunner {
    pub fn new(
        config: ProvisionerConfig,
        scorer: Arc<dyn NodeScorer>,
        mut network: NetworkConfig,
    ) -> Self {
        network.service_name = config.service_name.clone();
        Self {
            provisioner: ProvisionerState::new(config, scorer),
            network: SimulatedNetwork::new(network),
            nodes: BTreeMap::new(),
            store: SimHandleStore::new(),
            queue: BTreeMap::new(),
            timers: HashMap::new(),
            inboxes: HashSet::new(),
            results: BTreeMap::new(),
            purge_results: Vec::new(),
            replies: Vec::new(),
            now: Duration::ZERO,
            sequence: 0,
            next_request: 0,
            stats: SimulationStats::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Setup and inspection
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add a node and schedule its first announcement.
    pub fn add_node(&mut self, node: MockNode) {
        let id = node.id().clone();
        self.nodes.insert(id.clone(), node);
        self.announce(&id);
    }

    /// Schedule an announcement from `node`.
    pub fn announce(&mut self, node: &NodeId) {
        let Some(payload) = self.nodes.get(node).map(MockNode::announcement) else {
            return;
        };
        if !self.network.is_reachable(node) {
            return;
        }
        let at = self.now + self.network.delay();
        self.schedule(
            at,
            Scheduled::Provisioner(Event::NodeAnnounceReceived { payload }),
        );
    }

    /// Schedule the provisioner's bus connection.
    pub fn connect(&mut self) {
        self.schedule(self.now, Scheduled::Provisioner(Event::Connected));
    }

    /// Submit a client operation; its result appears in [`Self::result`].
    pub fn submit(&mut self, op: Operation) -> RequestId {
        let request_id = RequestId(self.next_request);
        self.next_request += 1;
        debug!(%request_id, op = op.name(), "Submitting operation");
        self.schedule(
            self.now,
            Scheduled::Provisioner(Event::Client { request_id, op }),
        );
        request_id
    }

    /// Send a handles query as a node would. The answer is recorded in
    /// [`Self::replies`] under the returned subject.
    pub fn query_handles(&mut self, payload: &[u8]) -> Subject {
        let reply_to = self.inbox_subject();
        self.schedule(
            self.now,
            Scheduled::Provisioner(Event::HandlesQueryReceived {
                payload: payload.to_vec(),
                reply_to: reply_to.clone(),
            }),
        );
        reply_to
    }

    /// Send an update-service-handle request as a node would.
    pub fn request_handle_update(&mut self, payload: &[u8]) -> Subject {
        let reply_to = self.inbox_subject();
        self.schedule(
            self.now,
            Scheduled::Provisioner(Event::UpdateServiceHandleReceived {
                payload: payload.to_vec(),
                reply_to: reply_to.clone(),
            }),
        );
        reply_to
    }

    fn inbox_subject(&mut self) -> Subject {
        self.sequence += 1;
        Subject::raw(format!("_INBOX.sim.{}", self.sequence))
    }

    pub fn provisioner(&self) -> &ProvisionerState {
        &self.provisioner
    }

    pub fn node(&self, id: &NodeId) -> Option<&MockNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut MockNode> {
        self.nodes.get_mut(id)
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    pub fn store(&self) -> &SimHandleStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SimHandleStore {
        &mut self.store
    }

    pub fn result(&self, request_id: RequestId) -> Option<&OperationResult> {
        self.results.get(&request_id)
    }

    /// Per-node purge outcomes in emission order.
    pub fn purge_results(&self) -> &[(RequestId, NodeId, OperationResult)] {
        &self.purge_results
    }

    /// Answers to node-originated queries.
    pub fn replies(&self) -> &[(Subject, OutboundMessage)] {
        &self.replies
    }

    pub fn reply_to(&self, subject: &Subject) -> Option<&OutboundMessage> {
        self.replies
            .iter()
            .find(|(s, _)| s == subject)
            .map(|(_, message)| message)
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn has_armed_timer(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Reply inboxes still subscribed.
    pub fn open_inboxes(&self) -> usize {
        self.inboxes.len()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Running
    // ═══════════════════════════════════════════════════════════════════════════

    /// Process the next event. Returns false when the queue is empty.
    pub fn step(&mut self) -> bool {
        let Some((key, scheduled)) = self.queue.pop_first() else {
            return false;
        };
        self.now = key.time;
        if let Scheduled::Provisioner(Event::TimerFired { id }) = &scheduled {
            self.timers.remove(id);
            self.stats.timers_fired += 1;
        }
        self.process(scheduled);
        true
    }

    /// Process every event scheduled up to and including `time`.
    pub fn run_until(&mut self, time: Duration) {
        while let Some((key, _)) = self.queue.first_key_value() {
            if key.time > time {
                break;
            }
            self.step();
        }
        self.now = self.now.max(time);
    }

    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(self.now + duration);
    }

    /// Run until `request_id` has a result, the queue drains or virtual
    /// time passes the horizon.
    pub fn run_until_complete(&mut self, request_id: RequestId) -> Option<&OperationResult> {
        let horizon = self.now + COMPLETION_HORIZON;
        while !self.results.contains_key(&request_id) {
            match self.queue.first_key_value() {
                Some((key, _)) if key.time <= horizon => {
                    self.step();
                }
                _ => break,
            }
        }
        self.results.get(&request_id)
    }

    fn schedule(&mut self, time: Duration, scheduled: Scheduled) -> EventKey {
        let key = EventKey {
            time,
            priority: scheduled.priority(),
            sequence: self.sequence,
        };
        self.sequence += 1;
        self.queue.insert(key, scheduled);
        key
    }

    fn process(&mut self, scheduled: Scheduled) {
        self.stats.events_processed += 1;
        match scheduled {
            Scheduled::Provisioner(event) => {
                trace!(event = event.type_name(), now = ?self.now, "Provisioner event");
                self.provisioner.set_time(self.now);
                let actions = self.provisioner.handle(event);
                for action in actions {
                    self.execute(action);
                }
            }
            Scheduled::ToNode {
                node,
                subject,
                payload,
                reply_to,
            } => self.deliver_to_node(node, subject, payload, reply_to),
            Scheduled::ToInbox {
                correlation,
                payload,
            } => {
                if self.inboxes.contains(&correlation) {
                    self.process(Scheduled::Provisioner(Event::ReplyReceived {
                        correlation,
                        payload,
                    }));
                } else {
                    debug!(%correlation, "Reply for closed inbox dropped");
                    self.stats.replies_dropped += 1;
                }
            }
            Scheduled::StoreUpdate { ticket, handle } => {
                let success = self.store.update(handle);
                self.process(Scheduled::Provisioner(Event::HandleUpdateCompleted {
                    ticket,
                    success,
                }));
            }
        }
    }

    fn deliver_to_node(
        &mut self,
        node: NodeId,
        subject: Subject,
        payload: Vec<u8>,
        reply_to: Option<CorrelationId>,
    ) {
        if !self.network.is_reachable(&node) {
            return;
        }
        let Some(route) = self.network.route(subject.as_str()) else {
            return;
        };
        let Some(mock) = self.nodes.get_mut(&node) else {
            return;
        };
        match mock.handle(&route.operation, &payload) {
            NodeOutput::Reply { payload, delay } => {
                let at = self.now + self.network.delay() + delay;
                match reply_to {
                    Some(correlation) => {
                        self.schedule(
                            at,
                            Scheduled::ToInbox {
                                correlation,
                                payload,
                            },
                        );
                    }
                    // A discover broadcast without inbox is answered by announcing
                    None if route.operation == "discover" => {
                        self.schedule(
                            at,
                            Scheduled::Provisioner(Event::NodeAnnounceReceived { payload }),
                        );
                    }
                    None => {}
                }
            }
            NodeOutput::Publish { operation, payload } => {
                let event = match operation {
                    "orphan_result" => Event::OrphanResultReceived { payload },
                    "announce" => Event::NodeAnnounceReceived { payload },
                    other => {
                        warn!(node = %node, operation = other, "Unroutable node publish");
                        return;
                    }
                };
                let at = self.now + self.network.delay();
                self.schedule(at, Scheduled::Provisioner(event));
            }
            NodeOutput::Nothing => {}
        }
    }

    fn execute(&mut self, action: Action) {
        self.stats.actions_executed += 1;
        match action {
            Action::Publish { subject, message } => self.send(subject, message, None),
            Action::Request {
                subject,
                message,
                correlation,
            } => {
                self.inboxes.insert(correlation);
                self.send(subject, message, Some(correlation));
            }
            Action::Unsubscribe { correlation } => {
                self.inboxes.remove(&correlation);
            }
            Action::Reply { reply_to, message } => {
                self.replies.push((reply_to, message));
            }
            Action::SetTimer { id, duration } => {
                if let Some(old) = self.timers.remove(&id) {
                    self.queue.remove(&old);
                }
                let key = self.schedule(
                    self.now + duration,
                    Scheduled::Provisioner(Event::TimerFired { id }),
                );
                self.timers.insert(id, key);
            }
            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&id) {
                    self.queue.remove(&key);
                }
            }
            Action::UpdateHandle { ticket, handle } => {
                self.schedule(self.now, Scheduled::StoreUpdate { ticket, handle });
            }
            Action::EmitResult { request_id, result } => {
                debug!(%request_id, ok = result.is_ok(), "Operation completed");
                if self.results.insert(request_id, result).is_some() {
                    warn!(%request_id, "Duplicate result");
                    self.stats.duplicate_results += 1;
                }
            }
            Action::EmitPurgeResult {
                request_id,
                node_id,
                result,
            } => {
                self.purge_results.push((request_id, node_id, result));
            }
        }
    }

    /// Put an outbound message on the simulated bus.
    fn send(&mut self, subject: Subject, message: OutboundMessage, reply_to: Option<CorrelationId>) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, message = message.type_name(), "Failed to encode message");
                return;
            }
        };
        let Some(route) = self.network.route(subject.as_str()) else {
            warn!(%subject, "Unroutable subject");
            return;
        };
        let targets: Vec<NodeId> = match route.node {
            Some(node) => vec![node],
            None => self.nodes.keys().cloned().collect(),
        };
        for node in targets {
            if !self.network.is_reachable(&node) {
                continue;
            }
            self.stats.messages_sent += 1;
            let at = self.now + self.network.delay();
            self.schedule(
                at,
                Scheduled::ToNode {
                    node,
                    subject: subject.clone(),
                    payload: payload.clone(),
                    reply_to,
                },
            );
        }
    }
}

/// Handles as the upstream system of record would pass them to recovery
/// or orphan checks: every record the provisioner currently knows.
pub fn upstream_handles(runner: &SimulationRunner) -> Vec<ServiceHandle> {
    runner.provisioner().directory().iter().cloned().collect()
}
