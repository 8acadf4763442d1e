//! Orphan detection and purge.
//!
//! A check cycle resets the orphan maps, broadcasts every upstream handle
//! and collects node reports on `{service}.orphan_result` until its window
//! closes. The collected maps feed a later purge, which sends one request
//! per node and reports each node's outcome as it arrives.

use crate::pending::{Completion, PendingKind};
use crate::ProvisionerState;
use fleet_core::{Action, OperationOutput, OperationResult, OutboundMessage, RequestId, TimerId};
use fleet_messages::codec;
use fleet_messages::{CheckOrphanRequest, CheckOrphanResponse, PurgeOrphanRequest, Subject};
use fleet_types::{Credentials, NodeId, ServiceHandle, ServiceId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

pub type OrphanInstances = BTreeMap<NodeId, Vec<ServiceId>>;
pub type OrphanBindings = BTreeMap<NodeId, Vec<Credentials>>;

/// Orphan maps of the current (or last) check cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrphanTracker {
    open: bool,
    instances: OrphanInstances,
    bindings: OrphanBindings,
}

impl OrphanTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a cycle, discarding the previous maps.
    pub fn open(&mut self) {
        self.open = true;
        self.instances.clear();
        self.bindings.clear();
    }

    /// Stop accepting reports. The maps stay readable.
    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Merge one node report.
    ///
    /// A node's entry replaces any earlier entry under the same node id;
    /// entries of other nodes accumulate. Returns false when no cycle is
    /// open and the report was ignored.
    pub fn merge(&mut self, instances: OrphanInstances, bindings: OrphanBindings) -> bool {
        if !self.open {
            return false;
        }
        self.instances.extend(instances);
        self.bindings.extend(bindings);
        true
    }

    pub fn instances(&self) -> &OrphanInstances {
        &self.instances
    }

    pub fn bindings(&self) -> &OrphanBindings {
        &self.bindings
    }

    pub fn instance_count(&self) -> usize {
        self.instances.values().map(Vec::len).sum()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.values().map(Vec::len).sum()
    }

    /// Copies of both maps, ready to hand to a purge.
    pub fn snapshot(&self) -> (OrphanInstances, OrphanBindings) {
        (self.instances.clone(), self.bindings.clone())
    }
}

/// One node's share of a purge.
#[derive(Debug, Clone, PartialEq)]
pub struct PurgePlan {
    pub node_id: NodeId,
    pub instances: Vec<ServiceId>,
    pub bindings: Vec<Credentials>,
}

/// Split orphan maps into one purge per node.
///
/// Bindings of a node that also has orphan instances travel with those
/// instances; the remaining binding-only nodes get an empty instance list.
pub fn plan_purge(instances: OrphanInstances, mut bindings: OrphanBindings) -> Vec<PurgePlan> {
    let mut plans: Vec<PurgePlan> = instances
        .into_iter()
        .map(|(node_id, instances)| PurgePlan {
            bindings: bindings.remove(&node_id).unwrap_or_default(),
            node_id,
            instances,
        })
        .collect();
    plans.extend(bindings.into_iter().map(|(node_id, bindings)| PurgePlan {
        node_id,
        instances: Vec::new(),
        bindings,
    }));
    plans
}

/// A purge waiting on its per-node outcomes.
#[derive(Debug, Clone, Default)]
pub struct PurgeBatch {
    outstanding: BTreeSet<NodeId>,
    succeeded: Vec<NodeId>,
    failed: Vec<NodeId>,
}

impl PurgeBatch {
    fn record(&mut self, node_id: NodeId, success: bool) -> bool {
        if !self.outstanding.remove(&node_id) {
            return false;
        }
        if success {
            self.succeeded.push(node_id);
        } else {
            self.failed.push(node_id);
        }
        true
    }

    fn is_done(&self) -> bool {
        self.outstanding.is_empty()
    }
}

impl ProvisionerState {
    /// Orphan maps collected by the current or last check cycle.
    pub fn orphan_snapshot(&self) -> (OrphanInstances, OrphanBindings) {
        self.orphans.snapshot()
    }

    pub(crate) fn check_orphan(
        &mut self,
        request_id: RequestId,
        handles: Vec<ServiceHandle>,
    ) -> Vec<Action> {
        debug!(
            service = %self.config.service_name,
            handles = handles.len(),
            "Check if there are orphans"
        );
        let mut actions = Vec::new();
        if self.orphans.is_open() {
            actions.push(Action::CancelTimer {
                id: TimerId::OrphanCycle,
            });
        }
        self.orphans.open();
        actions.extend([
            Action::Publish {
                subject: Subject::broadcast::<CheckOrphanRequest>(&self.config.service_name),
                message: OutboundMessage::CheckOrphan(CheckOrphanRequest { handles }),
            },
            Action::SetTimer {
                id: TimerId::OrphanCycle,
                duration: self.config.orphan_cycle_window,
            },
            Action::EmitResult {
                request_id,
                result: Ok(OperationOutput::Done),
            },
        ]);
        actions
    }

    pub(crate) fn on_orphan_result(&mut self, payload: &[u8]) -> Vec<Action> {
        let response = match codec::decode::<CheckOrphanResponse>(payload) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to parse orphan result");
                return vec![];
            }
        };
        if !response.success {
            debug!(error = ?response.error, "Node reported failed orphan check");
            return vec![];
        }
        if !self
            .orphans
            .merge(response.orphan_instances, response.orphan_bindings)
        {
            debug!("Dropping orphan result outside a check cycle");
            return vec![];
        }
        debug!(
            instances = self.orphans.instance_count(),
            bindings = self.orphans.binding_count(),
            "Merged orphan result"
        );
        vec![]
    }

    pub(crate) fn on_orphan_cycle_closed(&mut self) -> Vec<Action> {
        if self.orphans.is_open() {
            self.orphans.close();
            info!(
                instances = self.orphans.instance_count(),
                bindings = self.orphans.binding_count(),
                "Orphan check cycle closed"
            );
        }
        vec![]
    }

    pub(crate) fn purge_orphan(
        &mut self,
        request_id: RequestId,
        orphan_instances: OrphanInstances,
        orphan_bindings: OrphanBindings,
    ) -> Vec<Action> {
        debug!(service = %self.config.service_name, "Purge orphans for given list");
        let plans = plan_purge(orphan_instances, orphan_bindings);
        if plans.is_empty() {
            return vec![Action::EmitResult {
                request_id,
                result: Ok(OperationOutput::PurgeSummary {
                    succeeded: Vec::new(),
                    failed: Vec::new(),
                }),
            }];
        }

        self.purges.insert(
            request_id,
            PurgeBatch {
                outstanding: plans.iter().map(|p| p.node_id.clone()).collect(),
                ..PurgeBatch::default()
            },
        );

        let mut actions = Vec::new();
        for plan in plans {
            debug!(
                node = %plan.node_id,
                instances = plan.instances.len(),
                bindings = plan.bindings.len(),
                "Purge orphans on node"
            );
            let request = PurgeOrphanRequest {
                orphan_ins_list: plan.instances,
                orphan_binding_list: plan.bindings,
            };
            actions.extend(self.send_to_node(
                plan.node_id.clone(),
                Subject::node::<PurgeOrphanRequest>(&self.config.service_name, &plan.node_id),
                OutboundMessage::PurgeOrphan(request),
                PendingKind::PurgeOrphan,
                Completion::Purge {
                    request_id,
                    node_id: plan.node_id,
                },
            ));
        }
        actions
    }

    pub(crate) fn on_node_purged(
        &mut self,
        request_id: RequestId,
        node_id: NodeId,
        result: OperationResult,
    ) -> Vec<Action> {
        let Some(batch) = self.purges.get_mut(&request_id) else {
            return vec![];
        };
        if !batch.record(node_id.clone(), result.is_ok()) {
            return vec![];
        }
        if let Err(failure) = &result {
            warn!(node = %node_id, %failure, "Orphan purge failed on node");
        }

        let mut actions = vec![Action::EmitPurgeResult {
            request_id,
            node_id,
            result,
        }];
        if batch.is_done() {
            if let Some(batch) = self.purges.remove(&request_id) {
                info!(
                    succeeded = batch.succeeded.len(),
                    failed = batch.failed.len(),
                    "Orphan purge complete"
                );
                actions.push(Action::EmitResult {
                    request_id,
                    result: Ok(OperationOutput::PurgeSummary {
                        succeeded: batch.succeeded,
                        failed: batch.failed,
                    }),
                });
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str) -> Credentials {
        Credentials::new().with("name", name)
    }

    #[test]
    fn test_plan_purge_splits_bindings_from_instances() {
        let instances = BTreeMap::from([(NodeId::from("node-1"), vec![ServiceId::from("i1")])]);
        let bindings = BTreeMap::from([
            (NodeId::from("node-1"), vec![binding("i1")]),
            (NodeId::from("node-2"), vec![binding("i2")]),
        ]);

        let plans = plan_purge(instances, bindings);

        assert_eq!(
            plans,
            vec![
                PurgePlan {
                    node_id: NodeId::from("node-1"),
                    instances: vec![ServiceId::from("i1")],
                    bindings: vec![binding("i1")],
                },
                PurgePlan {
                    node_id: NodeId::from("node-2"),
                    instances: vec![],
                    bindings: vec![binding("i2")],
                },
            ]
        );
    }

    #[test]
    fn test_plan_purge_empty() {
        assert!(plan_purge(BTreeMap::new(), BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_tracker_merges_only_while_open() {
        let mut tracker = OrphanTracker::new();
        let report = |node: &str, id: &str| {
            BTreeMap::from([(NodeId::from(node), vec![ServiceId::from(id)])])
        };

        assert!(!tracker.merge(report("node-1", "i1"), BTreeMap::new()));
        assert_eq!(tracker.instance_count(), 0);

        tracker.open();
        assert!(tracker.merge(report("node-1", "i1"), BTreeMap::new()));
        assert!(tracker.merge(report("node-2", "i2"), BTreeMap::new()));
        // a second report from the same node replaces its entry
        assert!(tracker.merge(report("node-1", "i3"), BTreeMap::new()));
        assert_eq!(tracker.instance_count(), 2);
        assert_eq!(
            tracker.instances()[&NodeId::from("node-1")],
            vec![ServiceId::from("i3")]
        );

        tracker.close();
        assert!(!tracker.merge(report("node-3", "i4"), BTreeMap::new()));
        assert_eq!(tracker.instances().len(), 2);

        tracker.open();
        assert_eq!(tracker.instance_count(), 0);
    }

    #[test]
    fn test_purge_batch_records_each_node_once() {
        let mut batch = PurgeBatch {
            outstanding: [NodeId::from("a"), NodeId::from("b")].into_iter().collect(),
            ..PurgeBatch::default()
        };
        assert!(batch.record(NodeId::from("a"), true));
        assert!(!batch.record(NodeId::from("a"), false));
        assert!(!batch.is_done());
        assert!(batch.record(NodeId::from("b"), false));
        assert!(batch.is_done());
        assert_eq!(batch.succeeded, vec![NodeId::from("a")]);
        assert_eq!(batch.failed, vec![NodeId::from("b")]);
    }
}
