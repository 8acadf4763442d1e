//! Bookkeeping for in-flight requests.
//!
//! Every node-bound request is one [`PendingRequest`] keyed by its
//! correlation id. The reply handler and the timeout handler both start by
//! removing that entry; whichever finds it present owns the completion,
//! the other is a no-op. This gives each request exactly one outcome.

use fleet_core::RequestId;
use fleet_messages::Subject;
use fleet_types::{Configuration, NodeId, ServiceHandle, ServiceId};

/// Where the outcome of an operation goes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Completion {
    /// Straight back to the client.
    Client(RequestId),
    /// Re-provision step of a recovery.
    RecoveryProvision(u64),
    /// Restore step of a recovery.
    RecoveryRestore(u64),
    /// One rebind of a recovery.
    RecoveryRebind(u64),
    /// One node of an orphan purge.
    Purge { request_id: RequestId, node_id: NodeId },
}

/// What to do with a node's reply.
#[derive(Debug, Clone)]
pub(crate) enum PendingKind {
    Provision {
        /// Configuration to record, credentials stripped.
        configuration: Configuration,
    },
    Unprovision {
        instance_id: ServiceId,
        binding_ids: Vec<ServiceId>,
    },
    Bind {
        binding_id: ServiceId,
        /// Instance configuration with the binding options attached.
        configuration: Configuration,
    },
    Unbind {
        handle_id: ServiceId,
    },
    Restore,
    PurgeOrphan,
}

impl PendingKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            PendingKind::Provision { .. } => "provision",
            PendingKind::Unprovision { .. } => "unprovision",
            PendingKind::Bind { .. } => "bind",
            PendingKind::Unbind { .. } => "unbind",
            PendingKind::Restore => "restore",
            PendingKind::PurgeOrphan => "purge_orphan",
        }
    }
}

/// A request awaiting a node reply or its timeout.
#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    pub node_id: NodeId,
    pub kind: PendingKind,
    pub completion: Completion,
}

/// A provision waiting on its discovery barrier.
#[derive(Debug)]
pub(crate) struct Discovery {
    pub barrier: crate::Barrier<Vec<u8>>,
    pub request: Configuration,
    pub prior: Option<ServiceHandle>,
    pub completion: Completion,
}

/// Why the update-handle collaborator was called.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UpdatePurpose {
    /// The re-provisioned instance handle of a recovery.
    RecoveryInstance(u64),
    /// A rebound binding handle of a recovery.
    RecoveryBinding(u64),
    /// A node's `update_service_handle` request; answer on `reply_to`.
    NodeRequest { reply_to: Subject },
}
