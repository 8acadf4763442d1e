//! Events processed by the state machine.

use crate::{CorrelationId, RequestId, TimerId, UpdateTicket};
use fleet_messages::Subject;
use fleet_types::{Configuration, Credentials, NodeId, ServiceHandle, ServiceId};
use serde_json::Value;
use std::collections::BTreeMap;

/// A client operation on the provisioner.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Place a new instance on the best node.
    ///
    /// `prior` carries the handle of a previous incarnation (recovery).
    Provision {
        request: Configuration,
        prior: Option<ServiceHandle>,
    },

    Unprovision {
        instance_id: ServiceId,
    },

    /// Create a binding; `prior` reuses a previous binding's id and credentials.
    Bind {
        instance_id: ServiceId,
        binding_options: Value,
        prior: Option<ServiceHandle>,
    },

    Unbind {
        instance_id: ServiceId,
        handle_id: ServiceId,
        binding_options: Value,
    },

    Restore {
        instance_id: ServiceId,
        backup_path: String,
    },

    /// Re-provision, restore and rebind an instance from its handles.
    Recover {
        instance_id: ServiceId,
        backup_path: String,
        handles: Vec<ServiceHandle>,
    },

    CheckOrphan {
        handles: Vec<ServiceHandle>,
    },

    PurgeOrphan {
        orphan_instances: BTreeMap<NodeId, Vec<ServiceId>>,
        orphan_bindings: BTreeMap<NodeId, Vec<Credentials>>,
    },

    /// Bulk-replace directory entries from the system of record.
    UpdateHandles {
        handles: Vec<ServiceHandle>,
    },
}

impl Operation {
    /// Get a human-readable name for this operation.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Provision { .. } => "provision",
            Operation::Unprovision { .. } => "unprovision",
            Operation::Bind { .. } => "bind",
            Operation::Unbind { .. } => "unbind",
            Operation::Restore { .. } => "restore",
            Operation::Recover { .. } => "recover",
            Operation::CheckOrphan { .. } => "check_orphan",
            Operation::PurgeOrphan { .. } => "purge_orphan",
            Operation::UpdateHandles { .. } => "update_handles",
        }
    }
}

/// Inputs to the provisioner state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Bus connection established; subscriptions are in place.
    Connected,

    /// A payload arrived on `{service}.announce`.
    NodeAnnounceReceived { payload: Vec<u8> },

    /// A payload arrived on the reply inbox of an outbound request.
    ReplyReceived {
        correlation: CorrelationId,
        payload: Vec<u8>,
    },

    /// A payload arrived on `{service}.orphan_result`.
    OrphanResultReceived { payload: Vec<u8> },

    /// A node queried `{service}.handles`.
    HandlesQueryReceived { payload: Vec<u8>, reply_to: Subject },

    /// A node asked for a handle to be persisted upstream.
    UpdateServiceHandleReceived { payload: Vec<u8>, reply_to: Subject },

    /// The update-handle collaborator finished a call.
    HandleUpdateCompleted { ticket: UpdateTicket, success: bool },

    TimerFired { id: TimerId },

    /// A client operation.
    Client {
        request_id: RequestId,
        op: Operation,
    },
}

impl Event {
    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::Connected => "Connected",
            Event::NodeAnnounceReceived { .. } => "NodeAnnounceReceived",
            Event::ReplyReceived { .. } => "ReplyReceived",
            Event::OrphanResultReceived { .. } => "OrphanResultReceived",
            Event::HandlesQueryReceived { .. } => "HandlesQueryReceived",
            Event::UpdateServiceHandleReceived { .. } => "UpdateServiceHandleReceived",
            Event::HandleUpdateCompleted { .. } => "HandleUpdateCompleted",
            Event::TimerFired { .. } => "TimerFired",
            Event::Client { .. } => "Client",
        }
    }
}
