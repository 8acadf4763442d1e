//! Actions returned by the state machine.

use crate::{CorrelationId, OperationResult, OutboundMessage, RequestId, UpdateTicket};
use fleet_messages::Subject;
use fleet_types::{NodeId, ServiceHandle};
use std::time::Duration;

/// Timer identifiers.
///
/// Setting a timer with an id that is already armed replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    /// Periodic expiry of stale node registry entries.
    RegistrySweep,

    /// Timeout of one node-bound request.
    Request(CorrelationId),

    /// Timeout of a discovery barrier.
    Discovery(CorrelationId),

    /// Timeout of a recovery's rebind barrier.
    Rebind(u64),

    /// End of the current check-orphan cycle.
    OrphanCycle,
}

/// Actions for the runner to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Publish without expecting a reply.
    Publish {
        subject: Subject,
        message: OutboundMessage,
    },

    /// Publish with a fresh reply inbox.
    ///
    /// Every reply arriving on the inbox is delivered as
    /// `Event::ReplyReceived { correlation, .. }` until `Unsubscribe`.
    Request {
        subject: Subject,
        message: OutboundMessage,
        correlation: CorrelationId,
    },

    /// Tear down the reply inbox of a request.
    Unsubscribe { correlation: CorrelationId },

    /// Answer a node-originated query on its reply subject.
    Reply {
        reply_to: Subject,
        message: OutboundMessage,
    },

    SetTimer { id: TimerId, duration: Duration },

    CancelTimer { id: TimerId },

    /// Hand a handle to the update-handle collaborator.
    ///
    /// The runner answers with `Event::HandleUpdateCompleted { ticket, .. }`.
    UpdateHandle {
        ticket: UpdateTicket,
        handle: ServiceHandle,
    },

    /// Final result of a client operation. Emitted exactly once per request.
    EmitResult {
        request_id: RequestId,
        result: OperationResult,
    },

    /// Outcome of one node's orphan purge.
    ///
    /// Zero or more of these precede the `EmitResult` of a purge request.
    EmitPurgeResult {
        request_id: RequestId,
        node_id: NodeId,
        result: OperationResult,
    },
}

impl Action {
    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Publish { .. } => "Publish",
            Action::Request { .. } => "Request",
            Action::Unsubscribe { .. } => "Unsubscribe",
            Action::Reply { .. } => "Reply",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::UpdateHandle { .. } => "UpdateHandle",
            Action::EmitResult { .. } => "EmitResult",
            Action::EmitPurgeResult { .. } => "EmitPurgeResult",
        }
    }
}
