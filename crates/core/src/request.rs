//! Request tracking identifiers.

use std::fmt;

/// Opaque identifier for tracking client requests through the system.
///
/// The runner maintains a map of `RequestId` -> response channel.
/// This keeps async response handling out of the sync state machine.
///
/// # Example
///
/// ```ignore
/// // In the runner:
/// let request_id = RequestId(self.next_request_id);
/// self.next_request_id += 1;
///
/// let (response_tx, response_rx) = oneshot::channel();
/// self.pending_requests.insert(request_id, response_tx);
///
/// // Send event to state machine
/// self.handle(Event::Client { request_id, op });
///
/// // Later, when state machine returns Action::EmitResult:
/// if let Some(tx) = self.pending_requests.remove(&request_id) {
///     let _ = tx.send(result);
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Identifies one outbound bus request and its reply inbox.
///
/// Minted by the state machine. The runner subscribes a fresh inbox for
/// it and delivers every reply on that inbox as
/// [`Event::ReplyReceived`](crate::Event::ReplyReceived) until told to
/// unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corr-{}", self.0)
    }
}

/// Identifies one call into the update-handle collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpdateTicket(pub u64);

impl fmt::Display for UpdateTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upd-{}", self.0)
    }
}
