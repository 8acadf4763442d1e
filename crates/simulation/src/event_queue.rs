//! Ordering of scheduled simulation events.

use fleet_core::{CorrelationId, Event, UpdateTicket};
use fleet_messages::Subject;
use fleet_types::{NodeId, ServiceHandle};
use std::time::Duration;

/// Processing order for events scheduled at the same instant.
///
/// Lower runs first. Deliveries beat timers so a reply that arrives exactly
/// at the deadline still counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventPriority {
    /// Handle store completions.
    Internal = 0,
    /// Bus deliveries to nodes, inboxes and subscriptions.
    Network = 1,
    /// Timer expiries.
    Timer = 2,
    /// Operations submitted by the test driver.
    Client = 3,
}

/// Key of the event queue: time, then priority, then insertion sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub sequence: u64,
}

/// Something the runner will do at a scheduled instant.
#[derive(Debug, Clone)]
pub(crate) enum Scheduled {
    /// Feed an event to the provisioner.
    Provisioner(Event),
    /// Deliver a bus message to a mock node.
    ToNode {
        node: NodeId,
        subject: Subject,
        payload: Vec<u8>,
        reply_to: Option<CorrelationId>,
    },
    /// A node reply arriving at a provisioner inbox.
    ToInbox {
        correlation: CorrelationId,
        payload: Vec<u8>,
    },
    /// The handle store finishing an update.
    StoreUpdate {
        ticket: UpdateTicket,
        handle: ServiceHandle,
    },
}

impl Scheduled {
    pub(crate) fn priority(&self) -> EventPriority {
        match self {
            Scheduled::Provisioner(Event::TimerFired { .. }) => EventPriority::Timer,
            Scheduled::Provisioner(Event::Client { .. }) => EventPriority::Client,
            Scheduled::Provisioner(_) => EventPriority::Network,
            Scheduled::ToNode { .. } | Scheduled::ToInbox { .. } => EventPriority::Network,
            Scheduled::StoreUpdate { .. } => EventPriority::Internal,
        }
    }
}
