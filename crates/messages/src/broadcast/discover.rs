//! Node discovery and announcements.

use crate::BusMessage;
use fleet_types::{Capacity, NodeId};
use serde::{Deserialize, Serialize};

/// Fan-out request asking every node to announce itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverRequest {}

impl BusMessage for DiscoverRequest {
    fn operation() -> &'static str {
        "discover"
    }
}

/// A node's self-announcement: its id plus whatever capacity fields its
/// service reports.
///
/// Sent periodically on `{service}.announce` and as the reply to a
/// [`DiscoverRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    /// Missing ids are tolerated on decode; such announcements are ignored.
    #[serde(default)]
    pub id: Option<NodeId>,

    #[serde(flatten)]
    pub capacity: Capacity,
}

impl NodeAnnouncement {
    pub fn new(id: NodeId, capacity: Capacity) -> Self {
        Self {
            id: Some(id),
            capacity,
        }
    }
}

impl BusMessage for NodeAnnouncement {
    fn operation() -> &'static str {
        "announce"
    }
}
