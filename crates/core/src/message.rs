//! Outbound message types for bus communication.

use fleet_messages::codec::{self, CodecError};
use fleet_messages::{
    BindRequest, CheckOrphanRequest, DiscoverRequest, HandlesResponse, ProvisionRequest,
    PurgeOrphanRequest, RestoreRequest, SimpleResponse, UnbindRequest, UnprovisionRequest,
};

/// Outbound bus messages.
///
/// These are the payloads the provisioner publishes. The runner handles
/// the actual bus I/O; the subject travels alongside in the [`Action`](crate::Action).
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    // ═══════════════════════════════════════════════════════════════════════
    // Broadcasts
    // ═══════════════════════════════════════════════════════════════════════
    /// Ask every node to announce itself.
    Discover(DiscoverRequest),

    /// Every upstream handle, for node-side orphan comparison.
    CheckOrphan(CheckOrphanRequest),

    // ═══════════════════════════════════════════════════════════════════════
    // Node-addressed requests
    // ═══════════════════════════════════════════════════════════════════════
    Provision(ProvisionRequest),

    Unprovision(UnprovisionRequest),

    Bind(BindRequest),

    Unbind(UnbindRequest),

    Restore(RestoreRequest),

    PurgeOrphan(PurgeOrphanRequest),

    // ═══════════════════════════════════════════════════════════════════════
    // Replies to node-originated queries
    // ═══════════════════════════════════════════════════════════════════════
    Handles(HandlesResponse),

    Simple(SimpleResponse),
}

impl OutboundMessage {
    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Discover(_) => "Discover",
            OutboundMessage::CheckOrphan(_) => "CheckOrphan",
            OutboundMessage::Provision(_) => "Provision",
            OutboundMessage::Unprovision(_) => "Unprovision",
            OutboundMessage::Bind(_) => "Bind",
            OutboundMessage::Unbind(_) => "Unbind",
            OutboundMessage::Restore(_) => "Restore",
            OutboundMessage::PurgeOrphan(_) => "PurgeOrphan",
            OutboundMessage::Handles(_) => "Handles",
            OutboundMessage::Simple(_) => "Simple",
        }
    }

    /// Check if this is a reply to a node-originated query.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            OutboundMessage::Handles(_) | OutboundMessage::Simple(_)
        )
    }

    /// Encode the payload to wire format.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            OutboundMessage::Discover(m) => codec::encode(m),
            OutboundMessage::CheckOrphan(m) => codec::encode(m),
            OutboundMessage::Provision(m) => codec::encode(m),
            OutboundMessage::Unprovision(m) => codec::encode(m),
            OutboundMessage::Bind(m) => codec::encode(m),
            OutboundMessage::Unbind(m) => codec::encode(m),
            OutboundMessage::Restore(m) => codec::encode(m),
            OutboundMessage::PurgeOrphan(m) => codec::encode(m),
            OutboundMessage::Handles(m) => codec::encode(m),
            OutboundMessage::Simple(m) => codec::encode(m),
        }
    }
}
