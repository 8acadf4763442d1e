//! Live node registry.

use fleet_types::NodeId;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Tracks which nodes are alive, by last announcement time.
///
/// Entries are refreshed on every announcement and dropped by [`sweep`]
/// once older than the TTL.
///
/// [`sweep`]: NodeRegistry::sweep
#[derive(Debug)]
pub struct NodeRegistry {
    /// node -> time of last announcement
    nodes: BTreeMap<NodeId, Duration>,
    ttl: Duration,
}

impl NodeRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            nodes: BTreeMap::new(),
            ttl,
        }
    }

    /// Record an announcement from `node` at `now`.
    pub fn announce(&mut self, node: NodeId, now: Duration) {
        self.nodes.insert(node, now);
    }

    /// Drop nodes whose last announcement is older than the TTL.
    ///
    /// Returns the removed node ids.
    pub fn sweep(&mut self, now: Duration) -> Vec<NodeId> {
        let ttl = self.ttl;
        let mut expired = Vec::new();
        self.nodes.retain(|node, last_seen| {
            let alive = now.saturating_sub(*last_seen) <= ttl;
            if !alive {
                expired.push(node.clone());
            }
            alive
        });
        if !expired.is_empty() {
            debug!(expired = ?expired, remaining = self.nodes.len(), "Swept stale nodes");
        }
        expired
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn last_seen(&self, node: &NodeId) -> Option<Duration> {
        self.nodes.get(node).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, Duration)> {
        self.nodes.iter().map(|(node, seen)| (node, *seen))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
