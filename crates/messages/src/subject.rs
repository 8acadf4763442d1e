//! Bus subjects.

use crate::BusMessage;
use fleet_types::NodeId;
use std::fmt;

/// A bus subject such as `mysql.provision.node-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(String);

impl Subject {
    /// Subject shared by every node of a service: `{service}.{operation}`.
    pub fn broadcast<M: BusMessage>(service: &str) -> Self {
        Self::named(service, M::operation())
    }

    /// Subject addressing one node: `{service}.{operation}.{node_id}`.
    pub fn node<M: BusMessage>(service: &str, node: &NodeId) -> Self {
        Subject(format!("{}.{}.{}", service, M::operation(), node))
    }

    /// Subject for an operation without a typed payload.
    pub fn named(service: &str, operation: &str) -> Self {
        Subject(format!("{}.{}", service, operation))
    }

    /// Wrap a raw subject string, e.g. a reply inbox.
    pub fn raw(subject: impl Into<String>) -> Self {
        Subject(subject.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The trailing node id of a node-addressed subject.
    pub fn node_suffix(&self, service: &str, operation: &str) -> Option<NodeId> {
        let prefix = format!("{}.{}.", service, operation);
        self.0
            .strip_prefix(&prefix)
            .filter(|rest| !rest.is_empty())
            .map(NodeId::from)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DiscoverRequest, ProvisionRequest};

    #[test]
    fn test_subject_shapes() {
        assert_eq!(
            Subject::broadcast::<DiscoverRequest>("redis").as_str(),
            "redis.discover"
        );
        let subject = Subject::node::<ProvisionRequest>("redis", &NodeId::from("node-1"));
        assert_eq!(subject.as_str(), "redis.provision.node-1");
        assert_eq!(
            subject.node_suffix("redis", "provision"),
            Some(NodeId::from("node-1"))
        );
        assert_eq!(subject.node_suffix("redis", "bind"), None);
    }
}
