//! Tagged operation results.

use fleet_types::{NodeId, ServiceError, ServiceHandle};
use std::fmt;
use thiserror::Error;

/// Result delivered to the caller of an operation.
///
/// Failures never escape an operation any other way.
pub type OperationResult = Result<OperationOutput, OperationFailure>;

/// Successful operation output.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    /// No payload (unprovision, unbind, restore, recover, check-orphan, ...).
    Done,

    /// The stored record of a provisioned instance or a new binding,
    /// credentials included.
    Handle(ServiceHandle),

    /// Per-node outcome of an orphan purge.
    PurgeSummary {
        succeeded: Vec<NodeId>,
        failed: Vec<NodeId>,
    },
}

impl OperationOutput {
    pub fn handle(&self) -> Option<&ServiceHandle> {
        match self {
            OperationOutput::Handle(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Unknown instance or handle id; no node was contacted.
    NotFound,
    /// No node reply within the node timeout.
    Timeout,
    /// The node replied with `success = false`.
    NodeReported,
    /// Local failure, including malformed node replies.
    Internal,
    /// No node scored positively and over-provisioning is disallowed.
    NoCapacity,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::NotFound => "not found",
            FailureKind::Timeout => "timeout",
            FailureKind::NodeReported => "node failure",
            FailureKind::Internal => "internal",
            FailureKind::NoCapacity => "no capacity",
        };
        f.write_str(name)
    }
}

/// A failed operation: its category plus the error a gateway renders.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {error}")]
pub struct OperationFailure {
    pub kind: FailureKind,
    pub error: ServiceError,
}

impl OperationFailure {
    pub fn not_found(what: &str) -> Self {
        Self {
            kind: FailureKind::NotFound,
            error: ServiceError::not_found(what),
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: FailureKind::Timeout,
            error: ServiceError::timeout(),
        }
    }

    pub fn internal() -> Self {
        Self {
            kind: FailureKind::Internal,
            error: ServiceError::internal(),
        }
    }

    pub fn no_capacity() -> Self {
        Self {
            kind: FailureKind::NoCapacity,
            error: ServiceError::internal(),
        }
    }

    /// Forward a node's error verbatim.
    ///
    /// A failed reply without an error structure is treated as internal.
    pub fn node_reported(error: Option<ServiceError>) -> Self {
        match error {
            Some(error) => Self {
                kind: FailureKind::NodeReported,
                error,
            },
            None => Self::internal(),
        }
    }

    /// HTTP-like status a gateway should answer with.
    pub fn http_status(&self) -> u16 {
        self.error.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::ErrorCode;

    #[test]
    fn test_status_mapping() {
        assert_eq!(OperationFailure::not_found("x").http_status(), 404);
        assert_eq!(OperationFailure::timeout().http_status(), 500);
        assert_eq!(OperationFailure::no_capacity().http_status(), 500);

        let node_err = ServiceError::new(ErrorCode::new(31102, 404, "Could not find instance: %s"), &["i1"]);
        let failure = OperationFailure::node_reported(Some(node_err.clone()));
        assert_eq!(failure.kind, FailureKind::NodeReported);
        assert_eq!(failure.error, node_err);
        assert_eq!(failure.http_status(), 404);
    }

    #[test]
    fn test_node_failure_without_error_is_internal() {
        let failure = OperationFailure::node_reported(None);
        assert_eq!(failure.kind, FailureKind::Internal);
        assert!(failure.error.is(ErrorCode::INTERNAL_ERROR));
    }
}
