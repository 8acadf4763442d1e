//! Requests addressed to a single node, plus node-originated queries.
//!
//! Node-addressed requests travel on `{service}.{operation}.{node_id}` with
//! a reply inbox; the node answers exactly once on that inbox.

mod binding;
mod handles;
mod lifecycle;
mod orphan;

pub use binding::{BindRequest, UnbindRequest};
pub use handles::{HandlesQuery, UpdateServiceHandle};
pub use lifecycle::{ProvisionRequest, RestoreRequest, UnprovisionRequest};
pub use orphan::PurgeOrphanRequest;
