//! Message bus contracts between provisioners and nodes.
//!
//! Every payload exchanged over the bus is a typed struct. The operation
//! name of a message determines its subject (`{service}.{operation}`, or
//! `{service}.{operation}.{node_id}` for node-addressed requests); the
//! payload itself carries no type tag.

pub mod broadcast;
pub mod codec;
pub mod request;
pub mod response;
mod subject;
mod traits;

// Re-export commonly used types
pub use broadcast::{CheckOrphanRequest, CheckOrphanResponse, DiscoverRequest, NodeAnnouncement};
pub use codec::CodecError;
pub use request::{
    BindRequest, HandlesQuery, ProvisionRequest, PurgeOrphanRequest, RestoreRequest,
    UnbindRequest, UnprovisionRequest, UpdateServiceHandle,
};
pub use response::{BindResponse, HandlesResponse, ProvisionResponse, SimpleResponse};
pub use subject::Subject;
pub use traits::{BusMessage, Reply, Request};
