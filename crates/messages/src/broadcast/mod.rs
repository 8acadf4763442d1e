//! Messages published to every node (or every provisioner) of a service.
//!
//! These use plain publish/subscribe on `{service}.{operation}`. Discovery
//! is the exception that collects replies: each node answers the discover
//! request with its current announcement.

mod discover;
mod orphan;

pub use discover::{DiscoverRequest, NodeAnnouncement};
pub use orphan::{CheckOrphanRequest, CheckOrphanResponse};
