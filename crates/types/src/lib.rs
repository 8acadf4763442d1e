//! Core types for the service broker fleet.
//!
//! These types are shared by the message contracts, the provisioner state
//! machine and the runners. None of them perform I/O.

mod capacity;
mod error;
mod handle;
mod identifiers;

pub use capacity::Capacity;
pub use error::{ErrorCode, ServiceError};
pub use handle::{Configuration, Credentials, ServiceHandle, MASKED_PASSWORD};
pub use identifiers::{NodeId, ServiceId};
