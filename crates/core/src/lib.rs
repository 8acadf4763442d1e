//! Core types for the provisioner: `Event`, `Action`, and the
//! `StateMachine` trait.
//!
//! The provisioner is written as a synchronous state machine. Runners own
//! the bus, the clock and the timers; they feed deliveries and expiries in
//! as [`Event`]s and execute the returned [`Action`]s.

mod action;
mod event;
mod message;
mod request;
mod result;
mod traits;

pub use action::{Action, TimerId};
pub use event::{Event, Operation};
pub use message::OutboundMessage;
pub use request::{CorrelationId, RequestId, UpdateTicket};
pub use result::{FailureKind, OperationFailure, OperationOutput, OperationResult};
pub use traits::StateMachine;
