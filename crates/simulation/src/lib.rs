//! Deterministic simulation runner.
//!
//! This crate runs the provisioner state machine against scripted
//! in-process nodes on a virtual clock. Given the same seed, it produces
//! identical results every run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationRunner                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Event Queue (BTreeMap<EventKey, Scheduled>)    │ │
//! │  │     Ordered by: time, priority, sequence           │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │              ┌────────────┴─────────────┐               │
//! │              ▼                          ▼               │
//! │  ┌──────────────────────┐   ┌──────────────────────┐    │
//! │  │  ProvisionerState    │   │  MockNode per id     │    │
//! │  │  handle(Event)       │   │  handle(op, payload) │    │
//! │  └──────────┬───────────┘   └──────────┬───────────┘    │
//! │             │                          │                │
//! │             ▼                          ▼                │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Actions / node replies → schedule new events   │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod event_queue;
mod mock_node;
mod network;
mod runner;
mod storage;

pub use event_queue::{EventKey, EventPriority};
pub use mock_node::{MockNode, NodeBehavior, NodeOutput, INSTANCE_NOT_FOUND, NODE_FAILURE};
pub use network::{NetworkConfig, Route, SimulatedNetwork};
pub use runner::{upstream_handles, SimulationRunner, SimulationStats};
pub use storage::SimHandleStore;
