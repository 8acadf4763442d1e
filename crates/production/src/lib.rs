//! Production runner for the provisioner.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  submit   ┌──────────────────────────────────────┐
//! │ ProvisionerHandle├──────────►│ ProductionRunner (single task)       │
//! └──────────────────┘  results  │   ProvisionerState::handle(event)    │
//!          ▲◄────────────────────┤     └─► actions                      │
//!                                └──┬──────────┬───────────┬───────────┘
//!                                   │ publish  │ timers    │ update
//!                                   ▼          ▼           ▼
//!                             ┌──────────┐ ┌────────┐ ┌─────────────┐
//!                             │MessageBus│ │ tokio  │ │ HandleStore │
//!                             └────┬─────┘ └───┬────┘ └──────┬──────┘
//!                                  └───────────┴─────────────┘
//!                                      events back into the runner
//! ```
//!
//! The state machine is the same one the simulation drives; only the
//! clock, the bus and the store differ.

pub mod bus;
pub mod config;
mod handle;
mod runner;
pub mod store;
pub mod telemetry;

pub use bus::{BusError, Envelope, LocalBus, MessageBus, Subscription, SubscriptionId};
pub use config::{ConfigError, FileConfig};
pub use handle::{ClientError, ProvisionerHandle, PurgeOutcome};
pub use runner::{ProductionRunner, RunnerError};
pub use store::{HandleStore, MemoryHandleStore};
pub use telemetry::init_logging;
