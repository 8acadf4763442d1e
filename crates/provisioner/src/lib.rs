//! Provisioner core for a fleet of service nodes.
//!
//! The provisioner keeps a registry of live nodes, places new instances on
//! the node with the best advertised capacity, and routes every later
//! operation on an instance (bind, unbind, unprovision, restore) to the
//! node that hosts it. It also recovers instances from backups and detects
//! and purges orphans.
//!
//! # Architecture
//!
//! ```text
//! Client operation / bus delivery / timer
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │ ProvisionerState.handle(Event)                              │
//! │                                                             │
//! │   1. Validate against the InstanceDirectory                 │
//! │   2. Pick a node (NodeRegistry + NodeScorer for provision)  │
//! │   3. Record a pending request keyed by CorrelationId        │
//! │   4. Action::Request + Action::SetTimer                     │
//! └─────────────────────────────────────────────────────────────┘
//!                     │
//!                     ▼
//!       Runner publishes, node replies or timer fires
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │ ProvisionerState.handle(ReplyReceived | TimerFired)         │
//! │                                                             │
//! │   1. Remove the pending entry (first one wins)              │
//! │   2. Apply the reply to the InstanceDirectory               │
//! │   3. Action::EmitResult (or continue a recovery / purge)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The state machine performs no I/O. Runners own the clock, the timers
//! and the message bus.
//!
//! # Components
//!
//! - [`ProvisionerState`] - Main state machine
//! - [`ProvisionerConfig`] - Timeouts, TTLs and placement policy
//! - [`NodeRegistry`] - Last announcement time per node
//! - [`NodeScorer`] / [`FieldScorer`] - Capacity scoring for placement
//! - [`Barrier`] - Exactly-once fan-in with timeout
//! - [`InstanceDirectory`] - Provisioned instances and bindings
//! - [`OrphanTracker`] - Orphan maps of a check cycle

mod barrier;
mod config;
mod directory;
mod lifecycle;
mod orphan;
mod pending;
mod recovery;
mod registry;
mod scorer;
mod state;

pub use barrier::{Barrier, BarrierStart};
pub use config::ProvisionerConfig;
pub use directory::InstanceDirectory;
pub use orphan::{plan_purge, OrphanBindings, OrphanInstances, OrphanTracker, PurgeBatch, PurgePlan};
pub use recovery::{split_handles, RecoveryStage, RecoveryTask};
pub use registry::NodeRegistry;
pub use scorer::{select_best, FieldScorer, NodeScorer};
pub use state::{ProvisionerState, ProvisionerStatus};

#[cfg(test)]
mod tests;
