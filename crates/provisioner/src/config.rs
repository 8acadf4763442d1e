//! Configuration for the provisioner.

use std::time::Duration;

/// Configuration for node coordination, placement and orphan checks.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Service name; prefix of every bus subject (`{service}.provision...`).
    pub service_name: String,

    /// Timeout for every node-bound request and for discovery.
    pub node_timeout: Duration,

    /// Nodes that have not announced within this window are dropped.
    pub node_ttl: Duration,

    /// How often stale nodes are swept from the registry.
    pub sweep_interval: Duration,

    /// Place instances on the best node even when its score is not positive.
    pub allow_over_provisioning: bool,

    /// How long a check-orphan cycle accepts node reports.
    pub orphan_cycle_window: Duration,

    /// Seed for minting binding identifiers.
    ///
    /// Fixed seeds make simulation runs reproducible; production seeds
    /// this from the OS.
    pub id_seed: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            service_name: "fleet".to_string(),
            node_timeout: Duration::from_secs(2),
            node_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            allow_over_provisioning: false,
            orphan_cycle_window: Duration::from_secs(30),
            id_seed: 0,
        }
    }
}

impl ProvisionerConfig {
    /// Create a config for the named service with default timings.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_node_timeout(mut self, node_timeout: Duration) -> Self {
        self.node_timeout = node_timeout;
        self
    }

    pub fn with_node_ttl(mut self, node_ttl: Duration) -> Self {
        self.node_ttl = node_ttl;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn with_over_provisioning(mut self, allow: bool) -> Self {
        self.allow_over_provisioning = allow;
        self
    }

    pub fn with_orphan_cycle_window(mut self, window: Duration) -> Self {
        self.orphan_cycle_window = window;
        self
    }

    pub fn with_id_seed(mut self, seed: u64) -> Self {
        self.id_seed = seed;
        self
    }
}
