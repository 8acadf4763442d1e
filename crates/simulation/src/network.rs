//! Simulated message bus between the provisioner and mock nodes.

use fleet_types::NodeId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::time::Duration;

/// Bus behaviour.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Service name; subjects are `{service_name}.{operation}[.{node}]`.
    pub service_name: String,
    /// One-way delivery latency.
    pub latency: Duration,
    /// Uniform extra latency in `[0, jitter]`.
    pub jitter: Duration,
    /// Seed for jitter.
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            service_name: "fleet".to_string(),
            latency: Duration::from_millis(10),
            jitter: Duration::ZERO,
            seed: 12345,
        }
    }
}

impl NetworkConfig {
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Where a published subject goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub operation: String,
    /// `None` for broadcasts.
    pub node: Option<NodeId>,
}

/// Routes subjects and samples latencies.
///
/// Partitioned nodes receive nothing and their replies are lost.
pub struct SimulatedNetwork {
    config: NetworkConfig,
    rng: ChaCha8Rng,
    partitioned: BTreeSet<NodeId>,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            partitioned: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Parse a subject of this service. Foreign subjects yield `None`.
    pub fn route(&self, subject: &str) -> Option<Route> {
        let rest = subject
            .strip_prefix(self.config.service_name.as_str())?
            .strip_prefix('.')?;
        match rest.split_once('.') {
            Some((operation, node)) => Some(Route {
                operation: operation.to_string(),
                node: Some(NodeId::from(node)),
            }),
            None => Some(Route {
                operation: rest.to_string(),
                node: None,
            }),
        }
    }

    /// Sample one delivery delay.
    pub fn delay(&mut self) -> Duration {
        if self.config.jitter.is_zero() {
            return self.config.latency;
        }
        let extra = self.rng.gen_range(0..=self.config.jitter.as_micros() as u64);
        self.config.latency + Duration::from_micros(extra)
    }

    pub fn partition(&mut self, node: NodeId) {
        self.partitioned.insert(node);
    }

    pub fn heal(&mut self, node: &NodeId) {
        self.partitioned.remove(node);
    }

    pub fn is_reachable(&self, node: &NodeId) -> bool {
        !self.partitioned.contains(node)
    }
}
