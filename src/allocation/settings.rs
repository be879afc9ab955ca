use crate::core::{ClusterError, Result};
use serde::{Deserialize, Serialize};

/// Tunables consulted by the allocation deciders and the balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationSettings {
    /// Concurrent incoming/outgoing peer recoveries allowed per node.
    pub node_concurrent_recoveries: u32,

    /// Fresh primaries allowed to initialize at once on a node.
    pub node_initial_primaries_recoveries: u32,

    /// Relocations allowed to run at once across the cluster.
    pub cluster_concurrent_rebalance: u32,

    /// Cluster-wide cap on copies per node.
    pub total_shards_per_node: Option<u32>,

    /// Node attributes whose values copies of a shard are spread across.
    pub awareness_attributes: Vec<String>,

    /// Failed allocations after which a copy is no longer retried.
    pub max_retries: u32,

    /// Tolerated difference in copy count between the fullest and emptiest node.
    pub balance_threshold: u32,

    /// Whether reroute may start relocations to even out nodes.
    pub rebalance_enabled: bool,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            node_concurrent_recoveries: 2,
            node_initial_primaries_recoveries: 4,
            cluster_concurrent_rebalance: 2,
            total_shards_per_node: None,
            awareness_attributes: Vec::new(),
            max_retries: 5,
            balance_threshold: 1,
            rebalance_enabled: true,
        }
    }
}

impl AllocationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings that never throttle recoveries.
    pub fn unthrottled() -> Self {
        Self::default()
            .node_concurrent_recoveries(u32::MAX)
            .node_initial_primaries_recoveries(u32::MAX)
    }

    pub fn node_concurrent_recoveries(mut self, limit: u32) -> Self {
        self.node_concurrent_recoveries = limit;
        self
    }

    pub fn node_initial_primaries_recoveries(mut self, limit: u32) -> Self {
        self.node_initial_primaries_recoveries = limit;
        self
    }

    pub fn cluster_concurrent_rebalance(mut self, limit: u32) -> Self {
        self.cluster_concurrent_rebalance = limit;
        self
    }

    pub fn total_shards_per_node(mut self, limit: u32) -> Self {
        self.total_shards_per_node = Some(limit);
        self
    }

    pub fn awareness_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.awareness_attributes.push(attribute.into());
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn balance_threshold(mut self, threshold: u32) -> Self {
        self.balance_threshold = threshold;
        self
    }

    pub fn rebalance_enabled(mut self, enabled: bool) -> Self {
        self.rebalance_enabled = enabled;
        self
    }

    /// Parses settings from JSON; absent fields keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(raw)
            .map_err(|err| ClusterError::InvalidConfig(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_concurrent_recoveries == 0 {
            return Err(ClusterError::InvalidConfig(
                "node_concurrent_recoveries must be >= 1".to_string(),
            ));
        }
        if self.node_initial_primaries_recoveries == 0 {
            return Err(ClusterError::InvalidConfig(
                "node_initial_primaries_recoveries must be >= 1".to_string(),
            ));
        }
        if self.cluster_concurrent_rebalance == 0 && self.rebalance_enabled {
            return Err(ClusterError::InvalidConfig(
                "cluster_concurrent_rebalance must be >= 1 when rebalancing is enabled"
                    .to_string(),
            ));
        }
        if self.total_shards_per_node == Some(0) {
            return Err(ClusterError::InvalidConfig(
                "total_shards_per_node must be >= 1".to_string(),
            ));
        }
        if self
            .awareness_attributes
            .iter()
            .any(|attribute| attribute.trim().is_empty())
        {
            return Err(ClusterError::InvalidConfig(
                "awareness attributes must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
