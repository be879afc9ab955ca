pub mod awareness;
pub mod cluster_rebalance;
pub mod concurrent_rebalance;
pub mod in_sync;
pub mod max_retry;
pub mod replica_after_primary_active;
pub mod same_shard;
pub mod shards_limit;
pub mod throttling;

pub use awareness::AwarenessAllocationDecider;
pub use cluster_rebalance::ClusterRebalanceAllocationDecider;
pub use concurrent_rebalance::ConcurrentRebalanceAllocationDecider;
pub use in_sync::InSyncAllocationDecider;
pub use max_retry::MaxRetryAllocationDecider;
pub use replica_after_primary_active::ReplicaAfterPrimaryActiveAllocationDecider;
pub use same_shard::SameShardAllocationDecider;
pub use shards_limit::ShardsLimitAllocationDecider;
pub use throttling::ThrottlingAllocationDecider;

use super::RoutingAllocation;
use crate::cluster::DiscoveryNode;
use crate::routing::ShardRouting;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{Level, event};

/// Verdict of a decider, ordered from most to least permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Yes,
    Throttle,
    No,
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Yes => "YES",
            Self::Throttle => "THROTTLE",
            Self::No => "NO",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    kind: DecisionType,
    label: String,
    explanation: String,
}

impl Decision {
    pub fn yes(label: &str) -> Self {
        Self::new(DecisionType::Yes, label, String::new())
    }

    pub fn throttle(label: &str, explanation: impl Into<String>) -> Self {
        Self::new(DecisionType::Throttle, label, explanation.into())
    }

    pub fn no(label: &str, explanation: impl Into<String>) -> Self {
        Self::new(DecisionType::No, label, explanation.into())
    }

    fn new(kind: DecisionType, label: &str, explanation: String) -> Self {
        Self {
            kind,
            label: label.to_string(),
            explanation,
        }
    }

    pub fn kind(&self) -> DecisionType {
        self.kind
    }

    /// Name of the decider that produced this verdict.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn is_yes(&self) -> bool {
        self.kind == DecisionType::Yes
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.explanation.is_empty() {
            write!(f, "{}({})", self.kind, self.label)
        } else {
            write!(f, "{}({}): {}", self.kind, self.label, self.explanation)
        }
    }
}

/// One placement rule. Deciders are pure: they only read the allocation.
pub trait AllocationDecider: Send + Sync {
    fn name(&self) -> &'static str;

    /// May `shard` be placed on `node`? `shard` is either unassigned or, when
    /// rebalancing, a started copy that would move to `node`.
    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Decision;

    /// May `shard` be moved somewhere else at all?
    fn can_rebalance(&self, _shard: &ShardRouting, _allocation: &RoutingAllocation<'_>) -> Decision {
        Decision::yes(self.name())
    }
}

/// Ordered set of deciders whose verdicts are combined: any NO wins, then any
/// THROTTLE, else YES.
pub struct AllocationDeciders {
    deciders: Vec<Box<dyn AllocationDecider>>,
}

impl AllocationDeciders {
    pub fn new() -> Self {
        Self {
            deciders: Vec::new(),
        }
    }

    pub fn register(&mut self, decider: Box<dyn AllocationDecider>) {
        event!(Level::DEBUG, decider = decider.name(), "registered allocation decider");
        self.deciders.push(decider);
    }

    pub fn with_default_deciders() -> Self {
        let mut deciders = Self::new();

        deciders.register(Box::new(MaxRetryAllocationDecider));
        deciders.register(Box::new(InSyncAllocationDecider));
        deciders.register(Box::new(ReplicaAfterPrimaryActiveAllocationDecider));
        deciders.register(Box::new(ClusterRebalanceAllocationDecider));
        deciders.register(Box::new(ConcurrentRebalanceAllocationDecider));
        deciders.register(Box::new(SameShardAllocationDecider));
        deciders.register(Box::new(ShardsLimitAllocationDecider));
        deciders.register(Box::new(AwarenessAllocationDecider));
        deciders.register(Box::new(ThrottlingAllocationDecider));

        deciders
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.deciders.iter().map(|decider| decider.name()).collect()
    }

    pub fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Decision {
        combine(
            self.deciders
                .iter()
                .map(|decider| decider.can_allocate(shard, node, allocation)),
        )
    }

    pub fn can_rebalance(&self, shard: &ShardRouting, allocation: &RoutingAllocation<'_>) -> Decision {
        combine(
            self.deciders
                .iter()
                .map(|decider| decider.can_rebalance(shard, allocation)),
        )
    }
}

impl Default for AllocationDeciders {
    fn default() -> Self {
        Self::with_default_deciders()
    }
}

fn combine(decisions: impl Iterator<Item = Decision>) -> Decision {
    let mut throttled = None;
    for decision in decisions {
        match decision.kind() {
            DecisionType::No => return decision,
            DecisionType::Throttle => {
                throttled.get_or_insert(decision);
            }
            DecisionType::Yes => {}
        }
    }
    throttled.unwrap_or_else(|| Decision::yes("all"))
}
