use super::{AllocationDecider, Decision};
use crate::allocation::RoutingAllocation;
use crate::cluster::DiscoveryNode;
use crate::routing::ShardRouting;

/// Rebalancing only starts once every shard is active.
pub struct ClusterRebalanceAllocationDecider;

impl AllocationDecider for ClusterRebalanceAllocationDecider {
    fn name(&self) -> &'static str {
        "cluster_rebalance"
    }

    fn can_allocate(
        &self,
        _shard: &ShardRouting,
        _node: &DiscoveryNode,
        _allocation: &RoutingAllocation<'_>,
    ) -> Decision {
        Decision::yes(self.name())
    }

    fn can_rebalance(&self, _shard: &ShardRouting, allocation: &RoutingAllocation<'_>) -> Decision {
        if !allocation.settings().rebalance_enabled {
            return Decision::no(self.name(), "rebalancing is disabled");
        }
        if !allocation.all_shards_active() {
            return Decision::no(
                self.name(),
                "the cluster has unassigned or initializing shards",
            );
        }
        Decision::yes(self.name())
    }
}
