use super::{AllocationDecider, Decision};
use crate::allocation::RoutingAllocation;
use crate::cluster::DiscoveryNode;
use crate::routing::ShardRouting;

/// Caps relocations in flight across the cluster.
pub struct ConcurrentRebalanceAllocationDecider;

impl AllocationDecider for ConcurrentRebalanceAllocationDecider {
    fn name(&self) -> &'static str {
        "concurrent_rebalance"
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
        let limit = allocation.settings().cluster_concurrent_rebalance as usize;
        let relocating = allocation.relocation_count();
        if relocating >= limit {
            return Decision::throttle(
                self.name(),
                format!("reached the limit of concurrently rebalancing shards [{relocating}], limit [{limit}]"),
            );
        }
        Decision::yes(self.name())
    }
}
