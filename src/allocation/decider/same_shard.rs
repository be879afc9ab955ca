use super::{AllocationDecider, Decision};
use crate::allocation::RoutingAllocation;
use crate::cluster::DiscoveryNode;
use crate::routing::ShardRouting;

/// Never put two copies of the same shard on one node.
pub struct SameShardAllocationDecider;

impl AllocationDecider for SameShardAllocationDecider {
    fn name(&self) -> &'static str {
        "same_shard"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Decision {
        let occupied = allocation
            .copies(shard.shard_id())
            .iter()
            .any(|copy| copy.is_on_node(node.id()));
        if occupied {
            return Decision::no(
                self.name(),
                format!(
                    "a copy of shard {} is already allocated to node [{}]",
                    shard.shard_id(),
                    node.id()
                ),
            );
        }
        Decision::yes(self.name())
    }
}
