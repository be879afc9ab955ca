use super::{AllocationDecider, Decision};
use crate::allocation::RoutingAllocation;
use crate::cluster::DiscoveryNode;
use crate::routing::ShardRouting;

/// Caps the copies on a node: the node's own `max_shards` attribute, the
/// cluster-wide `total_shards_per_node`, and the per-index limit for copies
/// of the same index.
pub struct ShardsLimitAllocationDecider;

impl AllocationDecider for ShardsLimitAllocationDecider {
    fn name(&self) -> &'static str {
        "shards_limit"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Decision {
        let held = allocation.node_shard_count(node.id());

        // Node attributes are validated when the node set is built.
        if let Ok(Some(capacity)) = node.max_shards() {
            if held >= capacity as usize {
                return Decision::no(
                    self.name(),
                    format!(
                        "node [{}] holds [{}] copies, its capacity is [{}]",
                        node.id(),
                        held,
                        capacity
                    ),
                );
            }
        }

        if let Some(limit) = allocation.settings().total_shards_per_node {
            if held >= limit as usize {
                return Decision::no(
                    self.name(),
                    format!(
                        "node [{}] holds [{}] copies, cluster limit per node is [{}]",
                        node.id(),
                        held,
                        limit
                    ),
                );
            }
        }

        let index_limit = allocation
            .index_metadata(shard.shard_id())
            .and_then(|metadata| metadata.settings().total_shards_per_node);
        if let Some(limit) = index_limit {
            let index = shard.shard_id().index();
            let held = allocation.node_index_shard_count(node.id(), index);
            if held >= limit as usize {
                return Decision::no(
                    self.name(),
                    format!(
                        "node [{}] holds [{}] copies of index [{}], index limit per node is [{}]",
                        node.id(),
                        held,
                        index,
                        limit
                    ),
                );
            }
        }

        Decision::yes(self.name())
    }
}
