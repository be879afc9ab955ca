use super::{AllocationDecider, Decision};
use crate::allocation::RoutingAllocation;
use crate::cluster::DiscoveryNode;
use crate::routing::ShardRouting;
use std::collections::BTreeSet;

/// Spreads the copies of a shard evenly over the values of each configured
/// awareness attribute (rack, zone, ...).
///
/// With `c` copies and `z` distinct values among data nodes, no value may hold
/// more than `ceil(c / z)` copies. A node without the attribute gets nothing.
pub struct AwarenessAllocationDecider;

impl AllocationDecider for AwarenessAllocationDecider {
    fn name(&self) -> &'static str {
        "awareness"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Decision {
        let Some(metadata) = allocation.index_metadata(shard.shard_id()) else {
            return Decision::yes(self.name());
        };
        let copies = metadata.copies_per_shard() as usize;

        for attribute in &allocation.settings().awareness_attributes {
            let Some(value) = node.attribute(attribute) else {
                return Decision::no(
                    self.name(),
                    format!(
                        "node [{}] does not contain the awareness attribute [{}]",
                        node.id(),
                        attribute
                    ),
                );
            };

            let zones: BTreeSet<&str> = allocation
                .nodes()
                .data_nodes()
                .filter_map(|candidate| candidate.attribute(attribute))
                .collect();
            let max_per_zone = copies.div_ceil(zones.len().max(1));

            // Relocation sources are counted where they are going; the copy
            // being placed is counted once, on `node`.
            let in_zone = allocation
                .copies(shard.shard_id())
                .iter()
                .filter(|copy| copy.assigned() && !copy.relocating())
                .filter(|copy| {
                    shard.allocation_id().is_none() || copy.allocation_id() != shard.allocation_id()
                })
                .filter_map(|copy| copy.current_node_id())
                .filter_map(|node_id| allocation.nodes().get(node_id))
                .filter(|holder| holder.attribute(attribute) == Some(value))
                .count();

            if in_zone + 1 > max_per_zone {
                return Decision::no(
                    self.name(),
                    format!(
                        "there are [{}] copies of shard {} in [{}={}], at most [{}] allowed",
                        in_zone,
                        shard.shard_id(),
                        attribute,
                        value,
                        max_per_zone
                    ),
                );
            }
        }

        Decision::yes(self.name())
    }
}
