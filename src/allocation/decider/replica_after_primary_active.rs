use super::{AllocationDecider, Decision};
use crate::allocation::RoutingAllocation;
use crate::cluster::DiscoveryNode;
use crate::routing::ShardRouting;

/// Replicas recover from the primary, so they wait until it is active.
pub struct ReplicaAfterPrimaryActiveAllocationDecider;

impl AllocationDecider for ReplicaAfterPrimaryActiveAllocationDecider {
    fn name(&self) -> &'static str {
        "replica_after_primary_active"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        _node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Decision {
        if shard.primary() {
            return Decision::yes(self.name());
        }
        match allocation.primary_of(shard.shard_id()) {
            Some(primary) if primary.active() => Decision::yes(self.name()),
            _ => Decision::no(self.name(), "primary shard for this replica is not yet active"),
        }
    }
}
