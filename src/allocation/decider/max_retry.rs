use super::{AllocationDecider, Decision};
use crate::allocation::RoutingAllocation;
use crate::cluster::DiscoveryNode;
use crate::routing::ShardRouting;

/// Stops retrying a copy that keeps failing to allocate.
pub struct MaxRetryAllocationDecider;

impl AllocationDecider for MaxRetryAllocationDecider {
    fn name(&self) -> &'static str {
        "max_retry"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        _node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Decision {
        let max_retries = allocation.settings().max_retries;
        match shard.unassigned_info() {
            Some(info) if info.failed_allocations() >= max_retries => Decision::no(
                self.name(),
                format!(
                    "shard has exceeded the maximum number of retries [{}] on failed allocation attempts, last failure [{}]",
                    max_retries,
                    info
                ),
            ),
            _ => Decision::yes(self.name()),
        }
    }
}
