use super::{AllocationDecider, Decision};
use crate::allocation::RoutingAllocation;
use crate::cluster::DiscoveryNode;
use crate::routing::{ShardRouting, UnassignedReason};

/// Keeps a primary that has acknowledged writes from coming back empty.
///
/// An unassigned primary may start from scratch only while its shard has no
/// in-sync copies on record (a new index, or a primary that never finished
/// recovering). Otherwise it needs an in-sync copy still assigned somewhere;
/// without one the shard stays red instead of silently losing writes.
pub struct InSyncAllocationDecider;

impl AllocationDecider for InSyncAllocationDecider {
    fn name(&self) -> &'static str {
        "in_sync"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        _node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Decision {
        if !shard.primary() || !shard.unassigned() {
            return Decision::yes(self.name());
        }
        let index_created = shard
            .unassigned_info()
            .is_none_or(|info| info.reason() == UnassignedReason::IndexCreated);
        if index_created {
            return Decision::yes(self.name());
        }

        let Some(in_sync) = allocation
            .in_sync_allocation_ids(shard.shard_id())
            .filter(|ids| !ids.is_empty())
        else {
            return Decision::yes(self.name());
        };
        let has_in_sync_copy = allocation
            .copies(shard.shard_id())
            .iter()
            .filter(|copy| copy.assigned())
            .filter_map(ShardRouting::allocation_id)
            .any(|id| in_sync.contains(&id));
        if has_in_sync_copy {
            return Decision::yes(self.name());
        }

        let ids = in_sync
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Decision::no(
            self.name(),
            format!("no in-sync shard copy available, in-sync allocations [{ids}]"),
        )
    }
}
