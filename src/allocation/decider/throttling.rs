use super::{AllocationDecider, Decision};
use crate::allocation::RoutingAllocation;
use crate::cluster::DiscoveryNode;
use crate::routing::ShardRouting;

/// Limits concurrent recoveries per node. Fresh primaries count against
/// `node_initial_primaries_recoveries`; replicas and relocations are peer
/// recoveries and count against `node_concurrent_recoveries`.
pub struct ThrottlingAllocationDecider;

impl AllocationDecider for ThrottlingAllocationDecider {
    fn name(&self) -> &'static str {
        "throttling"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Decision {
        let settings = allocation.settings();

        if shard.primary() && shard.unassigned() {
            let initializing = allocation.initializing_primaries(node.id());
            if initializing >= settings.node_initial_primaries_recoveries as usize {
                return Decision::throttle(
                    self.name(),
                    format!(
                        "reached the limit of ongoing initial primary recoveries [{}] on node [{}]",
                        initializing,
                        node.id()
                    ),
                );
            }
            return Decision::yes(self.name());
        }

        let incoming = allocation.incoming_recoveries(node.id());
        if incoming >= settings.node_concurrent_recoveries as usize {
            return Decision::throttle(
                self.name(),
                format!(
                    "reached the limit of incoming shard recoveries [{}] on node [{}]",
                    incoming,
                    node.id()
                ),
            );
        }
        Decision::yes(self.name())
    }
}
