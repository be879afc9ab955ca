// ============================================================================
// Balancer
// ============================================================================
//
// Evens out the number of copies per data node by relocating started copies
// from the most loaded node towards the least loaded one. Loads are projected:
// a relocation in flight already counts on its target. Each step must pass
// `can_rebalance` for the copy and `can_allocate` on the target node.
//
// ============================================================================

use super::decider::{AllocationDeciders, DecisionType};
use super::RoutingAllocation;
use crate::core::{NodeId, ShardId};
use crate::routing::ShardRouting;
use std::collections::BTreeMap;
use tracing::{Level, event};

/// A relocation chosen by the balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub shard_id: ShardId,
    pub position: usize,
    pub from_node: NodeId,
    pub to_node: NodeId,
}

enum Plan {
    Move(PlannedMove),
    Throttled,
    Balanced,
}

/// Starts relocations until the cluster is balanced or rebalancing is
/// throttled. Returns the number of relocations started.
pub fn rebalance(allocation: &mut RoutingAllocation<'_>, deciders: &AllocationDeciders) -> usize {
    let mut started = 0;
    loop {
        match plan_move(allocation, deciders) {
            Plan::Move(planned) => {
                apply_move(allocation, &planned);
                started += 1;
            }
            Plan::Throttled | Plan::Balanced => break,
        }
    }
    started
}

fn node_loads(allocation: &RoutingAllocation<'_>) -> BTreeMap<NodeId, usize> {
    allocation
        .nodes()
        .data_nodes()
        .map(|node| (node.id().clone(), allocation.node_shard_count(node.id())))
        .collect()
}

fn plan_move(allocation: &RoutingAllocation<'_>, deciders: &AllocationDeciders) -> Plan {
    // A move across a gap of one only swaps the loads.
    let threshold = (allocation.settings().balance_threshold as usize).max(1);
    let loads = node_loads(allocation);

    let mut by_load: Vec<(&NodeId, usize)> = loads.iter().map(|(id, load)| (id, *load)).collect();
    by_load.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    for (from_node, from_load) in by_load.iter().rev() {
        for (to_node, to_load) in by_load.iter() {
            if from_load.saturating_sub(*to_load) <= threshold {
                break;
            }
            let Some(target) = allocation.nodes().get(to_node) else {
                continue;
            };

            for (shard_id, position, copy) in movable_copies(allocation, from_node) {
                let rebalance = deciders.can_rebalance(copy, allocation);
                match rebalance.kind() {
                    DecisionType::Throttle => {
                        event!(Level::DEBUG, decision = %rebalance, "rebalancing throttled");
                        return Plan::Throttled;
                    }
                    DecisionType::No => continue,
                    DecisionType::Yes => {}
                }
                if deciders.can_allocate(copy, target, allocation).is_yes() {
                    return Plan::Move(PlannedMove {
                        shard_id,
                        position,
                        from_node: (*from_node).clone(),
                        to_node: (*to_node).clone(),
                    });
                }
            }
        }
    }
    Plan::Balanced
}

/// Started copies on `node_id`, replicas before primaries, then by shard.
fn movable_copies<'s>(
    allocation: &'s RoutingAllocation<'_>,
    node_id: &NodeId,
) -> Vec<(ShardId, usize, &'s ShardRouting)> {
    let mut copies: Vec<(ShardId, usize, &ShardRouting)> = allocation
        .shard_ids()
        .into_iter()
        .flat_map(|shard_id| {
            allocation
                .copies(&shard_id)
                .iter()
                .enumerate()
                .filter(|(_, copy)| copy.started() && copy.is_on_node(node_id))
                .map(|(position, copy)| (shard_id.clone(), position, copy))
                .collect::<Vec<_>>()
        })
        .collect();
    copies.sort_by(|a, b| a.2.primary().cmp(&b.2.primary()).then_with(|| a.0.cmp(&b.0)));
    copies
}

fn apply_move(allocation: &mut RoutingAllocation<'_>, planned: &PlannedMove) {
    let Some(copy) = allocation.copies(&planned.shard_id).get(planned.position).cloned() else {
        return;
    };
    let target_id = allocation.next_allocation_id(&planned.shard_id, &planned.to_node, copy.primary());
    let (source, target) = copy.relocate(planned.to_node.clone(), target_id);

    event!(
        Level::INFO,
        shard = %planned.shard_id,
        primary = copy.primary(),
        from = %planned.from_node,
        to = %planned.to_node,
        "relocating shard to balance nodes"
    );

    allocation.replace(&planned.shard_id, planned.position, source);
    allocation.push(&planned.shard_id, target);
}
