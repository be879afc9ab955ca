
use cluster_utils::*;
use shardkeeper::allocation::decider::{
    AwarenessAllocationDecider, InSyncAllocationDecider, SameShardAllocationDecider,
};
use shardkeeper::metadata::IndexSettings;
use shardkeeper::routing::{IndexRoutingTable, IndexShardRoutingTable};
use shardkeeper::{
    AllocationDecider, AllocationId, AllocationService, AllocationSettings, AllocationStatus,
    ClusterError, ClusterHealthStatus, DecisionType, DiscoveryNode, DiscoveryNodes, ErrorKind,
    FailedShard, IndexMetadata, Metadata, NodeId, RoutingAllocation, RoutingTable, ShardId,
    ShardRouting, ShardRoutingState, StartedShard, UnassignedInfo, UnassignedReason,
};
use std::collections::BTreeSet;

fn unassigned_explanation(state: &shardkeeper::ClusterState, shard: &ShardId, primary: bool) -> (AllocationStatus, String) {
    let table = state.routing_table().shard_routing_table(shard).unwrap();
    let copy = table
        .shards()
        .iter()
        .find(|copy| copy.unassigned() && copy.primary() == primary)
        .expect("expected an unassigned copy");
    let info = copy.unassigned_info().unwrap();
    (
        info.last_allocation_status(),
        info.explanation().unwrap_or_default().to_string(),
    )
}

#[test]
fn primaries_are_assigned_before_replicas() {
    let service = service();
    let state = cluster(&["node-1", "node-2", "node-3"], vec![index("docs", 3, 1)]);

    let routed = service.reroute(&state, "initial").unwrap();
    assert!(routed.version() > state.version());
    assert_routing_invariants(&routed);

    let health = routed.health();
    assert_eq!(health.status, ClusterHealthStatus::Red);
    assert_eq!(health.initializing_shards, 3);
    assert_eq!(health.unassigned_shards, 3);

    let primary_nodes: BTreeSet<NodeId> = (0..3)
        .map(|shard| primary(&routed, "docs", shard))
        .inspect(|copy| assert!(copy.initializing()))
        .filter_map(|copy| copy.current_node_id().cloned())
        .collect();
    assert_eq!(primary_nodes.len(), 3, "primaries should spread over all nodes");

    let (status, explanation) = unassigned_explanation(&routed, &ShardId::new("docs", 0), false);
    assert_eq!(status, AllocationStatus::DecidersNo);
    assert!(explanation.contains("primary shard for this replica is not yet active"));

    assert_eq!(terms(&routed, "docs"), vec![1, 1, 1]);
}

#[test]
fn cluster_turns_green_once_copies_start() {
    let service = service();
    let state = cluster(&["node-1", "node-2", "node-3"], vec![index("docs", 3, 1)]);
    let routed = service.reroute(&state, "initial").unwrap();

    let (primaries_started, changed) = start_initializing(&service, &routed, None);
    assert!(changed);
    assert_eq!(primaries_started.health().active_primary_shards, 3);
    assert_eq!(primaries_started.health().status, ClusterHealthStatus::Yellow);

    let stable = stabilize(&service, &primaries_started);
    let health = stable.health();
    assert_eq!(health.status, ClusterHealthStatus::Green);
    assert_eq!(health.active_shards, 6);
    assert_eq!(health.relocating_shards, 0);
    assert_eq!(terms(&stable, "docs"), vec![1, 1, 1]);

    for node in ["node-1", "node-2", "node-3"] {
        let held = stable.routing_table().shards_on_node(&NodeId::from(node)).len();
        assert_eq!(held, 2, "node {node} should hold two copies");
    }
}

#[test]
fn reroute_is_idempotent() {
    let service = service();
    let state = cluster(&["node-1", "node-2", "node-3"], vec![index("docs", 3, 2)]);

    let once = service.reroute(&state, "first").unwrap();
    let twice = service.reroute(&once, "second").unwrap();
    assert_eq!(once, twice);

    let (started, _) = start_initializing(&service, &once, None);
    let again = service.reroute(&started, "after start").unwrap();
    assert_eq!(started, again);

    let stable = stabilize(&service, &started);
    assert_eq!(service.reroute(&stable, "stable").unwrap(), stable);

    let failed = service
        .apply_failed_shards(&stable, &[fail(&primary(&stable, "docs", 1))])
        .unwrap();
    assert_eq!(service.reroute(&failed, "after failure").unwrap(), failed);
}

#[test]
fn same_shard_decider_keeps_copies_apart() {
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 1, 1)]);
    let service = service();
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());

    let primary = primary(&stable, "docs", 0);
    let replica_node = stable
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap()
        .replica_shards()[0]
        .current_node_id()
        .cloned()
        .unwrap();
    assert_ne!(primary.current_node_id(), Some(&replica_node));

    let settings = AllocationSettings::default();
    let allocation = RoutingAllocation::new(&stable, &settings);
    let decider = SameShardAllocationDecider;
    let holder = stable.nodes().get(primary.current_node_id().unwrap()).unwrap();
    let decision = decider.can_allocate(&primary, holder, &allocation);
    assert_eq!(decision.kind(), DecisionType::No);
    assert!(decision.explanation().contains("already allocated"));
}

#[test]
fn in_sync_decider_guards_lost_primaries() {
    let service = service();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 1, 0)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());
    let failed = service
        .apply_failed_shards(&stable, &[fail(&primary(&stable, "docs", 0))])
        .unwrap();

    let settings = AllocationSettings::default();
    let allocation = RoutingAllocation::new(&failed, &settings);
    let decider = InSyncAllocationDecider;
    let node = failed.nodes().get(&NodeId::from("node-2")).unwrap();

    let lost = primary(&failed, "docs", 0);
    assert!(lost.unassigned());
    let decision = decider.can_allocate(&lost, node, &allocation);
    assert_eq!(decision.kind(), DecisionType::No);
    assert!(decision.explanation().contains("no in-sync shard copy available"));

    let created = ShardRouting::new_unassigned(
        ShardId::new("docs", 0),
        true,
        UnassignedInfo::new(UnassignedReason::IndexCreated, None),
    );
    assert!(decider.can_allocate(&created, node, &allocation).is_yes());

    // With nothing acknowledged there is nothing to lose.
    let forgotten = shardkeeper::ClusterState::builder_from(&failed)
        .metadata(Metadata::builder_from(failed.metadata()).put(index("docs", 1, 0)).build())
        .build();
    let allocation = RoutingAllocation::new(&forgotten, &settings);
    assert!(decider.can_allocate(&lost, node, &allocation).is_yes());
}

#[test]
fn awareness_spreads_copies_over_zones() {
    let nodes = DiscoveryNodes::builder()
        .add(DiscoveryNode::new("node-1").with_attribute("zone", "a"))
        .add(DiscoveryNode::new("node-2").with_attribute("zone", "a"))
        .add(DiscoveryNode::new("node-3").with_attribute("zone", "b"))
        .build()
        .unwrap();
    let state = cluster_with_nodes(nodes, vec![index("docs", 1, 1)]);
    let service = AllocationService::new(AllocationSettings::default().awareness_attribute("zone")).unwrap();

    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());
    let table = stable
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap();
    let zones: BTreeSet<&str> = table
        .shards()
        .iter()
        .filter_map(|copy| copy.current_node_id())
        .filter_map(|node| stable.nodes().get(node))
        .filter_map(|node| node.attribute("zone"))
        .collect();
    assert_eq!(zones.len(), 2, "copies must land in both zones: {:?}", table.shards());
}

#[test]
fn awareness_rejects_nodes_without_the_attribute() {
    let nodes = DiscoveryNodes::builder()
        .add(DiscoveryNode::new("node-1").with_attribute("zone", "a"))
        .add(DiscoveryNode::new("node-2"))
        .build()
        .unwrap();
    let state = cluster_with_nodes(nodes, vec![index("docs", 1, 0)]);
    let settings = AllocationSettings::default().awareness_attribute("zone");

    let allocation = RoutingAllocation::new(&state, &settings);
    let copy = state
        .routing_table()
        .primary_shard(&ShardId::new("docs", 0))
        .unwrap()
        .unwrap();
    let decider = AwarenessAllocationDecider;

    let bare = state.nodes().get(&NodeId::from("node-2")).unwrap();
    let decision = decider.can_allocate(copy, bare, &allocation);
    assert_eq!(decision.kind(), DecisionType::No);
    assert!(decision.explanation().contains("does not contain the awareness attribute [zone]"));

    let zoned = state.nodes().get(&NodeId::from("node-1")).unwrap();
    assert!(decider.can_allocate(copy, zoned, &allocation).is_yes());
}

#[test]
fn node_capacity_attribute_limits_copies() {
    let nodes = DiscoveryNodes::builder()
        .add(DiscoveryNode::new("node-1").with_attribute("max_shards", "1"))
        .build()
        .unwrap();
    let state = cluster_with_nodes(nodes, vec![index("docs", 2, 0)]);
    let service = service();

    let routed = service.reroute(&state, "initial").unwrap();
    assert_eq!(initializing(&routed, None).len(), 1);

    let (status, explanation) = unassigned_explanation(&routed, &ShardId::new("docs", 1), true);
    assert_eq!(status, AllocationStatus::DecidersNo);
    assert!(explanation.contains("its capacity is [1]"), "{explanation}");
}

#[test]
fn cluster_and_index_shard_limits_apply() {
    let capped = AllocationService::new(AllocationSettings::default().total_shards_per_node(1)).unwrap();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 3, 0)]);
    let routed = capped.reroute(&state, "initial").unwrap();
    assert_eq!(initializing(&routed, None).len(), 2);
    let (_, explanation) = unassigned_explanation(&routed, &ShardId::new("docs", 2), true);
    assert!(explanation.contains("cluster limit per node is [1]"), "{explanation}");

    let limited = IndexMetadata::builder("logs")
        .number_of_shards(2)
        .settings(IndexSettings {
            total_shards_per_node: Some(1),
        })
        .build()
        .unwrap();
    let state = cluster(&["node-1"], vec![limited]);
    let routed = service().reroute(&state, "initial").unwrap();
    assert_eq!(initializing(&routed, Some("logs")).len(), 1);
    let (_, explanation) = unassigned_explanation(&routed, &ShardId::new("logs", 1), true);
    assert!(explanation.contains("index limit per node is [1]"), "{explanation}");
}

#[test]
fn initial_primary_recoveries_are_throttled() {
    let service = AllocationService::new(AllocationSettings::default().node_initial_primaries_recoveries(1)).unwrap();
    let state = cluster(&["node-1"], vec![index("docs", 2, 0)]);

    let routed = service.reroute(&state, "initial").unwrap();
    assert_eq!(initializing(&routed, None).len(), 1);
    let (status, explanation) = unassigned_explanation(&routed, &ShardId::new("docs", 1), true);
    assert_eq!(status, AllocationStatus::DecidersThrottled);
    assert!(explanation.contains("initial primary recoveries"), "{explanation}");

    // Throttled copies go out once the first one has started.
    let (next, _) = start_initializing(&service, &routed, None);
    assert_eq!(initializing(&next, None).len(), 1);
    let stable = stabilize(&service, &next);
    assert_eq!(stable.health().status, ClusterHealthStatus::Green);
}

#[test]
fn copies_are_not_retried_forever() {
    let service = AllocationService::new(AllocationSettings::default().max_retries(1)).unwrap();
    let state = cluster(&["node-1"], vec![index("docs", 1, 0)]);
    let routed = service.reroute(&state, "initial").unwrap();

    let failed = service
        .apply_failed_shards(&routed, &[fail(&primary(&routed, "docs", 0))])
        .unwrap();
    let copy = primary(&failed, "docs", 0);
    assert!(copy.unassigned());

    let info = copy.unassigned_info().unwrap();
    assert_eq!(info.reason(), UnassignedReason::AllocationFailed);
    assert_eq!(info.failed_allocations(), 1);
    assert_eq!(info.last_allocation_status(), AllocationStatus::DecidersNo);
    assert!(info.explanation().unwrap().contains("maximum number of retries"));
    assert_eq!(failed.health().status, ClusterHealthStatus::Red);
    assert_eq!(terms(&failed, "docs"), vec![2]);

    assert_eq!(service.reroute(&failed, "retry").unwrap(), failed);
}

#[test]
fn adding_a_node_relocates_without_touching_terms() {
    let service = service();
    let state = cluster(&["node-1"], vec![index("docs", 2, 0)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());

    let joined = add_node(&stable, DiscoveryNode::new("node-2"));
    let routed = service.reroute(&joined, "node joined").unwrap();
    assert_eq!(routed.health().relocating_shards, 1);
    assert_routing_invariants(&routed);

    let source = primary(&routed, "docs", 0);
    assert_eq!(source.state(), ShardRoutingState::Relocating);
    assert_eq!(source.relocating_node_id(), Some(&NodeId::from("node-2")));

    let balanced = stabilize(&service, &routed);
    assert_eq!(terms(&balanced, "docs"), vec![1, 1]);
    assert_eq!(balanced.health().relocating_shards, 0);
    assert_eq!(
        primary(&balanced, "docs", 0).current_node_id(),
        Some(&NodeId::from("node-2"))
    );
    assert_eq!(balanced.routing_table().shards_on_node(&NodeId::from("node-1")).len(), 1);
}

#[test]
fn concurrent_rebalance_limits_relocations() {
    let service = AllocationService::new(AllocationSettings::default().cluster_concurrent_rebalance(1)).unwrap();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 8, 0)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());

    let joined = add_node(&add_node(&stable, DiscoveryNode::new("node-3")), DiscoveryNode::new("node-4"));
    let routed = service.reroute(&joined, "nodes joined").unwrap();
    assert_eq!(routed.health().relocating_shards, 1);

    let balanced = stabilize(&service, &routed);
    for node in ["node-1", "node-2", "node-3", "node-4"] {
        assert_eq!(balanced.routing_table().shards_on_node(&NodeId::from(node)).len(), 2);
    }
}

#[test]
fn disabled_rebalancing_leaves_new_nodes_empty() {
    let service = AllocationService::new(AllocationSettings::default().rebalance_enabled(false)).unwrap();
    let state = cluster(&["node-1"], vec![index("docs", 2, 0)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());

    let joined = add_node(&stable, DiscoveryNode::new("node-2"));
    let routed = service.reroute(&joined, "node joined").unwrap();
    assert_eq!(routed.routing_table(), joined.routing_table());
    assert!(routed.routing_table().shards_on_node(&NodeId::from("node-2")).is_empty());
}

#[test]
fn failed_primary_relocation_target_bumps_term() {
    let service = service();
    let state = cluster(&["node-1"], vec![index("docs", 2, 0)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());
    let relocating = service
        .reroute(&add_node(&stable, DiscoveryNode::new("node-2")), "node joined")
        .unwrap();

    let target = relocating
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap()
        .shards()
        .iter()
        .find(|copy| copy.is_relocation_target())
        .cloned()
        .unwrap();
    assert!(target.primary());

    let failed = service.apply_failed_shards(&relocating, &[fail(&target)]).unwrap();
    assert_routing_invariants(&failed);
    assert_eq!(terms(&failed, "docs"), vec![2, 1]);

    let source = primary(&failed, "docs", 0);
    assert!(source.active());
    assert_eq!(source.current_node_id(), Some(&NodeId::from("node-1")));
    let still_there = failed
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap()
        .get_by_allocation_id(target.allocation_id().unwrap())
        .is_some();
    assert!(!still_there, "the failed target must be gone");
}

#[test]
fn failed_relocation_source_cancels_target() {
    let service = service();
    let state = cluster(&["node-1"], vec![index("docs", 2, 0)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());
    let relocating = service
        .reroute(&add_node(&stable, DiscoveryNode::new("node-2")), "node joined")
        .unwrap();

    let source = primary(&relocating, "docs", 0);
    assert!(source.relocating());

    let failed = service.apply_failed_shards(&relocating, &[fail(&source)]).unwrap();
    assert_routing_invariants(&failed);
    assert_eq!(terms(&failed, "docs"), vec![2, 1]);
    assert_eq!(failed.health().relocating_shards, 0);

    let table = failed
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap();
    assert_eq!(table.size(), 1);
    assert!(table.shards().iter().all(|copy| !copy.is_relocation_target()));
}

#[test]
fn failing_relocations_count_against_retries() {
    let service = AllocationService::new(AllocationSettings::default().max_retries(1)).unwrap();
    let state = cluster(&["node-1"], vec![index("docs", 2, 0)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());
    let relocating = service
        .reroute(&add_node(&stable, DiscoveryNode::new("node-2")), "node joined")
        .unwrap();
    assert!(primary(&relocating, "docs", 0).relocating());

    let target = relocating
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap()
        .shards()
        .iter()
        .find(|copy| copy.is_relocation_target())
        .cloned()
        .unwrap();
    let failed = service.apply_failed_shards(&relocating, &[fail(&target)]).unwrap();
    assert_routing_invariants(&failed);
    assert_eq!(terms(&failed, "docs"), vec![2, 1]);

    let source = primary(&failed, "docs", 0);
    assert!(source.started());
    assert_eq!(source.current_node_id(), Some(&NodeId::from("node-1")));
    let info = source.unassigned_info().unwrap();
    assert_eq!(info.reason(), UnassignedReason::RelocationFailed);
    assert_eq!(info.failed_allocations(), 1);
    assert_eq!(info.message(), Some("test failure"));

    // Shard 0 is out of retries, so the balancer moves shard 1 instead.
    let other = primary(&failed, "docs", 1);
    assert_eq!(other.state(), ShardRoutingState::Relocating);
    assert_eq!(other.relocating_node_id(), Some(&NodeId::from("node-2")));
}

#[test]
fn losing_the_relocation_target_node_is_not_a_failed_attempt() {
    let service = service();
    let state = cluster(&["node-1"], vec![index("docs", 2, 0)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());
    let relocating = service
        .reroute(&add_node(&stable, DiscoveryNode::new("node-2")), "node joined")
        .unwrap();

    let departed = remove_node(&relocating, "node-2");
    let recovered = service.disassociate_dead_nodes(&departed, "node left").unwrap();
    let source = primary(&recovered, "docs", 0);
    assert!(source.started());
    assert!(source.unassigned_info().is_none());
    assert_eq!(recovered.health().relocating_shards, 0);
}

#[test]
fn started_copies_join_the_in_sync_set() {
    let service = service();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 1, 1)]);
    let routed = service.reroute(&state, "initial").unwrap();
    assert!(in_sync(&routed, "docs", 0).is_empty());

    let (primary_started, _) = start_initializing(&service, &routed, None);
    let primary_id = primary(&primary_started, "docs", 0).allocation_id().unwrap();
    assert_eq!(in_sync(&primary_started, "docs", 0), BTreeSet::from([primary_id]));

    let stable = stabilize(&service, &primary_started);
    let replica_id = stable
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap()
        .replica_shards()[0]
        .allocation_id()
        .unwrap();
    assert_eq!(in_sync(&stable, "docs", 0), BTreeSet::from([primary_id, replica_id]));
}

#[test]
fn stale_copies_leave_the_in_sync_set() {
    let service = service();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 1, 1)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());
    let table = stable
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap();
    let primary_id = table.primary_shard().unwrap().allocation_id().unwrap();
    let replica = table.replica_shards()[0].clone();
    let replica_id = replica.allocation_id().unwrap();

    let stale = FailedShard::from_routing(&replica, "stale", true).unwrap();
    let marked = service.apply_failed_shards(&stable, &[stale]).unwrap();
    assert_eq!(in_sync(&marked, "docs", 0), BTreeSet::from([primary_id]));
    assert_eq!(terms(&marked, "docs"), vec![1]);
}

#[test]
fn in_sync_set_shrinks_to_active_copies() {
    let service = service();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 1, 1)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());
    let table = stable
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap();
    let primary_id = table.primary_shard().unwrap().allocation_id().unwrap();
    let replica = table.replica_shards()[0].clone();
    let old_replica_id = replica.allocation_id().unwrap();

    // Not marked stale: the old id lingers while its replacement recovers.
    let failed = service.apply_failed_shards(&stable, &[fail(&replica)]).unwrap();
    assert_eq!(in_sync(&failed, "docs", 0), BTreeSet::from([primary_id, old_replica_id]));

    let recovered = stabilize(&service, &failed);
    let new_replica_id = recovered
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap()
        .replica_shards()[0]
        .allocation_id()
        .unwrap();
    assert_ne!(new_replica_id, old_replica_id);
    assert_eq!(
        in_sync(&recovered, "docs", 0),
        BTreeSet::from([primary_id, new_replica_id])
    );
}

#[test]
fn reroute_promotes_replica_next_to_unassigned_primary() {
    let shard_id = ShardId::new("docs", 0);
    let node_1 = NodeId::from("node-1");
    let replica_id = AllocationId::derive(&shard_id, &node_1, false, 1);
    let lost_primary = ShardRouting::new_unassigned(
        shard_id.clone(),
        true,
        UnassignedInfo::new(UnassignedReason::NodeLeft, None),
    );
    let replica = ShardRouting::new_unassigned(
        shard_id.clone(),
        false,
        UnassignedInfo::new(UnassignedReason::IndexCreated, None),
    )
    .initialize(node_1.clone(), replica_id)
    .move_to_started();

    let routing = RoutingTable::builder()
        .add(IndexRoutingTable::from_shards(
            "docs",
            vec![IndexShardRoutingTable::new(shard_id.clone(), vec![lost_primary, replica])],
        ))
        .build();
    let metadata = IndexMetadata::builder("docs")
        .number_of_shards(1)
        .number_of_replicas(1)
        .in_sync_allocation_ids(0, BTreeSet::from([replica_id]))
        .build()
        .unwrap();
    let state = shardkeeper::ClusterState::builder("restored")
        .nodes(nodes(&["node-1", "node-2"]))
        .metadata(Metadata::builder().put(metadata).build())
        .routing_table(routing)
        .build();

    let service = service();
    let routed = service.reroute(&state, "restored").unwrap();
    assert_routing_invariants(&routed);
    assert_eq!(terms(&routed, "docs"), vec![2]);

    let promoted = primary(&routed, "docs", 0);
    assert!(promoted.started());
    assert_eq!(promoted.allocation_id(), Some(replica_id));
    assert_eq!(promoted.current_node_id(), Some(&node_1));

    let new_replica = routed
        .routing_table()
        .shard_routing_table(&shard_id)
        .unwrap()
        .replica_shards()[0]
        .clone();
    assert!(new_replica.initializing());
    assert_eq!(new_replica.current_node_id(), Some(&NodeId::from("node-2")));
}

#[test]
fn replica_failure_leaves_term_alone() {
    let service = service();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 1, 1)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());

    let replica = stable
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap()
        .replica_shards()[0]
        .clone();
    let failed = service.apply_failed_shards(&stable, &[fail(&replica)]).unwrap();

    assert_eq!(terms(&failed, "docs"), vec![1]);
    assert_eq!(primary(&failed, "docs", 0), primary(&stable, "docs", 0));
    let info = failed
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap()
        .replica_shards()[0]
        .unassigned_info()
        .cloned()
        .unwrap();
    assert_eq!(info.reason(), UnassignedReason::AllocationFailed);
    assert_eq!(info.failed_allocations(), 1);
}

#[test]
fn primary_without_in_sync_copy_stays_unassigned() {
    let service = service();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 1, 1)]);
    let routed = service.reroute(&state, "initial").unwrap();
    let (recovering, _) = start_initializing(&service, &routed, None);

    let replica = recovering
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap()
        .replica_shards()[0]
        .clone();
    assert!(replica.initializing());

    let failed = service
        .apply_failed_shards(&recovering, &[fail(&primary(&recovering, "docs", 0))])
        .unwrap();
    assert_eq!(terms(&failed, "docs"), vec![2]);
    assert_routing_invariants(&failed);

    // No active replica to promote and the only in-sync copy is gone: the
    // primary must not come back empty.
    let lost = primary(&recovering, "docs", 0).allocation_id().unwrap();
    let copy = primary(&failed, "docs", 0);
    assert!(copy.unassigned());
    assert_eq!(failed.health().status, ClusterHealthStatus::Red);
    assert_eq!(in_sync(&failed, "docs", 0), BTreeSet::from([lost]));

    let (status, explanation) = unassigned_explanation(&failed, &ShardId::new("docs", 0), true);
    assert_eq!(status, AllocationStatus::DecidersNo);
    assert!(explanation.contains("no in-sync shard copy available"), "{explanation}");
    assert!(explanation.contains(&lost.to_string()), "{explanation}");

    let replica = failed
        .routing_table()
        .shard_routing_table(&ShardId::new("docs", 0))
        .unwrap()
        .replica_shards()[0]
        .clone();
    assert!(replica.unassigned());
    assert_eq!(replica.unassigned_info().unwrap().reason(), UnassignedReason::PrimaryFailed);

    assert_eq!(service.reroute(&failed, "retry").unwrap(), failed);
}

#[test]
fn primary_that_never_started_may_start_over() {
    let service = service();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 1, 0)]);
    let routed = service.reroute(&state, "initial").unwrap();
    let first = primary(&routed, "docs", 0);
    assert!(in_sync(&routed, "docs", 0).is_empty());

    let failed = service.apply_failed_shards(&routed, &[fail(&first)]).unwrap();
    let again = primary(&failed, "docs", 0);
    assert!(again.initializing());
    assert_ne!(again.allocation_id(), first.allocation_id());
    assert_eq!(terms(&failed, "docs"), vec![2]);
}

#[test]
fn duplicate_failure_reports_bump_once() {
    let service = service();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 2, 1)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());

    let report = fail(&primary(&stable, "docs", 1));
    let failed = service
        .apply_failed_shards(&stable, &[report.clone(), report])
        .unwrap();
    assert_eq!(terms(&failed, "docs"), vec![1, 2]);
    assert_routing_invariants(&failed);
}

#[test]
fn stale_reports_are_ignored() {
    let service = service();
    let state = cluster(&["node-1", "node-2"], vec![index("docs", 1, 1)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());
    let primary = primary(&stable, "docs", 0);

    let started_again = StartedShard::from_routing(&primary).unwrap();
    assert_eq!(service.apply_started_shards(&stable, &[started_again]).unwrap(), stable);

    let unknown = FailedShard {
        allocation_id: AllocationId::derive(primary.shard_id(), &NodeId::from("node-1"), true, 9_999),
        ..fail(&primary)
    };
    assert_eq!(service.apply_failed_shards(&stable, &[unknown]).unwrap(), stable);

    let wrong_node = FailedShard {
        node_id: NodeId::from("node-9"),
        ..fail(&primary)
    };
    assert_eq!(service.apply_failed_shards(&stable, &[wrong_node]).unwrap(), stable);
}

#[test]
fn reports_for_unknown_shards_are_rejected() {
    let service = service();
    let state = cluster(&["node-1"], vec![index("docs", 1, 0)]);
    let routed = service.reroute(&state, "initial").unwrap();
    let copy = primary(&routed, "docs", 0);

    let bad_shard = StartedShard {
        shard_id: ShardId::new("docs", 7),
        ..StartedShard::from_routing(&copy).unwrap()
    };
    let err = service.apply_started_shards(&routed, &[bad_shard]).unwrap_err();
    assert_eq!(err, ClusterError::ShardNotFound(ShardId::new("docs", 7)));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let bad_index = FailedShard {
        shard_id: ShardId::new("missing", 0),
        ..fail(&copy)
    };
    let err = service.apply_failed_shards(&routed, &[fail(&copy), bad_index]).unwrap_err();
    assert_eq!(err, ClusterError::IndexNotFound("missing".to_string()));

    // Rejected requests leave nothing behind.
    assert!(primary(&routed, "docs", 0).initializing());
    assert_eq!(terms(&routed, "docs"), vec![1]);
}

#[test]
fn create_and_delete_index() {
    let service = service();
    let state = cluster(&["node-1"], vec![index("docs", 1, 0)]);

    let err = service.create_index(&state, index("docs", 2, 0)).unwrap_err();
    assert_eq!(err, ClusterError::IndexAlreadyExists("docs".to_string()));

    let created = service.create_index(&state, index("logs", 2, 0)).unwrap();
    assert_eq!(created.version(), state.version() + 1);
    assert_eq!(terms(&created, "logs"), vec![1, 1]);
    assert!(
        created
            .routing_table()
            .index("logs")
            .unwrap()
            .shards()
            .all(|table| table.shards().iter().all(|copy| copy.unassigned()))
    );

    let deleted = service.delete_index(&created, "docs").unwrap();
    assert!(deleted.routing_table().index("docs").is_none());
    assert!(matches!(
        deleted.primary_term(&ShardId::new("docs", 0)),
        Err(ClusterError::IndexNotFound(_))
    ));

    let err = service.delete_index(&deleted, "docs").unwrap_err();
    assert_eq!(err, ClusterError::IndexNotFound("docs".to_string()));
}

#[test]
fn lost_node_copies_are_reassigned() {
    let service = service();
    let state = cluster(&["node-1", "node-2", "node-3"], vec![index("docs", 3, 1)]);
    let stable = stabilize(&service, &service.reroute(&state, "initial").unwrap());

    let lost = primary(&stable, "docs", 0).current_node_id().cloned().unwrap();
    let left = remove_node(&stable, lost.as_str());
    let recovered = service.disassociate_dead_nodes(&left, "connection lost").unwrap();
    assert_routing_invariants(&recovered);
    assert!(recovered.routing_table().shards_on_node(&lost).is_empty());

    for copy in initializing(&recovered, None) {
        let info = copy.unassigned_info().unwrap();
        assert_eq!(info.reason(), UnassignedReason::NodeLeft);
        assert_eq!(info.failed_allocations(), 0);
        let expected = format!("node_left [{lost}]: connection lost");
        assert_eq!(info.message(), Some(expected.as_str()));
    }

    let stable_again = stabilize(&service, &recovered);
    assert_eq!(stable_again.health().status, ClusterHealthStatus::Green);
    assert_eq!(stable_again.health().active_shards, 6);
}
