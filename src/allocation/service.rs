// ============================================================================
// Allocation Service
// ============================================================================
//
// Drives the shard state machine. Every entry point takes a cluster state and
// returns a new one; the input is never modified and an error leaves it as
// the caller's current state.
//
// Primary terms move here and nowhere else: a shard's term goes up by one in
// any request that fails its active or initializing primary (node loss
// included) or promotes a replica in its place. Relocations, replica
// failures, node joins and initial assignment leave terms alone.
//
// ============================================================================

use super::balancer;
use super::decider::{AllocationDeciders, Decision, DecisionType};
use super::{AllocationSettings, FailedShard, RoutingAllocation, StartedShard};
use crate::cluster::ClusterState;
use crate::core::{AllocationId, ClusterError, NodeId, Result, ShardId};
use crate::metadata::{IndexMetadata, Metadata};
use crate::routing::{
    AllocationStatus, RoutingTable, ShardRouting, UnassignedInfo, UnassignedReason,
};
use tracing::{Level, event, info_span};

pub struct AllocationService {
    settings: AllocationSettings,
    deciders: AllocationDeciders,
}

/// A copy to fail, resolved against the working allocation.
struct CopyFailure<'r> {
    shard_id: &'r ShardId,
    allocation_id: AllocationId,
    reason: UnassignedReason,
    message: &'r str,
    mark_as_stale: bool,
}

impl AllocationService {
    pub fn new(settings: AllocationSettings) -> Result<Self> {
        Self::with_deciders(settings, AllocationDeciders::with_default_deciders())
    }

    pub fn with_deciders(settings: AllocationSettings, deciders: AllocationDeciders) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings, deciders })
    }

    pub fn settings(&self) -> &AllocationSettings {
        &self.settings
    }

    pub fn deciders(&self) -> &AllocationDeciders {
        &self.deciders
    }

    /// Assigns what can be assigned and rebalances. Calling it again on its
    /// own output changes nothing.
    pub fn reroute(&self, state: &ClusterState, reason: &str) -> Result<ClusterState> {
        let span = info_span!("reroute", reason, version = state.version());
        let _enter = span.enter();

        let mut allocation = RoutingAllocation::new(state, &self.settings);
        self.reroute_allocation(&mut allocation);
        self.build_result(state, &allocation)
    }

    /// Marks initializing copies as started. Completing a relocation removes
    /// the source copy. Reports that no longer match a copy are ignored.
    pub fn apply_started_shards(&self, state: &ClusterState, started: &[StartedShard]) -> Result<ClusterState> {
        let span = info_span!("apply_started_shards", count = started.len(), version = state.version());
        let _enter = span.enter();

        for report in started {
            state.routing_table().shard_routing_table(&report.shard_id)?;
        }

        let mut allocation = RoutingAllocation::new(state, &self.settings);
        for report in started {
            self.start_copy(&mut allocation, report);
        }
        self.reroute_allocation(&mut allocation);
        self.build_result(state, &allocation)
    }

    /// Fails the reported copies, promoting replicas where a primary was lost.
    pub fn apply_failed_shards(&self, state: &ClusterState, failed: &[FailedShard]) -> Result<ClusterState> {
        let span = info_span!("apply_failed_shards", count = failed.len(), version = state.version());
        let _enter = span.enter();

        for report in failed {
            state.routing_table().shard_routing_table(&report.shard_id)?;
        }

        let mut allocation = RoutingAllocation::new(state, &self.settings);
        for report in failed {
            let matches = allocation
                .find_by_allocation_id(&report.shard_id, report.allocation_id)
                .is_some_and(|copy| copy.is_on_node(&report.node_id));
            if !matches {
                event!(
                    Level::DEBUG,
                    shard = %report.shard_id,
                    node = %report.node_id,
                    allocation_id = %report.allocation_id,
                    "ignoring failure report for unknown copy"
                );
                continue;
            }
            self.fail_copy(
                &mut allocation,
                CopyFailure {
                    shard_id: &report.shard_id,
                    allocation_id: report.allocation_id,
                    reason: UnassignedReason::AllocationFailed,
                    message: &report.message,
                    mark_as_stale: report.mark_as_stale,
                },
            );
        }
        self.reroute_allocation(&mut allocation);
        self.build_result(state, &allocation)
    }

    /// Fails every copy assigned to a node that is no longer in `state.nodes()`.
    pub fn disassociate_dead_nodes(&self, state: &ClusterState, reason: &str) -> Result<ClusterState> {
        let span = info_span!("disassociate_dead_nodes", reason, version = state.version());
        let _enter = span.enter();

        let mut allocation = RoutingAllocation::new(state, &self.settings);
        let dead: Vec<(ShardId, AllocationId, NodeId)> = allocation
            .all_copies()
            .filter_map(|copy| {
                let node = copy.current_node_id()?;
                if state.nodes().contains(node) {
                    return None;
                }
                Some((copy.shard_id().clone(), copy.allocation_id()?, node.clone()))
            })
            .collect();

        for (shard_id, allocation_id, node_id) in &dead {
            // An earlier failure in this loop may already have removed the copy.
            if allocation.find_by_allocation_id(shard_id, *allocation_id).is_none() {
                continue;
            }
            let message = format!("node_left [{node_id}]: {reason}");
            self.fail_copy(
                &mut allocation,
                CopyFailure {
                    shard_id,
                    allocation_id: *allocation_id,
                    reason: UnassignedReason::NodeLeft,
                    message: &message,
                    mark_as_stale: false,
                },
            );
        }
        self.reroute_allocation(&mut allocation);
        self.build_result(state, &allocation)
    }

    /// Adds an index with every copy unassigned.
    pub fn create_index(&self, state: &ClusterState, index: IndexMetadata) -> Result<ClusterState> {
        let name = index.index().to_string();
        if state.metadata().has_index(&name) || state.routing_table().has_index(&name) {
            return Err(ClusterError::IndexAlreadyExists(name));
        }
        event!(
            Level::INFO,
            index = %name,
            shards = index.number_of_shards(),
            replicas = index.number_of_replicas(),
            "creating index"
        );

        let routing_table = RoutingTable::builder_from(state.routing_table())
            .add_as_new(&index)
            .version(state.routing_table().version() + 1)
            .build();
        let metadata = Metadata::builder_from(state.metadata())
            .put(index)
            .version(state.metadata().version() + 1)
            .build();
        Ok(ClusterState::builder_from(state)
            .routing_table(routing_table)
            .metadata(metadata)
            .increment_version()
            .build())
    }

    /// Removes an index together with its routing and primary terms.
    pub fn delete_index(&self, state: &ClusterState, name: &str) -> Result<ClusterState> {
        if !state.metadata().has_index(name) {
            return Err(ClusterError::IndexNotFound(name.to_string()));
        }
        event!(Level::INFO, index = name, "deleting index");

        let routing_table = RoutingTable::builder_from(state.routing_table())
            .remove(name)
            .version(state.routing_table().version() + 1)
            .build();
        let metadata = Metadata::builder_from(state.metadata())
            .remove(name)
            .version(state.metadata().version() + 1)
            .build();
        Ok(ClusterState::builder_from(state)
            .routing_table(routing_table)
            .metadata(metadata)
            .increment_version()
            .build())
    }

    fn build_result(&self, state: &ClusterState, allocation: &RoutingAllocation<'_>) -> Result<ClusterState> {
        let routing_table = allocation.build_routing_table();
        let metadata = allocation.build_metadata()?;
        if routing_table.is_none() && metadata.is_none() {
            return Ok(state.clone());
        }

        let mut builder = ClusterState::builder_from(state).increment_version();
        if let Some(routing_table) = routing_table {
            builder = builder.routing_table(routing_table);
        }
        if let Some(metadata) = metadata {
            builder = builder.metadata(metadata);
        }
        let next = builder.build();
        event!(Level::DEBUG, version = next.version(), "cluster state updated");
        Ok(next)
    }

    // ------------------------------------------------------------------------
    // Reroute
    // ------------------------------------------------------------------------

    fn reroute_allocation(&self, allocation: &mut RoutingAllocation<'_>) {
        // Failures handled by this service promote on the spot. An unassigned
        // primary next to an active replica only arrives in states built or
        // restored from outside, e.g. a snapshot loaded from JSON.
        for shard_id in allocation.shard_ids() {
            let primary_unassigned = allocation
                .primary_of(&shard_id)
                .is_some_and(ShardRouting::unassigned);
            if primary_unassigned && promote_replica(allocation, &shard_id) {
                allocation.bump_primary_term(&shard_id);
            }
        }

        self.allocate_unassigned(allocation, true);
        self.allocate_unassigned(allocation, false);

        if self.settings.rebalance_enabled {
            let moved = balancer::rebalance(allocation, &self.deciders);
            if moved > 0 {
                event!(Level::INFO, relocations = moved, "started rebalancing relocations");
            }
        }

        self.explain_unassigned(allocation);
    }

    fn allocate_unassigned(&self, allocation: &mut RoutingAllocation<'_>, primaries: bool) {
        for shard_id in allocation.shard_ids() {
            let positions: Vec<usize> = allocation
                .copies(&shard_id)
                .iter()
                .enumerate()
                .filter(|(_, copy)| copy.unassigned() && copy.primary() == primaries)
                .map(|(position, _)| position)
                .collect();
            for position in positions {
                self.allocate_copy(allocation, &shard_id, position);
            }
        }
    }

    /// Places one unassigned copy on the least loaded node that every decider
    /// accepts.
    fn allocate_copy(&self, allocation: &mut RoutingAllocation<'_>, shard_id: &ShardId, position: usize) {
        let Some(copy) = allocation.copies(shard_id).get(position).cloned() else {
            return;
        };

        for node_id in candidate_nodes(allocation) {
            let Some(node) = allocation.nodes().get(&node_id) else {
                continue;
            };
            if !self.deciders.can_allocate(&copy, node, allocation).is_yes() {
                continue;
            }
            let allocation_id = allocation.next_allocation_id(shard_id, &node_id, copy.primary());
            event!(
                Level::INFO,
                shard = %shard_id,
                primary = copy.primary(),
                node = %node_id,
                "assigning shard copy"
            );
            allocation.replace(shard_id, position, copy.initialize(node_id, allocation_id));
            return;
        }
    }

    /// Records on every copy still unassigned why no node took it. Runs once
    /// the round's assignments are final so a repeated reroute records the
    /// same explanation.
    fn explain_unassigned(&self, allocation: &mut RoutingAllocation<'_>) {
        for shard_id in allocation.shard_ids() {
            let positions: Vec<usize> = allocation
                .copies(&shard_id)
                .iter()
                .enumerate()
                .filter(|(_, copy)| copy.unassigned())
                .map(|(position, _)| position)
                .collect();

            for position in positions {
                let copy = allocation.copies(&shard_id)[position].clone();
                let Some(info) = copy.unassigned_info() else {
                    continue;
                };

                let declined: Vec<(NodeId, Decision)> = candidate_nodes(allocation)
                    .into_iter()
                    .filter_map(|node_id| {
                        let node = allocation.nodes().get(&node_id)?;
                        let decision = self.deciders.can_allocate(&copy, node, allocation);
                        Some((node_id, decision))
                    })
                    .collect();
                let throttled = declined
                    .iter()
                    .any(|(_, decision)| decision.kind() == DecisionType::Throttle);
                let status = if throttled {
                    AllocationStatus::DecidersThrottled
                } else {
                    AllocationStatus::DecidersNo
                };
                let explanation = if declined.is_empty() {
                    "no data nodes available".to_string()
                } else {
                    declined
                        .iter()
                        .map(|(node_id, decision)| format!("node [{node_id}]: {decision}"))
                        .collect::<Vec<_>>()
                        .join("; ")
                };

                if info.last_allocation_status() == status
                    && info.explanation() == Some(explanation.as_str())
                {
                    continue;
                }
                event!(
                    Level::DEBUG,
                    shard = %shard_id,
                    primary = copy.primary(),
                    status = ?status,
                    "shard copy stays unassigned"
                );
                let info = info.clone().with_allocation_status(status, Some(explanation));
                allocation.replace(&shard_id, position, copy.with_unassigned_info(info));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Started / failed copies
    // ------------------------------------------------------------------------

    fn start_copy(&self, allocation: &mut RoutingAllocation<'_>, report: &StartedShard) {
        let shard_id = &report.shard_id;
        let Some(position) = allocation.position_of(shard_id, report.allocation_id) else {
            event!(Level::DEBUG, shard = %shard_id, allocation_id = %report.allocation_id, "ignoring start report for unknown copy");
            return;
        };
        let copy = allocation.copies(shard_id)[position].clone();
        if !copy.initializing() || !copy.is_on_node(&report.node_id) {
            event!(Level::DEBUG, shard = %shard_id, state = %copy.state(), "ignoring stale start report");
            return;
        }

        event!(Level::INFO, shard = %shard_id, node = %report.node_id, primary = copy.primary(), "shard copy started");
        allocation.replace(shard_id, position, copy.move_to_started());
        allocation.add_in_sync(shard_id, report.allocation_id);

        if copy.is_relocation_target() {
            let source = allocation
                .copies(shard_id)
                .iter()
                .position(|candidate| copy.is_relocation_target_of(candidate));
            if let Some(source) = source {
                allocation.remove(shard_id, source);
            }
        }
    }

    fn fail_copy(&self, allocation: &mut RoutingAllocation<'_>, failure: CopyFailure<'_>) {
        let shard_id = failure.shard_id;
        let Some(position) = allocation.position_of(shard_id, failure.allocation_id) else {
            return;
        };
        let copy = allocation.copies(shard_id)[position].clone();

        event!(
            Level::WARN,
            shard = %shard_id,
            primary = copy.primary(),
            state = %copy.state(),
            reason = %failure.reason,
            details = failure.message,
            "failing shard copy"
        );

        if failure.mark_as_stale {
            allocation.remove_in_sync(shard_id, failure.allocation_id);
        }

        if copy.is_relocation_target() {
            allocation.remove(shard_id, position);
            let source = allocation
                .copies(shard_id)
                .iter()
                .position(|candidate| copy.is_relocation_target_of(candidate));
            if let Some(source) = source {
                let mut restored = allocation.copies(shard_id)[source].cancel_relocation();
                // Losing the target node is not a failed attempt.
                if failure.reason != UnassignedReason::NodeLeft {
                    let info = failure_info(&restored, UnassignedReason::RelocationFailed, failure.message);
                    restored = restored.with_unassigned_info(info);
                }
                allocation.replace(shard_id, source, restored);
            }
            if copy.primary() {
                allocation.bump_primary_term(shard_id);
            }
            return;
        }

        if copy.relocating() {
            let target = allocation
                .copies(shard_id)
                .iter()
                .position(|candidate| candidate.is_relocation_target_of(&copy));
            if let Some(target) = target {
                allocation.remove(shard_id, target);
            }
        }

        let Some(position) = allocation.position_of(shard_id, failure.allocation_id) else {
            return;
        };
        let info = failure_info(&copy, failure.reason, failure.message);

        if !copy.primary() {
            allocation.replace(shard_id, position, copy.move_to_unassigned(info));
            return;
        }

        allocation.bump_primary_term(shard_id);
        allocation.replace(shard_id, position, copy.move_to_unassigned(info));
        fail_initializing_replicas(allocation, shard_id);
        if !promote_replica(allocation, shard_id) {
            event!(Level::WARN, shard = %shard_id, "no active replica to promote");
        }
    }
}

/// Data nodes ordered by the copies they hold, then by id.
fn candidate_nodes(allocation: &RoutingAllocation<'_>) -> Vec<NodeId> {
    let mut candidates: Vec<(usize, NodeId)> = allocation
        .nodes()
        .data_nodes()
        .map(|node| (allocation.node_shard_count(node.id()), node.id().clone()))
        .collect();
    candidates.sort();
    candidates.into_iter().map(|(_, node_id)| node_id).collect()
}

/// Unassigned info for a copy that just failed. Node loss is not counted as
/// a failed allocation attempt.
fn failure_info(copy: &ShardRouting, reason: UnassignedReason, message: &str) -> UnassignedInfo {
    let previous = copy
        .unassigned_info()
        .map(UnassignedInfo::failed_allocations)
        .unwrap_or(0);
    let failed_allocations = if reason == UnassignedReason::NodeLeft {
        previous
    } else {
        previous.saturating_add(1)
    };
    UnassignedInfo::new(reason, Some(message.to_string())).with_failed_allocations(failed_allocations)
}

/// Replicas recovering from a failed primary cannot finish.
fn fail_initializing_replicas(allocation: &mut RoutingAllocation<'_>, shard_id: &ShardId) {
    loop {
        let Some(position) = allocation
            .copies(shard_id)
            .iter()
            .position(|copy| copy.initializing() && !copy.primary())
        else {
            return;
        };
        let copy = allocation.copies(shard_id)[position].clone();
        if copy.is_relocation_target() {
            allocation.remove(shard_id, position);
            let source = allocation
                .copies(shard_id)
                .iter()
                .position(|candidate| copy.is_relocation_target_of(candidate));
            if let Some(source) = source {
                let restored = allocation.copies(shard_id)[source].cancel_relocation();
                allocation.replace(shard_id, source, restored);
            }
        } else {
            let info = UnassignedInfo::new(
                UnassignedReason::PrimaryFailed,
                Some("primary failed while replica initializing".to_string()),
            );
            allocation.replace(shard_id, position, copy.move_to_unassigned(info));
        }
    }
}

/// Turns the first active replica (by node id) on a live node into the
/// primary and demotes the unassigned primary to a replica. Returns false if
/// there was no such replica; the primary then stays unassigned.
fn promote_replica(allocation: &mut RoutingAllocation<'_>, shard_id: &ShardId) -> bool {
    let candidate = allocation
        .copies(shard_id)
        .iter()
        .enumerate()
        .filter(|(_, copy)| !copy.primary() && copy.active())
        .filter(|(_, copy)| {
            copy.current_node_id()
                .is_some_and(|node_id| allocation.nodes().contains(node_id))
        })
        .min_by(|a, b| a.1.current_node_id().cmp(&b.1.current_node_id()))
        .map(|(position, copy)| (position, copy.clone()));
    let Some((position, replica)) = candidate else {
        return false;
    };

    let old_primary = allocation
        .copies(shard_id)
        .iter()
        .position(|copy| copy.primary() && !copy.is_relocation_target());
    if let Some(old_primary) = old_primary {
        let demoted = allocation.copies(shard_id)[old_primary].move_to_replica();
        allocation.replace(shard_id, old_primary, demoted);
    }

    event!(
        Level::INFO,
        shard = %shard_id,
        node = ?replica.current_node_id(),
        "promoting replica to primary"
    );
    allocation.replace(shard_id, position, replica.move_to_primary());

    if replica.relocating() {
        let target = allocation
            .copies(shard_id)
            .iter()
            .position(|copy| copy.is_relocation_target_of(&replica));
        if let Some(target) = target {
            let promoted = allocation.copies(shard_id)[target].move_to_primary();
            allocation.replace(shard_id, target, promoted);
        }
    }
    true
}
