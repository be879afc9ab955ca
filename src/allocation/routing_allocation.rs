// ============================================================================
// Routing Allocation
// ============================================================================
//
// Mutable scratch copy of the routing of one cluster state. The allocation
// service edits it in place while handling a single request; deciders read
// it. When the request is done the scratch copy is turned back into a new
// routing table and metadata, each only if something actually changed.
//
// Primary term bumps are collected in a set so a shard named by several
// failure reports in one request still moves forward by exactly one.
//
// ============================================================================

use super::AllocationSettings;
use crate::cluster::{ClusterState, DiscoveryNodes};
use crate::core::{AllocationId, NodeId, Result, ShardId};
use crate::metadata::{IndexMetadata, Metadata};
use crate::routing::{IndexRoutingTable, IndexShardRoutingTable, RoutingTable, ShardRouting};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{Level, event};

pub struct RoutingAllocation<'a> {
    state: &'a ClusterState,
    settings: &'a AllocationSettings,
    shards: BTreeMap<ShardId, Vec<ShardRouting>>,
    in_sync: BTreeMap<ShardId, BTreeSet<AllocationId>>,
    terms_to_bump: BTreeSet<ShardId>,
    seed: u64,
}

impl<'a> RoutingAllocation<'a> {
    pub fn new(state: &'a ClusterState, settings: &'a AllocationSettings) -> Self {
        let mut shards = BTreeMap::new();
        let mut in_sync = BTreeMap::new();
        for index in state.routing_table().indices() {
            let metadata = state.metadata().index(index.index());
            for table in index.shards() {
                let shard_id = table.shard_id().clone();
                let ids = metadata
                    .map(|metadata| metadata.in_sync_allocation_ids(shard_id.id()))
                    .unwrap_or_default();
                in_sync.insert(shard_id.clone(), ids);
                shards.insert(shard_id, table.shards().to_vec());
            }
        }

        Self {
            state,
            settings,
            shards,
            in_sync,
            terms_to_bump: BTreeSet::new(),
            seed: state.version() + 1,
        }
    }

    // --- read side, used by deciders and the balancer ---

    pub fn state(&self) -> &ClusterState {
        self.state
    }

    pub fn nodes(&self) -> &DiscoveryNodes {
        self.state.nodes()
    }

    pub fn metadata(&self) -> &Metadata {
        self.state.metadata()
    }

    pub fn settings(&self) -> &AllocationSettings {
        self.settings
    }

    pub fn index_metadata(&self, shard_id: &ShardId) -> Option<&IndexMetadata> {
        self.state.metadata().index(shard_id.index())
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.shards.keys().cloned().collect()
    }

    pub fn copies(&self, shard_id: &ShardId) -> &[ShardRouting] {
        self.shards
            .get(shard_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn all_copies(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.values().flatten()
    }

    /// The primary of a shard, not counting the target of a primary relocation.
    pub fn primary_of(&self, shard_id: &ShardId) -> Option<&ShardRouting> {
        self.copies(shard_id)
            .iter()
            .find(|copy| copy.primary() && !copy.is_relocation_target())
    }

    pub fn find_by_allocation_id(
        &self,
        shard_id: &ShardId,
        allocation_id: AllocationId,
    ) -> Option<&ShardRouting> {
        self.copies(shard_id)
            .iter()
            .find(|copy| copy.allocation_id() == Some(allocation_id))
    }

    pub fn copies_on_node<'s>(&'s self, node_id: &'s NodeId) -> impl Iterator<Item = &'s ShardRouting> {
        self.all_copies().filter(move |copy| copy.is_on_node(node_id))
    }

    /// Copies a node will hold once in-flight relocations finish: relocation
    /// sources are counted on their target instead.
    pub fn node_shard_count(&self, node_id: &NodeId) -> usize {
        self.copies_on_node(node_id)
            .filter(|copy| !copy.relocating())
            .count()
    }

    pub fn node_index_shard_count(&self, node_id: &NodeId, index: &str) -> usize {
        self.copies_on_node(node_id)
            .filter(|copy| !copy.relocating() && copy.shard_id().index() == index)
            .count()
    }

    /// Peer recoveries streaming into a node: initializing replicas and
    /// relocation targets.
    pub fn incoming_recoveries(&self, node_id: &NodeId) -> usize {
        self.copies_on_node(node_id)
            .filter(|copy| copy.initializing() && (!copy.primary() || copy.is_relocation_target()))
            .count()
    }

    /// Fresh primaries initializing on a node.
    pub fn initializing_primaries(&self, node_id: &NodeId) -> usize {
        self.copies_on_node(node_id)
            .filter(|copy| copy.initializing() && copy.primary() && !copy.is_relocation_target())
            .count()
    }

    pub fn relocation_count(&self) -> usize {
        self.all_copies().filter(|copy| copy.relocating()).count()
    }

    /// True when every copy, relocation targets aside, is started or relocating.
    pub fn all_shards_active(&self) -> bool {
        self.all_copies()
            .filter(|copy| !copy.is_relocation_target())
            .all(ShardRouting::active)
    }

    pub fn in_sync_allocation_ids(&self, shard_id: &ShardId) -> Option<&BTreeSet<AllocationId>> {
        self.in_sync.get(shard_id)
    }

    // --- write side, used by the service and the balancer ---

    pub(crate) fn position_of(&self, shard_id: &ShardId, allocation_id: AllocationId) -> Option<usize> {
        self.copies(shard_id)
            .iter()
            .position(|copy| copy.allocation_id() == Some(allocation_id))
    }

    pub(crate) fn replace(&mut self, shard_id: &ShardId, position: usize, copy: ShardRouting) {
        if let Some(slot) = self
            .shards
            .get_mut(shard_id)
            .and_then(|copies| copies.get_mut(position))
        {
            *slot = copy;
        }
    }

    pub(crate) fn push(&mut self, shard_id: &ShardId, copy: ShardRouting) {
        self.shards.entry(shard_id.clone()).or_default().push(copy);
    }

    pub(crate) fn remove(&mut self, shard_id: &ShardId, position: usize) -> Option<ShardRouting> {
        let copies = self.shards.get_mut(shard_id)?;
        (position < copies.len()).then(|| copies.remove(position))
    }

    /// Allocation id for a copy starting on `node_id` in this round.
    pub(crate) fn next_allocation_id(&self, shard_id: &ShardId, node_id: &NodeId, primary: bool) -> AllocationId {
        AllocationId::derive(shard_id, node_id, primary, self.seed)
    }

    /// Schedules a primary term increment. Returns false if the shard
    /// already has one scheduled in this round.
    pub(crate) fn bump_primary_term(&mut self, shard_id: &ShardId) -> bool {
        let first = self.terms_to_bump.insert(shard_id.clone());
        if first {
            event!(Level::INFO, shard = %shard_id, "scheduling primary term increment");
        }
        first
    }

    pub(crate) fn add_in_sync(&mut self, shard_id: &ShardId, allocation_id: AllocationId) {
        self.in_sync
            .entry(shard_id.clone())
            .or_default()
            .insert(allocation_id);
    }

    pub(crate) fn remove_in_sync(&mut self, shard_id: &ShardId, allocation_id: AllocationId) {
        if let Some(ids) = self.in_sync.get_mut(shard_id) {
            ids.remove(&allocation_id);
        }
    }

    // --- results ---

    /// The new routing table, or `None` if no copy changed.
    pub(crate) fn build_routing_table(&self) -> Option<RoutingTable> {
        let old = self.state.routing_table();
        let mut builder = RoutingTable::builder_from(old);
        let mut changed = false;

        for index in old.indices() {
            let tables = index
                .shards()
                .map(|table| {
                    let shard_id = table.shard_id().clone();
                    let copies = self.copies(&shard_id).to_vec();
                    IndexShardRoutingTable::new(shard_id, copies)
                })
                .collect();
            let rebuilt = IndexRoutingTable::from_shards(index.index(), tables);
            if &rebuilt != index {
                changed = true;
                builder = builder.add(rebuilt);
            }
        }

        changed.then(|| builder.version(old.version() + 1).build())
    }

    /// The new metadata, or `None` if no term or in-sync set changed.
    ///
    /// Once every copy of a shard is active the in-sync set shrinks to the
    /// active copies, dropping ids of copies that no longer exist.
    pub(crate) fn build_metadata(&self) -> Result<Option<Metadata>> {
        let old = self.state.metadata();
        let mut builder = Metadata::builder_from(old);
        let mut changed = false;

        for index in old.indices() {
            let mut index_builder = IndexMetadata::builder_from(index);
            let mut index_changed = false;

            for shard in 0..index.number_of_shards() {
                let shard_id = ShardId::new(index.index(), shard);

                if self.terms_to_bump.contains(&shard_id) {
                    index_builder = index_builder.increment_primary_term(shard);
                    index_changed = true;
                    event!(
                        Level::INFO,
                        shard = %shard_id,
                        term = index_builder.current_primary_term(shard),
                        "primary term incremented"
                    );
                }

                let mut ids = self.in_sync.get(&shard_id).cloned().unwrap_or_default();
                let copies = self.copies(&shard_id);
                let fully_active = !copies.is_empty()
                    && copies
                        .iter()
                        .filter(|copy| !copy.is_relocation_target())
                        .all(ShardRouting::active);
                if fully_active {
                    let active: BTreeSet<AllocationId> = copies
                        .iter()
                        .filter(|copy| copy.active())
                        .filter_map(ShardRouting::allocation_id)
                        .collect();
                    ids.retain(|id| active.contains(id));
                }
                if ids != index.in_sync_allocation_ids(shard) {
                    index_builder = index_builder.in_sync_allocation_ids(shard, ids);
                    index_changed = true;
                }
            }

            if index_changed {
                builder = builder.put(index_builder.version(index.version() + 1).build()?);
                changed = true;
            }
        }

        Ok(changed.then(|| builder.version(old.version() + 1).build()))
    }
}
