use super::{ShardRouting, ShardRoutingState, UnassignedInfo, UnassignedReason};
use crate::core::{AllocationId, ClusterError, NodeId, Result, ShardId};
use crate::metadata::IndexMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All copies of a single shard, primary first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShardRoutingTable {
    shard_id: ShardId,
    shards: Vec<ShardRouting>,
}

impl IndexShardRoutingTable {
    pub fn new(shard_id: ShardId, mut shards: Vec<ShardRouting>) -> Self {
        // Stable: replicas keep their relative order.
        shards.sort_by_key(|shard| !(shard.primary() && !shard.is_relocation_target()));
        Self { shard_id, shards }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn shards(&self) -> &[ShardRouting] {
        &self.shards
    }

    pub fn size(&self) -> usize {
        self.shards.len()
    }

    /// The primary copy, excluding the target half of a primary relocation.
    pub fn primary_shard(&self) -> Option<&ShardRouting> {
        self.shards
            .iter()
            .find(|shard| shard.primary() && !shard.is_relocation_target())
    }

    pub fn replica_shards(&self) -> Vec<&ShardRouting> {
        self.shards.iter().filter(|shard| !shard.primary()).collect()
    }

    pub fn active_shards(&self) -> Vec<&ShardRouting> {
        self.shards.iter().filter(|shard| shard.active()).collect()
    }

    pub fn assigned_shards(&self) -> Vec<&ShardRouting> {
        self.shards.iter().filter(|shard| shard.assigned()).collect()
    }

    pub fn shards_with_state(&self, state: ShardRoutingState) -> Vec<&ShardRouting> {
        self.shards
            .iter()
            .filter(|shard| shard.state() == state)
            .collect()
    }

    pub fn get_by_allocation_id(&self, allocation_id: AllocationId) -> Option<&ShardRouting> {
        self.shards
            .iter()
            .find(|shard| shard.allocation_id() == Some(allocation_id))
    }

    pub fn copy_on_node(&self, node_id: &NodeId) -> Option<&ShardRouting> {
        self.shards.iter().find(|shard| shard.is_on_node(node_id))
    }

    /// True when every copy is started or relocating.
    pub fn all_active(&self) -> bool {
        self.shards
            .iter()
            .filter(|shard| !shard.is_relocation_target())
            .all(ShardRouting::active)
    }
}

/// Routing for every shard of one index, keyed by shard number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRoutingTable {
    index: String,
    shards: BTreeMap<u32, IndexShardRoutingTable>,
}

impl IndexRoutingTable {
    /// Builds the routing of a freshly created index: every copy unassigned.
    pub fn initialize_as_new(metadata: &IndexMetadata) -> Self {
        let mut shards = BTreeMap::new();
        for shard in 0..metadata.number_of_shards() {
            let shard_id = ShardId::new(metadata.index(), shard);
            let info = || UnassignedInfo::new(UnassignedReason::IndexCreated, None);
            let mut copies = Vec::with_capacity(1 + metadata.number_of_replicas() as usize);
            copies.push(ShardRouting::new_unassigned(shard_id.clone(), true, info()));
            for _ in 0..metadata.number_of_replicas() {
                copies.push(ShardRouting::new_unassigned(shard_id.clone(), false, info()));
            }
            shards.insert(shard, IndexShardRoutingTable::new(shard_id, copies));
        }
        Self {
            index: metadata.index().to_string(),
            shards,
        }
    }

    pub fn from_shards(index: impl Into<String>, shards: Vec<IndexShardRoutingTable>) -> Self {
        Self {
            index: index.into(),
            shards: shards
                .into_iter()
                .map(|table| (table.shard_id().id(), table))
                .collect(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn shard(&self, id: u32) -> Option<&IndexShardRoutingTable> {
        self.shards.get(&id)
    }

    pub fn shards(&self) -> impl Iterator<Item = &IndexShardRoutingTable> {
        self.shards.values()
    }

    pub fn number_of_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn all_active(&self) -> bool {
        self.shards.values().all(IndexShardRoutingTable::all_active)
    }

    pub fn shards_with_state(&self, state: ShardRoutingState) -> Vec<ShardRouting> {
        self.shards
            .values()
            .flat_map(|table| table.shards_with_state(state))
            .cloned()
            .collect()
    }
}

/// Where every copy of every shard lives. Immutable; see [`RoutingTableBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RoutingTable {
    version: u64,
    indices: im::OrdMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder::default()
    }

    pub fn builder_from(table: &RoutingTable) -> RoutingTableBuilder {
        RoutingTableBuilder {
            version: table.version,
            indices: table.indices.clone(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn index(&self, name: &str) -> Option<&IndexRoutingTable> {
        self.indices.get(name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn indices(&self) -> impl Iterator<Item = &IndexRoutingTable> {
        self.indices.values()
    }

    pub fn shard_routing_table(&self, shard_id: &ShardId) -> Result<&IndexShardRoutingTable> {
        let index = self
            .indices
            .get(shard_id.index())
            .ok_or_else(|| ClusterError::IndexNotFound(shard_id.index().to_string()))?;
        index
            .shard(shard_id.id())
            .ok_or_else(|| ClusterError::ShardNotFound(shard_id.clone()))
    }

    pub fn primary_shard(&self, shard_id: &ShardId) -> Result<Option<&ShardRouting>> {
        Ok(self.shard_routing_table(shard_id)?.primary_shard())
    }

    pub fn all_shards(&self) -> impl Iterator<Item = &ShardRouting> {
        self.indices
            .values()
            .flat_map(|index| index.shards())
            .flat_map(|table| table.shards().iter())
    }

    pub fn shards_with_state(&self, state: ShardRoutingState) -> Vec<ShardRouting> {
        self.all_shards()
            .filter(|shard| shard.state() == state)
            .cloned()
            .collect()
    }

    pub fn shards_on_node(&self, node_id: &NodeId) -> Vec<ShardRouting> {
        self.all_shards()
            .filter(|shard| shard.is_on_node(node_id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTableBuilder {
    version: u64,
    indices: im::OrdMap<String, IndexRoutingTable>,
}

impl RoutingTableBuilder {
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn add(mut self, index: IndexRoutingTable) -> Self {
        self.indices.insert(index.index().to_string(), index);
        self
    }

    pub fn add_as_new(self, metadata: &IndexMetadata) -> Self {
        self.add(IndexRoutingTable::initialize_as_new(metadata))
    }

    pub fn remove(mut self, index: &str) -> Self {
        self.indices.remove(index);
        self
    }

    pub fn build(self) -> RoutingTable {
        RoutingTable {
            version: self.version,
            indices: self.indices,
        }
    }
}
