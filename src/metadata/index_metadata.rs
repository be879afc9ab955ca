use crate::core::{AllocationId, ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Primary term given to every shard of a new index unless overridden.
pub const DEFAULT_PRIMARY_TERM: u64 = 1;

/// Per-index allocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexSettings {
    /// Upper bound on copies of this index held by a single node.
    #[serde(default)]
    pub total_shards_per_node: Option<u32>,
}

/// Settings of one index plus its per-shard primary terms.
///
/// Shard and replica counts are fixed at creation. Primary terms only move
/// forward and only through [`IndexMetadataBuilder::increment_primary_term`],
/// which the allocation engine calls when a primary fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    index: String,
    version: u64,
    number_of_shards: u32,
    number_of_replicas: u32,
    primary_terms: Vec<u64>,
    in_sync_allocation_ids: BTreeMap<u32, BTreeSet<AllocationId>>,
    settings: IndexSettings,
}

impl IndexMetadata {
    pub fn builder(index: impl Into<String>) -> IndexMetadataBuilder {
        IndexMetadataBuilder {
            index: index.into(),
            version: 1,
            number_of_shards: 1,
            number_of_replicas: 0,
            primary_terms: BTreeMap::new(),
            in_sync_allocation_ids: BTreeMap::new(),
            settings: IndexSettings::default(),
        }
    }

    pub fn builder_from(metadata: &IndexMetadata) -> IndexMetadataBuilder {
        IndexMetadataBuilder {
            index: metadata.index.clone(),
            version: metadata.version,
            number_of_shards: metadata.number_of_shards,
            number_of_replicas: metadata.number_of_replicas,
            primary_terms: metadata
                .primary_terms
                .iter()
                .enumerate()
                .map(|(shard, term)| (shard as u32, *term))
                .collect(),
            in_sync_allocation_ids: metadata.in_sync_allocation_ids.clone(),
            settings: metadata.settings.clone(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn number_of_shards(&self) -> u32 {
        self.number_of_shards
    }

    pub fn number_of_replicas(&self) -> u32 {
        self.number_of_replicas
    }

    /// Copies per shard: the primary plus its replicas.
    pub fn copies_per_shard(&self) -> u32 {
        1 + self.number_of_replicas
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn primary_term(&self, shard: u32) -> Option<u64> {
        self.primary_terms.get(shard as usize).copied()
    }

    pub fn primary_terms(&self) -> &[u64] {
        &self.primary_terms
    }

    /// Allocation ids of copies known to hold every acknowledged write.
    pub fn in_sync_allocation_ids(&self, shard: u32) -> BTreeSet<AllocationId> {
        self.in_sync_allocation_ids
            .get(&shard)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct IndexMetadataBuilder {
    index: String,
    version: u64,
    number_of_shards: u32,
    number_of_replicas: u32,
    primary_terms: BTreeMap<u32, u64>,
    in_sync_allocation_ids: BTreeMap<u32, BTreeSet<AllocationId>>,
    settings: IndexSettings,
}

impl IndexMetadataBuilder {
    pub fn number_of_shards(mut self, shards: u32) -> Self {
        self.number_of_shards = shards;
        self
    }

    pub fn number_of_replicas(mut self, replicas: u32) -> Self {
        self.number_of_replicas = replicas;
        self
    }

    pub fn settings(mut self, settings: IndexSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Seeds the primary term of `shard`.
    pub fn primary_term(mut self, shard: u32, term: u64) -> Self {
        self.primary_terms.insert(shard, term);
        self
    }

    pub fn current_primary_term(&self, shard: u32) -> u64 {
        self.primary_terms
            .get(&shard)
            .copied()
            .unwrap_or(DEFAULT_PRIMARY_TERM)
    }

    pub fn increment_primary_term(mut self, shard: u32) -> Self {
        let next = self.current_primary_term(shard).saturating_add(1);
        self.primary_terms.insert(shard, next);
        self
    }

    pub fn in_sync_allocation_ids(mut self, shard: u32, ids: BTreeSet<AllocationId>) -> Self {
        if ids.is_empty() {
            self.in_sync_allocation_ids.remove(&shard);
        } else {
            self.in_sync_allocation_ids.insert(shard, ids);
        }
        self
    }

    pub fn build(self) -> Result<IndexMetadata> {
        if self.index.trim().is_empty() {
            return Err(ClusterError::Validation(
                "index name must not be empty".to_string(),
            ));
        }
        if self.number_of_shards == 0 {
            return Err(ClusterError::Validation(format!(
                "index '{}' must have at least one shard",
                self.index
            )));
        }
        if let Some((shard, _)) = self
            .primary_terms
            .iter()
            .find(|(shard, _)| **shard >= self.number_of_shards)
        {
            return Err(ClusterError::Validation(format!(
                "primary term given for shard {} but index '{}' has {} shards",
                shard, self.index, self.number_of_shards
            )));
        }
        if let Some(shard) = self
            .in_sync_allocation_ids
            .keys()
            .find(|shard| **shard >= self.number_of_shards)
        {
            return Err(ClusterError::Validation(format!(
                "in-sync allocations given for shard {} but index '{}' has {} shards",
                shard, self.index, self.number_of_shards
            )));
        }

        let primary_terms = (0..self.number_of_shards)
            .map(|shard| self.current_primary_term(shard))
            .collect();

        Ok(IndexMetadata {
            index: self.index,
            version: self.version,
            number_of_shards: self.number_of_shards,
            number_of_replicas: self.number_of_replicas,
            primary_terms,
            in_sync_allocation_ids: self.in_sync_allocation_ids,
            settings: self.settings,
        })
    }
}
