pub mod index_metadata;

pub use index_metadata::{DEFAULT_PRIMARY_TERM, IndexMetadata, IndexMetadataBuilder, IndexSettings};

use crate::core::{ClusterError, Result, ShardId};
use serde::{Deserialize, Serialize};

/// Metadata of every index in the cluster.
///
/// Cloning is cheap: indices live in a persistent map, so a builder only
/// copies the entries it replaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Metadata {
    version: u64,
    indices: im::OrdMap<String, IndexMetadata>,
}

impl Metadata {
    pub fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    pub fn builder_from(metadata: &Metadata) -> MetadataBuilder {
        MetadataBuilder {
            version: metadata.version,
            indices: metadata.indices.clone(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn index(&self, name: &str) -> Option<&IndexMetadata> {
        self.indices.get(name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn indices(&self) -> impl Iterator<Item = &IndexMetadata> {
        self.indices.values()
    }

    /// Current primary term of `shard` in `index`.
    pub fn primary_term(&self, index: &str, shard: u32) -> Result<u64> {
        let metadata = self
            .indices
            .get(index)
            .ok_or_else(|| ClusterError::IndexNotFound(index.to_string()))?;
        metadata
            .primary_term(shard)
            .ok_or_else(|| ClusterError::ShardNotFound(ShardId::new(index, shard)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataBuilder {
    version: u64,
    indices: im::OrdMap<String, IndexMetadata>,
}

impl MetadataBuilder {
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn put(mut self, index: IndexMetadata) -> Self {
        self.indices.insert(index.index().to_string(), index);
        self
    }

    pub fn remove(mut self, index: &str) -> Self {
        self.indices.remove(index);
        self
    }

    pub fn build(self) -> Metadata {
        Metadata {
            version: self.version,
            indices: self.indices,
        }
    }
}
