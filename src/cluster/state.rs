// ============================================================================
// Cluster State
// ============================================================================
//
// Immutable, versioned snapshot of nodes, index metadata and routing.
// Every accepted mutation yields a new instance with version = previous + 1;
// the routing table and metadata carry their own versions that move only when
// that part changed. Snapshots are shared behind `Arc` and never mutated.
//
// ============================================================================

use super::{ClusterStateHealth, DiscoveryNodes};
use crate::core::{Result, ShardId};
use crate::index::PrimaryRoute;
use crate::metadata::Metadata;
use crate::routing::RoutingTable;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLUSTER_NAME: &str = "shardkeeper";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    cluster_name: String,
    version: u64,
    nodes: DiscoveryNodes,
    metadata: Metadata,
    routing_table: RoutingTable,
}

impl ClusterState {
    pub fn builder(cluster_name: impl Into<String>) -> ClusterStateBuilder {
        ClusterStateBuilder {
            cluster_name: cluster_name.into(),
            version: 0,
            nodes: DiscoveryNodes::default(),
            metadata: Metadata::default(),
            routing_table: RoutingTable::default(),
        }
    }

    pub fn builder_from(state: &ClusterState) -> ClusterStateBuilder {
        ClusterStateBuilder {
            cluster_name: state.cluster_name.clone(),
            version: state.version,
            nodes: state.nodes.clone(),
            metadata: state.metadata.clone(),
            routing_table: state.routing_table.clone(),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn nodes(&self) -> &DiscoveryNodes {
        &self.nodes
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn health(&self) -> ClusterStateHealth {
        ClusterStateHealth::new(self)
    }

    /// Current primary term of a shard.
    pub fn primary_term(&self, shard_id: &ShardId) -> Result<u64> {
        self.metadata.primary_term(shard_id.index(), shard_id.id())
    }

    /// Where the write path should send operations for `shard_id`, or `None`
    /// while the shard has no active primary.
    pub fn primary_route(&self, shard_id: &ShardId) -> Result<Option<PrimaryRoute>> {
        let primary_term = self.primary_term(shard_id)?;
        let route = self
            .routing_table
            .primary_shard(shard_id)?
            .filter(|primary| primary.active())
            .and_then(|primary| {
                Some(PrimaryRoute {
                    shard_id: shard_id.clone(),
                    node_id: primary.current_node_id()?.clone(),
                    allocation_id: primary.allocation_id()?,
                    primary_term,
                })
            });
        Ok(route)
    }
}

#[derive(Debug, Clone)]
pub struct ClusterStateBuilder {
    cluster_name: String,
    version: u64,
    nodes: DiscoveryNodes,
    metadata: Metadata,
    routing_table: RoutingTable,
}

impl ClusterStateBuilder {
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn increment_version(mut self) -> Self {
        self.version += 1;
        self
    }

    pub fn nodes(mut self, nodes: DiscoveryNodes) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn routing_table(mut self, routing_table: RoutingTable) -> Self {
        self.routing_table = routing_table;
        self
    }

    pub fn build(self) -> ClusterState {
        ClusterState {
            cluster_name: self.cluster_name,
            version: self.version,
            nodes: self.nodes,
            metadata: self.metadata,
            routing_table: self.routing_table,
        }
    }
}
