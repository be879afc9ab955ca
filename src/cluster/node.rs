use crate::core::{ClusterError, NodeId, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Node attribute capping how many shard copies the node will hold.
pub const MAX_SHARDS_ATTRIBUTE: &str = "max_shards";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryNodeRole {
    ClusterManager,
    Data,
}

fn default_roles() -> BTreeSet<DiscoveryNodeRole> {
    [DiscoveryNodeRole::ClusterManager, DiscoveryNodeRole::Data]
        .into_iter()
        .collect()
}

/// A member of the cluster as seen by the allocation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    id: NodeId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default = "default_roles")]
    roles: BTreeSet<DiscoveryNodeRole>,
}

impl DiscoveryNode {
    /// Creates a node holding both the cluster-manager and data roles.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            attributes: BTreeMap::new(),
            roles: default_roles(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = DiscoveryNodeRole>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn is_data_node(&self) -> bool {
        self.roles.contains(&DiscoveryNodeRole::Data)
    }

    pub fn is_cluster_manager_eligible(&self) -> bool {
        self.roles.contains(&DiscoveryNodeRole::ClusterManager)
    }

    /// Capacity advertised through the `max_shards` attribute.
    pub fn max_shards(&self) -> Result<Option<u32>> {
        match self.attribute(MAX_SHARDS_ATTRIBUTE) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<u32>().map(Some).map_err(|_| {
                ClusterError::Validation(format!(
                    "node '{}' has invalid {} attribute '{}'",
                    self.id, MAX_SHARDS_ATTRIBUTE, raw
                ))
            }),
        }
    }
}

/// The set of live nodes, keyed and iterated by node id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiscoveryNodes {
    nodes: BTreeMap<NodeId, DiscoveryNode>,
    cluster_manager_node_id: Option<NodeId>,
}

impl DiscoveryNodes {
    pub fn builder() -> DiscoveryNodesBuilder {
        DiscoveryNodesBuilder::default()
    }

    pub fn builder_from(nodes: &DiscoveryNodes) -> DiscoveryNodesBuilder {
        DiscoveryNodesBuilder {
            nodes: nodes.nodes.clone(),
            cluster_manager_node_id: nodes.cluster_manager_node_id.clone(),
        }
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&DiscoveryNode> {
        self.nodes.get(node_id)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values()
    }

    pub fn data_nodes(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values().filter(|node| node.is_data_node())
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn cluster_manager_node_id(&self) -> Option<&NodeId> {
        self.cluster_manager_node_id.as_ref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryNodesBuilder {
    nodes: BTreeMap<NodeId, DiscoveryNode>,
    cluster_manager_node_id: Option<NodeId>,
}

impl DiscoveryNodesBuilder {
    /// Adds or replaces a node.
    pub fn add(mut self, node: DiscoveryNode) -> Self {
        self.nodes.insert(node.id().clone(), node);
        self
    }

    pub fn remove(mut self, node_id: &NodeId) -> Self {
        self.nodes.remove(node_id);
        if self.cluster_manager_node_id.as_ref() == Some(node_id) {
            self.cluster_manager_node_id = None;
        }
        self
    }

    pub fn cluster_manager(mut self, node_id: impl Into<NodeId>) -> Self {
        self.cluster_manager_node_id = Some(node_id.into());
        self
    }

    pub fn build(self) -> Result<DiscoveryNodes> {
        for (id, node) in &self.nodes {
            if id.is_blank() {
                return Err(ClusterError::Validation(
                    "node id must not be empty".to_string(),
                ));
            }
            node.max_shards()?;
        }
        if let Some(manager) = &self.cluster_manager_node_id {
            if !self.nodes.contains_key(manager) {
                return Err(ClusterError::Validation(format!(
                    "cluster manager '{}' is not part of the node set",
                    manager
                )));
            }
        }
        Ok(DiscoveryNodes {
            nodes: self.nodes,
            cluster_manager_node_id: self.cluster_manager_node_id,
        })
    }
}
