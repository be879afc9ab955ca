// ============================================================================
// Cluster Module
// ============================================================================
//
// The cluster state snapshot, its node set, derived health, and the single
// writer that evolves it.
//
// ============================================================================

pub mod coordinator;
pub mod health;
pub mod node;
pub mod state;

pub use coordinator::{ClusterCoordinator, ClusterTask, CoordinatorHandle};
pub use health::{ClusterHealthStatus, ClusterStateHealth};
pub use node::{
    DiscoveryNode, DiscoveryNodeRole, DiscoveryNodes, DiscoveryNodesBuilder, MAX_SHARDS_ATTRIBUTE,
};
pub use state::{ClusterState, ClusterStateBuilder, DEFAULT_CLUSTER_NAME};
