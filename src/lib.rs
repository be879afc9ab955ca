// ============================================================================
// Shardkeeper Library
// ============================================================================
//
// Consistency core of a sharded document store: where each shard copy lives,
// which copy is the primary, the primary term that fences out stale
// primaries, and per-document optimistic version checks.
//
// ============================================================================

pub mod allocation;
pub mod cluster;
pub mod core;
pub mod index;
pub mod metadata;
pub mod routing;

pub use crate::allocation::{
    AllocationDecider, AllocationDeciders, AllocationService, AllocationSettings, Decision,
    DecisionType, FailedShard, RoutingAllocation, StartedShard,
};
pub use crate::cluster::{
    ClusterCoordinator, ClusterHealthStatus, ClusterState, ClusterStateHealth, ClusterTask,
    CoordinatorHandle, DiscoveryNode, DiscoveryNodeRole, DiscoveryNodes,
};
pub use crate::core::{AllocationId, ClusterError, ErrorKind, NodeId, Result, ShardId};
pub use crate::index::{PrimaryRoute, VersionDecision, VersionType, ensure_primary_term, versions};
pub use crate::metadata::{IndexMetadata, IndexSettings, Metadata};
pub use crate::routing::{
    AllocationStatus, RoutingTable, ShardRouting, ShardRoutingState, UnassignedInfo,
    UnassignedReason,
};
