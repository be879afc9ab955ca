// ============================================================================
// Routing Module
// ============================================================================
//
// Immutable description of where each shard copy lives and what state it is
// in. Only the allocation engine produces new routing tables.
//
// ============================================================================

pub mod shard_routing;
pub mod table;
pub mod unassigned;

pub use shard_routing::{ShardRouting, ShardRoutingState};
pub use table::{IndexRoutingTable, IndexShardRoutingTable, RoutingTable, RoutingTableBuilder};
pub use unassigned::{AllocationStatus, UnassignedInfo, UnassignedReason};
