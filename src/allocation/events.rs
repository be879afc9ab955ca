use crate::core::{AllocationId, NodeId, ShardId};
use crate::routing::ShardRouting;
use serde::{Deserialize, Serialize};

/// A data node reporting that a copy finished recovering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedShard {
    pub shard_id: ShardId,
    pub node_id: NodeId,
    pub allocation_id: AllocationId,
}

impl StartedShard {
    /// Builds the report for an assigned routing entry.
    pub fn from_routing(routing: &ShardRouting) -> Option<Self> {
        Some(Self {
            shard_id: routing.shard_id().clone(),
            node_id: routing.current_node_id()?.clone(),
            allocation_id: routing.allocation_id()?,
        })
    }
}

/// A data node (or the coordinator on node loss) reporting a failed copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedShard {
    pub shard_id: ShardId,
    pub node_id: NodeId,
    pub allocation_id: AllocationId,
    pub message: String,
    /// Drop the copy from the in-sync set: it may have missed writes.
    #[serde(default)]
    pub mark_as_stale: bool,
}

impl FailedShard {
    pub fn from_routing(
        routing: &ShardRouting,
        message: impl Into<String>,
        mark_as_stale: bool,
    ) -> Option<Self> {
        Some(Self {
            shard_id: routing.shard_id().clone(),
            node_id: routing.current_node_id()?.clone(),
            allocation_id: routing.allocation_id()?,
            message: message.into(),
            mark_as_stale,
        })
    }
}
