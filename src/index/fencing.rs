use crate::cluster::ClusterState;
use crate::core::{AllocationId, ClusterError, NodeId, Result, ShardId};
use serde::{Deserialize, Serialize};
use tracing::{Level, event};

/// Where writes for a shard go, and the term they must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryRoute {
    pub shard_id: ShardId,
    pub node_id: NodeId,
    pub allocation_id: AllocationId,
    pub primary_term: u64,
}

impl PrimaryRoute {
    /// Checks a request against this route's term.
    pub fn ensure_current(&self, request_term: u64) -> Result<()> {
        if is_stale_term(self.primary_term, request_term) {
            return Err(ClusterError::StalePrimaryTerm {
                shard_id: self.shard_id.clone(),
                request_term,
                current_term: self.primary_term,
            });
        }
        Ok(())
    }
}

pub fn is_stale_term(current_term: u64, request_term: u64) -> bool {
    request_term < current_term
}

/// Rejects an operation stamped with a primary term older than the shard's
/// current one. Returns the current term otherwise.
///
/// A term newer than the local state is accepted: the caller has simply seen
/// a later cluster state than this node.
pub fn ensure_primary_term(state: &ClusterState, shard_id: &ShardId, request_term: u64) -> Result<u64> {
    let current_term = state.primary_term(shard_id)?;
    if is_stale_term(current_term, request_term) {
        event!(
            Level::DEBUG,
            shard = %shard_id,
            request_term,
            current_term,
            "rejecting operation from stale primary"
        );
        return Err(ClusterError::StalePrimaryTerm {
            shard_id: shard_id.clone(),
            request_term,
            current_term,
        });
    }
    Ok(current_term)
}
