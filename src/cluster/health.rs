use super::ClusterState;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterHealthStatus {
    Green,
    Yellow,
    Red,
}

impl fmt::Display for ClusterHealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        };
        write!(f, "{label}")
    }
}

/// Shard counters derived from a cluster state.
///
/// Relocation targets are not counted on their own; their source is counted
/// as active and relocating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStateHealth {
    pub status: ClusterHealthStatus,
    pub active_primary_shards: usize,
    pub active_shards: usize,
    pub initializing_shards: usize,
    pub relocating_shards: usize,
    pub unassigned_shards: usize,
}

impl ClusterStateHealth {
    pub fn new(state: &ClusterState) -> Self {
        let mut health = Self {
            status: ClusterHealthStatus::Green,
            active_primary_shards: 0,
            active_shards: 0,
            initializing_shards: 0,
            relocating_shards: 0,
            unassigned_shards: 0,
        };

        for shard in state
            .routing_table()
            .all_shards()
            .filter(|shard| !shard.is_relocation_target())
        {
            if shard.active() {
                health.active_shards += 1;
                if shard.primary() {
                    health.active_primary_shards += 1;
                }
                if shard.relocating() {
                    health.relocating_shards += 1;
                }
            } else if shard.initializing() {
                health.initializing_shards += 1;
            } else {
                health.unassigned_shards += 1;
            }

            let shard_status = match (shard.active(), shard.primary()) {
                (true, _) => ClusterHealthStatus::Green,
                (false, true) => ClusterHealthStatus::Red,
                (false, false) => ClusterHealthStatus::Yellow,
            };
            health.status = health.status.max(shard_status);
        }

        health
    }
}

impl fmt::Display for ClusterStateHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status [{}], active primaries [{}], active [{}], initializing [{}], relocating [{}], unassigned [{}]",
            self.status,
            self.active_primary_shards,
            self.active_shards,
            self.initializing_shards,
            self.relocating_shards,
            self.unassigned_shards
        )
    }
}
