// ============================================================================
// Shard Routing Entry
// ============================================================================
//
// One copy (primary or replica) of one shard and where it lives.
//
// State transitions:
// ```text
// Unassigned ──initialize──> Initializing ──start──> Started
//                                                      │
//                                   Started <──cancel── Relocating
//                                      └────relocate────┘
// ```
// Any assigned state moves back to Unassigned on failure. A relocation is two
// entries: the source in Relocating and the target in Initializing, each
// pointing at the other's node through `relocating_node_id`.
//
// Entries are values: every transition returns a new entry.
// ============================================================================

use super::UnassignedInfo;
use crate::core::{AllocationId, NodeId, ShardId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardRoutingState {
    Unassigned,
    Initializing,
    Started,
    Relocating,
}

impl ShardRoutingState {
    /// Started and relocating copies serve operations.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started | Self::Relocating)
    }
}

impl fmt::Display for ShardRoutingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unassigned => "UNASSIGNED",
            Self::Initializing => "INITIALIZING",
            Self::Started => "STARTED",
            Self::Relocating => "RELOCATING",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    shard_id: ShardId,
    current_node_id: Option<NodeId>,
    relocating_node_id: Option<NodeId>,
    primary: bool,
    state: ShardRoutingState,
    allocation_id: Option<AllocationId>,
    unassigned_info: Option<UnassignedInfo>,
}

impl ShardRouting {
    pub fn new_unassigned(shard_id: ShardId, primary: bool, info: UnassignedInfo) -> Self {
        Self {
            shard_id,
            current_node_id: None,
            relocating_node_id: None,
            primary,
            state: ShardRoutingState::Unassigned,
            allocation_id: None,
            unassigned_info: Some(info),
        }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn current_node_id(&self) -> Option<&NodeId> {
        self.current_node_id.as_ref()
    }

    pub fn relocating_node_id(&self) -> Option<&NodeId> {
        self.relocating_node_id.as_ref()
    }

    pub fn primary(&self) -> bool {
        self.primary
    }

    pub fn state(&self) -> ShardRoutingState {
        self.state
    }

    pub fn allocation_id(&self) -> Option<AllocationId> {
        self.allocation_id
    }

    pub fn unassigned_info(&self) -> Option<&UnassignedInfo> {
        self.unassigned_info.as_ref()
    }

    pub fn unassigned(&self) -> bool {
        self.state == ShardRoutingState::Unassigned
    }

    pub fn assigned(&self) -> bool {
        self.current_node_id.is_some()
    }

    pub fn initializing(&self) -> bool {
        self.state == ShardRoutingState::Initializing
    }

    pub fn started(&self) -> bool {
        self.state == ShardRoutingState::Started
    }

    pub fn relocating(&self) -> bool {
        self.state == ShardRoutingState::Relocating
    }

    pub fn active(&self) -> bool {
        self.state.is_active()
    }

    /// The initializing half of a relocation.
    pub fn is_relocation_target(&self) -> bool {
        self.initializing() && self.relocating_node_id.is_some()
    }

    /// Returns true if `self` is the relocation target paired with `source`.
    pub fn is_relocation_target_of(&self, source: &ShardRouting) -> bool {
        self.is_relocation_target()
            && source.relocating()
            && self.shard_id == source.shard_id
            && self.current_node_id == source.relocating_node_id
            && self.relocating_node_id == source.current_node_id
    }

    pub fn is_on_node(&self, node_id: &NodeId) -> bool {
        self.current_node_id.as_ref() == Some(node_id)
    }

    /// Moves an unassigned copy onto `node_id`. The unassigned info is kept
    /// until the copy starts so that repeated failures accumulate.
    pub fn initialize(&self, node_id: NodeId, allocation_id: AllocationId) -> Self {
        debug_assert!(self.unassigned(), "only unassigned copies initialize");
        Self {
            shard_id: self.shard_id.clone(),
            current_node_id: Some(node_id),
            relocating_node_id: None,
            primary: self.primary,
            state: ShardRoutingState::Initializing,
            allocation_id: Some(allocation_id),
            unassigned_info: self.unassigned_info.clone(),
        }
    }

    pub fn move_to_started(&self) -> Self {
        debug_assert!(self.initializing(), "only initializing copies start");
        Self {
            relocating_node_id: None,
            state: ShardRoutingState::Started,
            unassigned_info: None,
            ..self.clone()
        }
    }

    /// Splits a started copy into a relocating source and its initializing target.
    pub fn relocate(&self, target_node: NodeId, target_allocation_id: AllocationId) -> (Self, Self) {
        debug_assert!(self.started(), "only started copies relocate");
        let source = Self {
            relocating_node_id: Some(target_node.clone()),
            state: ShardRoutingState::Relocating,
            ..self.clone()
        };
        let target = Self {
            shard_id: self.shard_id.clone(),
            current_node_id: Some(target_node),
            relocating_node_id: self.current_node_id.clone(),
            primary: self.primary,
            state: ShardRoutingState::Initializing,
            allocation_id: Some(target_allocation_id),
            unassigned_info: None,
        };
        (source, target)
    }

    pub fn cancel_relocation(&self) -> Self {
        debug_assert!(self.relocating(), "only relocating copies cancel");
        Self {
            relocating_node_id: None,
            state: ShardRoutingState::Started,
            ..self.clone()
        }
    }

    pub fn move_to_unassigned(&self, info: UnassignedInfo) -> Self {
        Self {
            shard_id: self.shard_id.clone(),
            current_node_id: None,
            relocating_node_id: None,
            primary: self.primary,
            state: ShardRoutingState::Unassigned,
            allocation_id: None,
            unassigned_info: Some(info),
        }
    }

    pub fn move_to_primary(&self) -> Self {
        Self {
            primary: true,
            ..self.clone()
        }
    }

    pub fn move_to_replica(&self) -> Self {
        Self {
            primary: false,
            ..self.clone()
        }
    }

    pub fn with_unassigned_info(&self, info: UnassignedInfo) -> Self {
        Self {
            unassigned_info: Some(info),
            ..self.clone()
        }
    }
}

impl fmt::Display for ShardRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, node[", self.shard_id)?;
        if let Some(node) = &self.current_node_id {
            write!(f, "{node}")?;
        }
        write!(f, "]")?;
        if let Some(node) = &self.relocating_node_id {
            if self.relocating() {
                write!(f, ", relocating to [{node}]")?;
            } else {
                write!(f, ", recovering from [{node}]")?;
            }
        }
        write!(f, ", [{}]", if self.primary { "P" } else { "R" })?;
        write!(f, ", s[{}]", self.state)?;
        if let Some(id) = &self.allocation_id {
            write!(f, ", a[id={id}]")?;
        }
        if let Some(info) = &self.unassigned_info {
            write!(f, ", {info}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::UnassignedReason;

    fn unassigned_primary() -> ShardRouting {
        ShardRouting::new_unassigned(
            ShardId::new("docs", 0),
            true,
            UnassignedInfo::new(UnassignedReason::IndexCreated, None),
        )
    }

    fn aid(node: &str, seed: u64) -> AllocationId {
        AllocationId::derive(&ShardId::new("docs", 0), &NodeId::from(node), true, seed)
    }

    #[test]
    fn test_initialize_then_start_clears_unassigned_info() {
        let shard = unassigned_primary();
        let initializing = shard.initialize(NodeId::from("node-1"), aid("node-1", 1));
        assert!(initializing.initializing());
        assert!(initializing.unassigned_info().is_some());

        let started = initializing.move_to_started();
        assert!(started.started());
        assert!(started.active());
        assert!(started.unassigned_info().is_none());
        assert_eq!(started.current_node_id(), Some(&NodeId::from("node-1")));
    }

    #[test]
    fn test_relocation_pair_points_at_each_other() {
        let started = unassigned_primary()
            .initialize(NodeId::from("node-1"), aid("node-1", 1))
            .move_to_started();
        let (source, target) = started.relocate(NodeId::from("node-2"), aid("node-2", 2));

        assert!(source.relocating());
        assert!(target.is_relocation_target());
        assert!(target.is_relocation_target_of(&source));
        assert!(target.primary());
        assert_eq!(source.allocation_id(), started.allocation_id());

        let restored = source.cancel_relocation();
        assert_eq!(restored, started);
    }

    #[test]
    fn test_display_contains_role_and_state() {
        let started = unassigned_primary()
            .initialize(NodeId::from("node-1"), aid("node-1", 1))
            .move_to_started();
        let rendered = started.to_string();
        assert!(rendered.starts_with("[docs][0], node[node-1], [P], s[STARTED]"));
    }
}
