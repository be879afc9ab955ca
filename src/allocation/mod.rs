// ============================================================================
// Allocation Module
// ============================================================================
//
// Decides where shard copies live and moves them through their lifecycle:
//
//   service             entry points: reroute, started, failed, dead nodes
//   routing_allocation  working copy of the routing for one request
//   decider             pluggable placement rules (YES / THROTTLE / NO)
//   balancer            relocations that even out copies per node
//   settings            tunables
//
// ============================================================================

pub mod balancer;
pub mod decider;
pub mod events;
pub mod routing_allocation;
pub mod service;
pub mod settings;

pub use decider::{AllocationDecider, AllocationDeciders, Decision, DecisionType};
pub use events::{FailedShard, StartedShard};
pub use routing_allocation::RoutingAllocation;
pub use service::AllocationService;
pub use settings::AllocationSettings;
