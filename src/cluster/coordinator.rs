// ============================================================================
// Cluster Coordinator
// ============================================================================
//
// Single writer of the cluster state. Tasks are applied one at a time against
// the current snapshot; every new snapshot is published through a watch
// channel so readers always see a complete, immutable state.
//
// ```text
//   CoordinatorHandle ──mpsc──> coordinator task ──> AllocationService
//          ^                          │
//          └──────── oneshot ─────────┤
//   subscribers <────── watch ────────┘
// ```
//
// ============================================================================

use super::{ClusterState, DiscoveryNode, DiscoveryNodes};
use crate::allocation::{AllocationService, FailedShard, StartedShard};
use crate::core::{ClusterError, NodeId, Result};
use crate::metadata::IndexMetadata;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Level, event, info_span};

const TASK_QUEUE_CAPACITY: usize = 128;

/// A change requested of the cluster.
#[derive(Debug, Clone)]
pub enum ClusterTask {
    AddNodes(Vec<DiscoveryNode>),
    RemoveNodes(Vec<NodeId>),
    CreateIndex(IndexMetadata),
    DeleteIndex(String),
    ShardsStarted(Vec<StartedShard>),
    ShardsFailed(Vec<FailedShard>),
    Reroute(String),
}

impl ClusterTask {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddNodes(_) => "add_nodes",
            Self::RemoveNodes(_) => "remove_nodes",
            Self::CreateIndex(_) => "create_index",
            Self::DeleteIndex(_) => "delete_index",
            Self::ShardsStarted(_) => "shards_started",
            Self::ShardsFailed(_) => "shards_failed",
            Self::Reroute(_) => "reroute",
        }
    }
}

pub struct ClusterCoordinator {
    service: AllocationService,
    state: Arc<ClusterState>,
    publisher: watch::Sender<Arc<ClusterState>>,
}

impl ClusterCoordinator {
    pub fn new(service: AllocationService, initial: ClusterState) -> Self {
        let state = Arc::new(initial);
        let (publisher, _) = watch::channel(state.clone());
        Self {
            service,
            state,
            publisher,
        }
    }

    pub fn state(&self) -> Arc<ClusterState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterState>> {
        self.publisher.subscribe()
    }

    /// Applies one task. On error the current state is left as it was.
    pub fn apply(&mut self, task: ClusterTask) -> Result<Arc<ClusterState>> {
        let span = info_span!("cluster_task", task = task.name(), version = self.state.version());
        let _enter = span.enter();

        let current = self.state.as_ref();
        let next = match task {
            ClusterTask::AddNodes(nodes) => {
                let mut builder = DiscoveryNodes::builder_from(current.nodes());
                for node in nodes {
                    builder = builder.add(node);
                }
                let joined = with_nodes(current, builder.build()?);
                self.service.reroute(&joined, "node joined")?
            }
            ClusterTask::RemoveNodes(node_ids) => {
                let mut builder = DiscoveryNodes::builder_from(current.nodes());
                for node_id in &node_ids {
                    builder = builder.remove(node_id);
                }
                let left = with_nodes(current, builder.build()?);
                self.service.disassociate_dead_nodes(&left, "node left")?
            }
            ClusterTask::CreateIndex(index) => {
                let created = self.service.create_index(current, index)?;
                self.service.reroute(&created, "index created")?
            }
            ClusterTask::DeleteIndex(name) => self.service.delete_index(current, &name)?,
            ClusterTask::ShardsStarted(started) => self.service.apply_started_shards(current, &started)?,
            ClusterTask::ShardsFailed(failed) => self.service.apply_failed_shards(current, &failed)?,
            ClusterTask::Reroute(reason) => self.service.reroute(current, &reason)?,
        };

        if next.version() != self.state.version() {
            event!(
                Level::INFO,
                version = next.version(),
                health = %next.health().status,
                "publishing cluster state"
            );
            self.state = Arc::new(next);
            self.publisher.send_replace(self.state.clone());
        }
        Ok(self.state.clone())
    }
}

/// Replaces the node set, bumping the version only if it changed.
fn with_nodes(state: &ClusterState, nodes: DiscoveryNodes) -> ClusterState {
    if &nodes == state.nodes() {
        return state.clone();
    }
    ClusterState::builder_from(state)
        .nodes(nodes)
        .increment_version()
        .build()
}

type TaskReply = oneshot::Sender<Result<Arc<ClusterState>>>;

/// Cheap, cloneable access to a coordinator running on a tokio task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tasks: mpsc::Sender<(ClusterTask, TaskReply)>,
    states: watch::Receiver<Arc<ClusterState>>,
}

impl CoordinatorHandle {
    /// Moves the coordinator onto a background task. The task ends once every
    /// handle has been dropped.
    pub fn spawn(mut coordinator: ClusterCoordinator) -> (Self, JoinHandle<()>) {
        let (tasks, mut inbox) = mpsc::channel::<(ClusterTask, TaskReply)>(TASK_QUEUE_CAPACITY);
        let states = coordinator.subscribe();

        let join_handle = tokio::spawn(async move {
            while let Some((task, reply)) = inbox.recv().await {
                let result = coordinator.apply(task);
                if let Err(err) = &result {
                    event!(Level::WARN, error = %err, "cluster task rejected");
                }
                let _ = reply.send(result);
            }
            event!(Level::DEBUG, "cluster coordinator stopped");
        });

        (Self { tasks, states }, join_handle)
    }

    /// Queues a task and waits for the state it produced.
    pub async fn submit(&self, task: ClusterTask) -> Result<Arc<ClusterState>> {
        let (reply, response) = oneshot::channel();
        self.tasks
            .send((task, reply))
            .await
            .map_err(|_| ClusterError::Coordinator("coordinator is not running".to_string()))?;
        response.await?
    }

    /// The latest published state.
    pub fn current(&self) -> Arc<ClusterState> {
        self.states.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterState>> {
        self.states.clone()
    }
}
