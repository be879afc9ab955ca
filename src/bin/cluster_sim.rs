use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use shardkeeper::cluster::DEFAULT_CLUSTER_NAME;
use shardkeeper::index::versions;
use shardkeeper::{
    AllocationService, AllocationSettings, ClusterCoordinator, ClusterState, ClusterTask,
    DiscoveryNode, FailedShard, IndexMetadata, NodeId, ShardId, ShardRoutingState, StartedShard,
    VersionDecision, VersionType,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Upper bound on start rounds in a `stabilize` step.
const MAX_STABILIZE_ROUNDS: usize = 64;

#[derive(Parser)]
#[command(name = "cluster-sim")]
#[command(about = "Replays shard allocation scenarios and evaluates version checks")]
struct Cli {
    /// Log allocation decisions to stderr.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a JSON scenario and print the cluster after every step.
    Run {
        #[arg(long)]
        scenario: PathBuf,
        /// Print the final cluster state as JSON.
        #[arg(long)]
        dump: bool,
    },
    /// Evaluate a version check for a single document operation.
    Versions {
        #[arg(long = "type", default_value = "internal")]
        version_type: String,
        #[arg(long, allow_hyphen_values = true)]
        expected: String,
        #[arg(long, allow_hyphen_values = true)]
        current: String,
        #[arg(long)]
        deleted: bool,
        /// Check as a read instead of a write.
        #[arg(long)]
        read: bool,
    },
}

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    cluster_name: Option<String>,
    #[serde(default)]
    settings: AllocationSettings,
    #[serde(default)]
    nodes: Vec<DiscoveryNode>,
    #[serde(default)]
    indices: Vec<IndexSpec>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct IndexSpec {
    name: String,
    #[serde(default = "default_shards")]
    shards: u32,
    #[serde(default)]
    replicas: u32,
}

fn default_shards() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Step {
    Reroute,
    StartInitializing,
    Stabilize,
    AddNode { node: DiscoveryNode },
    RemoveNode { node: String },
    FailPrimary { index: String, shard: u32 },
    FailShard { index: String, shard: u32, node: String },
    DeleteIndex { index: String },
}

impl Step {
    fn label(&self) -> String {
        match self {
            Step::Reroute => "reroute".to_string(),
            Step::StartInitializing => "start_initializing".to_string(),
            Step::Stabilize => "stabilize".to_string(),
            Step::AddNode { node } => format!("add_node {}", node.id()),
            Step::RemoveNode { node } => format!("remove_node {node}"),
            Step::FailPrimary { index, shard } => format!("fail_primary [{index}][{shard}]"),
            Step::FailShard { index, shard, node } => format!("fail_shard [{index}][{shard}] on {node}"),
            Step::DeleteIndex { index } => format!("delete_index {index}"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    match cli.command {
        Command::Run { scenario, dump } => run_scenario(&scenario, dump),
        Command::Versions {
            version_type,
            expected,
            current,
            deleted,
            read,
        } => check_versions(&version_type, &expected, &current, deleted, read),
    }
}

fn run_scenario(path: &Path, dump: bool) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario '{}'", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse scenario '{}'", path.display()))?;

    let service = AllocationService::new(scenario.settings).context("Invalid allocation settings")?;
    let cluster_name = scenario
        .cluster_name
        .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());
    let mut coordinator = ClusterCoordinator::new(service, ClusterState::builder(cluster_name).build());

    if !scenario.nodes.is_empty() {
        coordinator.apply(ClusterTask::AddNodes(scenario.nodes))?;
    }
    for spec in scenario.indices {
        let index = IndexMetadata::builder(&spec.name)
            .number_of_shards(spec.shards)
            .number_of_replicas(spec.replicas)
            .build()?;
        coordinator.apply(ClusterTask::CreateIndex(index))?;
    }
    print_state(0, "setup", &coordinator.state());

    for (number, step) in scenario.steps.into_iter().enumerate() {
        let label = step.label();
        apply_step(&mut coordinator, step).with_context(|| format!("Step {} ({}) failed", number + 1, label))?;
        print_state(number + 1, &label, &coordinator.state());
    }

    if dump {
        println!("{}", serde_json::to_string_pretty(coordinator.state().as_ref())?);
    }
    Ok(())
}

fn apply_step(coordinator: &mut ClusterCoordinator, step: Step) -> Result<()> {
    match step {
        Step::Reroute => {
            coordinator.apply(ClusterTask::Reroute("scenario".to_string()))?;
        }
        Step::StartInitializing => {
            start_initializing(coordinator)?;
        }
        Step::Stabilize => {
            for _ in 0..MAX_STABILIZE_ROUNDS {
                if !start_initializing(coordinator)? {
                    return Ok(());
                }
            }
            return Err(anyhow!(
                "cluster did not settle after {} rounds",
                MAX_STABILIZE_ROUNDS
            ));
        }
        Step::AddNode { node } => {
            coordinator.apply(ClusterTask::AddNodes(vec![node]))?;
        }
        Step::RemoveNode { node } => {
            coordinator.apply(ClusterTask::RemoveNodes(vec![NodeId::from(node)]))?;
        }
        Step::FailPrimary { index, shard } => {
            let shard_id = ShardId::new(index, shard);
            let state = coordinator.state();
            let primary = state
                .routing_table()
                .primary_shard(&shard_id)?
                .ok_or_else(|| anyhow!("Shard {} has no primary", shard_id))?;
            let failure = FailedShard::from_routing(primary, "simulated primary failure", false)
                .ok_or_else(|| anyhow!("Primary of {} is not assigned", shard_id))?;
            coordinator.apply(ClusterTask::ShardsFailed(vec![failure]))?;
        }
        Step::FailShard { index, shard, node } => {
            let shard_id = ShardId::new(index, shard);
            let node_id = NodeId::from(node);
            let state = coordinator.state();
            let copy = state
                .routing_table()
                .shard_routing_table(&shard_id)?
                .copy_on_node(&node_id)
                .ok_or_else(|| anyhow!("No copy of {} on node {}", shard_id, node_id))?;
            let failure = FailedShard::from_routing(copy, "simulated shard failure", false)
                .ok_or_else(|| anyhow!("Copy of {} on {} is not assigned", shard_id, node_id))?;
            coordinator.apply(ClusterTask::ShardsFailed(vec![failure]))?;
        }
        Step::DeleteIndex { index } => {
            coordinator.apply(ClusterTask::DeleteIndex(index))?;
        }
    }
    Ok(())
}

/// Reports every initializing copy as started. Returns false if there was none.
fn start_initializing(coordinator: &mut ClusterCoordinator) -> Result<bool> {
    let state = coordinator.state();
    let started: Vec<StartedShard> = state
        .routing_table()
        .shards_with_state(ShardRoutingState::Initializing)
        .iter()
        .filter_map(StartedShard::from_routing)
        .collect();
    if started.is_empty() {
        return Ok(false);
    }
    coordinator.apply(ClusterTask::ShardsStarted(started))?;
    Ok(true)
}

fn print_state(step: usize, label: &str, state: &ClusterState) {
    println!(
        "step {} [{}]: version {}, {}",
        step,
        label,
        state.version(),
        state.health()
    );
    for index in state.metadata().indices() {
        let terms = index
            .primary_terms()
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        println!("  {} primary terms [{}]", index.index(), terms);
    }
}

fn parse_version(raw: &str) -> Result<i64> {
    match raw {
        "match_any" => Ok(versions::MATCH_ANY),
        "match_deleted" => Ok(versions::MATCH_DELETED),
        "not_found" => Ok(versions::NOT_FOUND),
        "not_set" => Ok(versions::NOT_SET),
        other => other
            .parse::<i64>()
            .map_err(|_| anyhow!("Invalid version '{}'. Expected a number or a sentinel name", other)),
    }
}

fn check_versions(version_type: &str, expected: &str, current: &str, deleted: bool, read: bool) -> Result<()> {
    let version_type: VersionType = version_type.parse()?;
    let expected = parse_version(expected)?;
    let current = parse_version(current)?;

    if read {
        match version_type.check_read(expected, current) {
            Ok(()) => println!("accept"),
            Err(err) => println!("reject: {}", err),
        }
        return Ok(());
    }

    if !version_type.validate_version_for_writes(expected) {
        println!(
            "reject: illegal version value [{}] for version type [{}]",
            versions::describe(expected),
            version_type
        );
        return Ok(());
    }
    match version_type.evaluate(expected, current, deleted) {
        VersionDecision::Accept { next_version } => println!("accept next_version={}", next_version),
        VersionDecision::Conflict { message, .. } => println!("conflict: {}", message),
    }
    Ok(())
}
