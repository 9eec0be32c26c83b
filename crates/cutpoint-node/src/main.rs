//! Cutpoint binary.
//!
//! # Usage
//!
//! ```bash
//! # One process of a three-member cluster
//! cutpoint node --id 1 --bind 127.0.0.1:5001 \
//!     --peer 2@127.0.0.1:5002 --peer 3@127.0.0.1:5003
//!
//! # Bundled scenarios on localhost
//! cutpoint demo snapshot
//! cutpoint demo bully
//! cutpoint demo ring
//! ```

mod demo;

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use cutpoint_core::election::ElectionAlgorithm;
use cutpoint_node::{ProcessConfig, TcpProcess};
use cutpoint_proto::{Address, ProcessIdentity};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Cutpoint process cluster
#[derive(Parser, Debug)]
#[command(name = "cutpoint")]
#[command(about = "Lamport clocks, leader election and Chandy-Lamport snapshots")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one process until interrupted
    Node(NodeArgs),

    /// Run a bundled scenario on localhost
    Demo {
        /// Scenario to run
        #[arg(value_enum)]
        scenario: Scenario,

        /// First port; processes listen on the ports right after it
        #[arg(long, default_value = "5000")]
        base_port: u16,
    },
}

#[derive(clap::Args, Debug)]
struct NodeArgs {
    /// Process id
    #[arg(long)]
    id: u64,

    /// Address to listen on
    #[arg(short, long)]
    bind: String,

    /// Peer as `id@host:port` (repeatable)
    #[arg(short, long = "peer", value_parser = parse_peer)]
    peers: Vec<ProcessIdentity>,

    /// Election run when the coordinator is found dead
    #[arg(long, value_enum, default_value = "bully")]
    election: AlgorithmArg,

    /// Do not probe the coordinator
    #[arg(long)]
    no_failure_detection: bool,

    /// Run an election right after starting
    #[arg(long)]
    elect_on_start: bool,

    /// Initiate a snapshot this many seconds after starting
    #[arg(long)]
    snapshot_after: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum AlgorithmArg {
    Bully,
    Ring,
}

impl From<AlgorithmArg> for ElectionAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Bully => Self::Bully,
            AlgorithmArg::Ring => Self::Ring,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scenario {
    /// Three processes; process 1 takes a snapshot after 8 seconds
    Snapshot,
    /// Three processes; the highest is killed and the others elect a new
    /// coordinator
    Bully,
    /// Five processes; the two highest are killed and a ring election runs
    Ring,
}

fn parse_peer(s: &str) -> Result<ProcessIdentity, String> {
    let (id, address) = s.split_once('@').ok_or_else(|| format!("expected id@host:port, got {s}"))?;
    let id = id.parse::<u64>().map_err(|e| format!("bad peer id {id:?}: {e}"))?;
    if address.is_empty() {
        return Err(format!("missing address in {s}"));
    }
    Ok(ProcessIdentity::new(id, address))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        Command::Node(node) => run_node(node).await,
        Command::Demo { scenario: Scenario::Snapshot, base_port } => demo::snapshot(base_port).await,
        Command::Demo { scenario: Scenario::Bully, base_port } => demo::bully(base_port).await,
        Command::Demo { scenario: Scenario::Ring, base_port } => demo::ring(base_port).await,
    }
}

async fn run_node(args: NodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let identity = ProcessIdentity::new(args.id, Address::new(args.bind));
    let config = ProcessConfig::default()
        .with_election(args.election.into())
        .with_failure_detection(!args.no_failure_detection)
        .with_elect_on_start(args.elect_on_start);

    tracing::info!("Cutpoint process {} starting", identity);

    let process = TcpProcess::over_tcp(identity, args.peers, config)?;
    process.start().await?;

    if let Some(secs) = args.snapshot_after {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(secs)) => {
                process.initiate_snapshot().await?;
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                process.stop().await?;
                return Ok(());
            },
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, stopping");
    process.stop().await?;

    Ok(())
}
