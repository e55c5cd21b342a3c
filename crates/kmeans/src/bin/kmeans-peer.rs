//! kmeans-peer — one peer of a distributed K-Means clustering job.
//!
//! Two modes. `--local N` runs a whole N-peer cluster in-process over the
//! local runtime, which needs no conductor and no sockets. `--peer I`
//! joins the `[cluster]` mesh from the job config as peer I; start one
//! process per configured peer plus a lockstep-conductor.
//!
//! # Usage
//!
//! ```bash
//! # Whole job in one process, two peers
//! kmeans-peer --config job.toml --local 2
//!
//! # Distributed: conductor plus one process per peer
//! lockstep-conductor --peers 2 &
//! kmeans-peer --config job.toml --peer 0 &
//! kmeans-peer --config job.toml --peer 1
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::task::JoinSet;

use lockstep_bsp::{PeerId, ZmqMesh};
use lockstep_kmeans::{
    load_centers, JobConfig, JobSummary, JsonlAssignmentSink, JsonlVectorSource, KMeansError,
    KMeansPeer,
};

/// One peer of a distributed K-Means clustering job.
#[derive(Parser, Debug)]
#[command(name = "kmeans-peer", version, about)]
struct Cli {
    /// Job configuration TOML. Absent means built-in defaults plus
    /// LOCKSTEP_* environment overrides.
    #[arg(long, env = "LOCKSTEP_CONFIG")]
    config: Option<PathBuf>,

    /// Run the whole job in-process with this many peers.
    #[arg(long, conflicts_with = "peer")]
    local: Option<usize>,

    /// Join the configured [cluster] mesh as this peer index.
    #[arg(long, env = "LOCKSTEP_PEER_INDEX")]
    peer: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lockstep_core::load_dotenv();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting kmeans-peer");

    let config = JobConfig::load(cli.config.as_deref())?;

    let summaries = match (cli.local, cli.peer) {
        (Some(peers), None) => run_local(&config, peers).await?,
        (None, Some(index)) => vec![run_mesh(&config, index).await?],
        _ => anyhow::bail!("pass exactly one of --local <N> or --peer <I>"),
    };

    for summary in &summaries {
        tracing::info!(
            peer = %summary.peer,
            state = %summary.state,
            supersteps = summary.supersteps,
            assignments = %config.assignments_path(summary.peer.0),
            "peer done"
        );
    }
    Ok(())
}

/// Run all peers as tokio tasks over the in-process runtime.
async fn run_local(config: &JobConfig, peers: usize) -> anyhow::Result<Vec<JobSummary>> {
    if peers == 0 {
        anyhow::bail!("--local must be at least 1");
    }

    let centers = load_centers(&config.input.centers)?;
    let distance = config.distance_measure();
    let max_iterations = config.max_iterations();

    let mut tasks = JoinSet::new();
    for (index, net) in lockstep_bsp::local_cluster(peers).into_iter().enumerate() {
        let centers = centers.clone();
        let config = config.clone();
        tasks.spawn(async move {
            let index = index as u32;
            let mut source = open_shard(&config, index, peers)?;
            let mut sink = JsonlAssignmentSink::create(config.assignments_path(index))?;
            let mut peer = KMeansPeer::new(centers, distance, max_iterations)?;
            peer.run(&net, &mut source, &mut sink).await
        });
    }

    let mut summaries = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                // A failed peer leaves the others stalled at the next
                // barrier, so take the whole cluster down with it.
                tasks.abort_all();
                return Err(e.into());
            }
        }
    }
    summaries.sort_by_key(|s| s.peer);
    Ok(summaries)
}

/// Join the configured mesh and run this process's single peer.
async fn run_mesh(config: &JobConfig, index: u32) -> anyhow::Result<JobSummary> {
    let peers = config.cluster.peer_count();
    if peers == 0 {
        anyhow::bail!("[cluster] section with at least one peer is required for --peer runs");
    }
    if index as usize >= peers {
        anyhow::bail!("--peer {index} out of range for {peers} configured peers");
    }

    let centers = load_centers(&config.input.centers)?;
    let net = ZmqMesh::join(&config.cluster, PeerId(index)).await?;

    let mut source = open_shard(config, index, peers)?;
    let mut sink = JsonlAssignmentSink::create(config.assignments_path(index))?;
    let mut peer = KMeansPeer::new(centers, config.distance_measure(), config.max_iterations())?;
    let summary = peer.run(&net, &mut source, &mut sink).await?;
    net.leave().await?;
    Ok(summary)
}

/// Open this peer's shard: a dedicated file when the vectors path carries
/// a `{peer}` placeholder, otherwise a round-robin slice of the shared
/// file.
fn open_shard(
    config: &JobConfig,
    index: u32,
    peers: usize,
) -> Result<JsonlVectorSource, KMeansError> {
    if config.has_dedicated_shards() {
        JsonlVectorSource::open(config.vectors_path(index))
    } else {
        JsonlVectorSource::open_sharded(&config.input.vectors, index as usize, peers)
    }
}
