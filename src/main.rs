use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use containers::TrieName;
use metrics::server::{run_metrics_server, MetricsServerConfig};
use metrics::Metrics;
use networking::memory::{ChainBuilder, MemoryTransport, PeerFault};
use networking::sync::{FastSyncRepository, FastSyncService, RpcNetwork, SyncConfig};
use storage::{MemoryKvStore, MemoryTrieStorage};
use tracing::{info, warn};

/// Fast sync a fresh node from a simulated network.
#[derive(Parser, Debug)]
struct Args {
    /// Honest peers serving the chain.
    #[arg(long, default_value_t = 4)]
    peers: usize,

    /// Peers answering with corrupted trie nodes.
    #[arg(long, default_value_t = 1)]
    corrupt_peers: usize,

    /// Peers that never answer.
    #[arg(long, default_value_t = 0)]
    silent_peers: usize,

    /// Height of the checkpoint block.
    #[arg(long, default_value_t = 500)]
    blocks: u64,

    /// Leaves in each state trie.
    #[arg(long, default_value_t = 2000)]
    leaves: usize,

    #[arg(long, default_value_t = 16)]
    fanout: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Delay added to every answer.
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// YAML sync configuration. Missing keys keep their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sync even when the node is not far enough behind.
    #[arg(long)]
    force: bool,

    #[arg(long, default_value = "127.0.0.1")]
    metrics_address: IpAddr,

    /// Serve Prometheus metrics on this port.
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SyncConfig::load_from_file(path)
            .with_context(|| format!("failed to load sync config {}", path.display()))?,
        None => SyncConfig::default(),
    };

    let chain = TrieName::ALL
        .into_iter()
        .fold(ChainBuilder::new(args.seed).height(args.blocks).signers(3), |builder, trie| {
            builder.trie(trie, args.leaves, args.fanout)
        })
        .build()?;
    let chain = Arc::new(chain);
    info!(
        height = chain.height(),
        nodes = chain.node_count(),
        block_hash = %chain.tip().hash,
        "Simulated chain built"
    );

    let transport = MemoryTransport::with_latency(Duration::from_millis(args.latency_ms));
    let faults = std::iter::repeat(PeerFault::Honest)
        .take(args.peers)
        .chain(std::iter::repeat(PeerFault::CorruptNodes).take(args.corrupt_peers))
        .chain(std::iter::repeat(PeerFault::Silent).take(args.silent_peers));
    let peer_ids: Vec<_> = faults
        .map(|fault| transport.add_peer(chain.clone(), fault))
        .collect();

    let repository = Arc::new(FastSyncRepository::new(Arc::new(MemoryKvStore::new()))?);
    repository.persist_blocks(&[chain.genesis().clone()])?;
    let tries = Arc::new(MemoryTrieStorage::new());

    let mut service = FastSyncService::new(
        Arc::new(RpcNetwork::new(transport)),
        Arc::new(networking::sync::PeerPool::new(config.peer_penalty())),
        tries.clone(),
        repository,
        config,
    );

    if let Some(metrics_port) = args.metrics_port {
        let metrics = Arc::new(Metrics::new()?);
        let server_config = MetricsServerConfig {
            metrics_address: args.metrics_address,
            metrics_port,
        };
        let server_metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(err) = run_metrics_server(server_config, server_metrics).await {
                warn!(error = %err, "Metrics server stopped");
            }
        });
        service = service.with_metrics(metrics);
    }

    for peer_id in peer_ids {
        service.add_peer(peer_id, None);
    }

    if !service.should_fast_sync(0).await && !args.force {
        info!("Node is close enough to the network head, nothing to do");
        return Ok(());
    }

    let started = Instant::now();
    let checkpoint = service.start_sync(&chain.checkpoint()).await?;

    for (trie, root) in checkpoint.state_roots.iter() {
        let nodes = tries.reachable_nodes(&root)?;
        info!(trie = %trie, root = %root, nodes, "Trie verified");
    }
    let stats = service.stats();
    info!(
        height = checkpoint.height,
        elapsed_ms = started.elapsed().as_millis() as u64,
        nodes = stats.nodes_accepted,
        rejected = stats.nodes_rejected,
        requests = stats.requests_sent,
        failed = stats.requests_failed,
        timed_out = stats.requests_timed_out,
        "Simulation finished"
    );
    Ok(())
}
