//! Request driver shared by the node and block downloads.
//!
//! Pairs idle peers with work, runs each request as its own task with a
//! deadline, and feeds the answer back to the coordinator. Dropping the
//! driver future aborts every request in flight.

use async_trait::async_trait;
use containers::NodeHash;
use libp2p_identity::PeerId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::block_fetch::BlockFetchCoordinator;
use super::config::SyncConfig;
use super::error::SyncError;
use super::network::NetworkRequester;
use super::node_fetch::NodeFetchCoordinator;
use super::peer_pool::PeerPool;
use super::stats::SyncCounters;

/// One kind of download the driver can run.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    type Work: Send + 'static;

    fn name(&self) -> &'static str;

    /// Next unit of work, `None` if nothing can be handed out right now.
    fn next_work(&self) -> Result<Option<Self::Work>, SyncError>;

    /// Request `work` from `peer` and hand the answer to the coordinator.
    ///
    /// Returns whether the peer answered well.
    async fn fetch(&self, peer_id: PeerId, work: Self::Work) -> Result<bool, SyncError>;

    fn is_done(&self) -> bool;
}

/// Run `fetcher` until it reports done.
pub async fn drive<F: Fetcher>(
    fetcher: Arc<F>,
    peers: Arc<PeerPool>,
    config: &SyncConfig,
) -> Result<(), SyncError> {
    let mut tasks: JoinSet<Result<(), SyncError>> = JoinSet::new();
    let max_in_flight = config.max_in_flight_requests.max(1);
    let mut last_progress = Instant::now();
    let mut next_alert = config.stall_alert();

    while !fetcher.is_done() {
        if tasks.len() < max_in_flight {
            if let Some(peer_id) = peers.try_get_peer() {
                match fetcher.next_work() {
                    Ok(Some(work)) => {
                        let fetcher = fetcher.clone();
                        let peers = peers.clone();
                        tasks.spawn(async move {
                            let success = fetcher.fetch(peer_id, work).await?;
                            peers.release(peer_id, success);
                            Ok(())
                        });
                        last_progress = Instant::now();
                        next_alert = config.stall_alert();
                        continue;
                    }
                    Ok(None) => {
                        peers.release(peer_id, true);
                    }
                    Err(err) => {
                        peers.release(peer_id, true);
                        return Err(err);
                    }
                }
            }
        }

        let waited = last_progress.elapsed();
        if waited >= next_alert {
            warn!(
                download = fetcher.name(),
                waited_secs = waited.as_secs(),
                in_flight = tasks.len(),
                available_peers = peers.available_count(),
                "Fast sync download is stalled"
            );
            next_alert += config.stall_alert();
        }

        tokio::select! {
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                joined??;
                last_progress = Instant::now();
                next_alert = config.stall_alert();
            }
            _ = tokio::time::sleep(config.poll_interval()) => {}
        }
    }

    // Answers still in flight are for work already completed elsewhere; let
    // them finish so their peers go back to the pool.
    while let Some(joined) = tasks.join_next().await {
        joined??;
    }
    debug!(download = fetcher.name(), "Download finished");
    Ok(())
}

async fn with_deadline<T>(
    deadline: Duration,
    counters: &SyncCounters,
    request: impl std::future::Future<Output = Option<T>>,
) -> Option<T> {
    SyncCounters::add(&counters.requests_sent, 1);
    let response = match tokio::time::timeout(deadline, request).await {
        Ok(response) => response,
        Err(_) => {
            SyncCounters::add(&counters.requests_timed_out, 1);
            None
        }
    };
    if response.is_none() {
        SyncCounters::add(&counters.requests_failed, 1);
    }
    response
}

/// Downloads the trie nodes of one trie.
pub struct NodeFetcher<N: NetworkRequester> {
    coordinator: Arc<NodeFetchCoordinator>,
    network: Arc<N>,
    request_timeout: Duration,
    counters: Arc<SyncCounters>,
}

impl<N: NetworkRequester> NodeFetcher<N> {
    pub fn new(
        coordinator: Arc<NodeFetchCoordinator>,
        network: Arc<N>,
        request_timeout: Duration,
        counters: Arc<SyncCounters>,
    ) -> Self {
        Self {
            coordinator,
            network,
            request_timeout,
            counters,
        }
    }
}

#[async_trait]
impl<N: NetworkRequester> Fetcher for NodeFetcher<N> {
    type Work = Vec<NodeHash>;

    fn name(&self) -> &'static str {
        "trie nodes"
    }

    fn next_work(&self) -> Result<Option<Self::Work>, SyncError> {
        let batch = self.coordinator.try_get_hash_batch()?;
        Ok((!batch.is_empty()).then_some(batch))
    }

    async fn fetch(&self, peer_id: PeerId, hashes: Vec<NodeHash>) -> Result<bool, SyncError> {
        let response = with_deadline(
            self.request_timeout,
            &self.counters,
            self.network.request_nodes_by_hash(peer_id, hashes.clone()),
        )
        .await;
        let outcome = self.coordinator.handle_response(&hashes, response)?;
        if !outcome.peer_ok() {
            debug!(peer = %peer_id, ?outcome, "Node request failed");
        }
        Ok(outcome.peer_ok())
    }

    fn is_done(&self) -> bool {
        self.coordinator.is_done()
    }
}

/// Downloads the block range up to the checkpoint.
pub struct BlockFetcher<N: NetworkRequester> {
    coordinator: Arc<BlockFetchCoordinator>,
    network: Arc<N>,
    request_timeout: Duration,
    counters: Arc<SyncCounters>,
}

impl<N: NetworkRequester> BlockFetcher<N> {
    pub fn new(
        coordinator: Arc<BlockFetchCoordinator>,
        network: Arc<N>,
        request_timeout: Duration,
        counters: Arc<SyncCounters>,
    ) -> Self {
        Self {
            coordinator,
            network,
            request_timeout,
            counters,
        }
    }
}

#[async_trait]
impl<N: NetworkRequester> Fetcher for BlockFetcher<N> {
    type Work = (u64, u64);

    fn name(&self) -> &'static str {
        "blocks"
    }

    fn next_work(&self) -> Result<Option<Self::Work>, SyncError> {
        Ok(self.coordinator.try_get_batch())
    }

    async fn fetch(&self, peer_id: PeerId, (from, to): (u64, u64)) -> Result<bool, SyncError> {
        let response = with_deadline(
            self.request_timeout,
            &self.counters,
            self.network.request_blocks_by_range(peer_id, from, to),
        )
        .await;
        Ok(self
            .coordinator
            .handle_response(from, to, response, Some(peer_id)))
    }

    fn is_done(&self) -> bool {
        self.coordinator.is_done()
    }
}
