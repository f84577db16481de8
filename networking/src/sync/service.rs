//! Fast sync orchestrator.
//!
//! Drives a node from an empty state to a verified checkpoint:
//! 1. Cross-check the requested checkpoint against the network
//! 2. Download the six state tries, one after another in canonical order,
//!    while the block range up to the checkpoint downloads alongside
//! 3. Point every trie at its downloaded root and commit the snapshot
//!
//! Every step is persisted, so a run that stops for any reason resumes
//! where it left off when started again.

use containers::{Checkpoint, CheckpointDescriptor, NodeId, TrieName, EMPTY_TRIE_HASH};
use futures::future::join_all;
use libp2p_identity::PeerId;
use metrics::Metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use storage::TrieStorage;
use tracing::{debug, error, info, warn};

use super::{
    block_fetch::BlockFetchCoordinator,
    checkpoint::CheckpointVerifier,
    config::SyncConfig,
    downloader::{drive, BlockFetcher, NodeFetcher},
    error::SyncError,
    frontier::FrontierQueue,
    network::NetworkRequester,
    node_fetch::NodeFetchCoordinator,
    peer_pool::PeerPool,
    repository::FastSyncRepository,
    states::SyncPhase,
    stats::{SyncCounters, SyncStats},
};

const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_secs(10);

pub struct FastSyncService<N: NetworkRequester> {
    network: Arc<N>,
    peers: Arc<PeerPool>,
    storage: Arc<dyn TrieStorage>,
    repository: Arc<FastSyncRepository>,
    config: SyncConfig,
    counters: Arc<SyncCounters>,
    phase: Mutex<SyncPhase>,
    current_frontier: Mutex<Option<Arc<FrontierQueue>>>,
    blocks: Mutex<Option<Arc<BlockFetchCoordinator>>>,
    metrics: Option<Arc<Metrics>>,
}

impl<N: NetworkRequester> FastSyncService<N> {
    pub fn new(
        network: Arc<N>,
        peers: Arc<PeerPool>,
        storage: Arc<dyn TrieStorage>,
        repository: Arc<FastSyncRepository>,
        config: SyncConfig,
    ) -> Self {
        Self {
            network,
            peers,
            storage,
            repository,
            config,
            counters: Arc::new(SyncCounters::default()),
            phase: Mutex::new(SyncPhase::default()),
            current_frontier: Mutex::new(None),
            blocks: Mutex::new(None),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock()
    }

    pub fn peers(&self) -> &Arc<PeerPool> {
        &self.peers
    }

    pub fn repository(&self) -> &Arc<FastSyncRepository> {
        &self.repository
    }

    /// Add a peer to the sync service.
    pub fn add_peer(&self, peer_id: PeerId, height: Option<u64>) {
        self.peers.add_peer(peer_id, height);
        info!(peer = %peer_id, "Peer added to fast sync");
    }

    /// Whether this node lags so far behind its peers that it should fast sync.
    ///
    /// Asks every peer for its latest height first.
    pub async fn should_fast_sync(&self, local_height: u64) -> bool {
        let timeout = self.config.request_timeout();
        let answers = join_all(self.peers.peer_ids().into_iter().map(|peer_id| async move {
            let height = tokio::time::timeout(timeout, self.network.request_latest_height(peer_id))
                .await
                .ok()
                .flatten();
            (peer_id, height)
        }))
        .await;

        for (peer_id, height) in answers {
            match height {
                Some(height) => self.peers.update_height(&peer_id, height),
                None => debug!(peer = %peer_id, "Peer did not report its height"),
            }
        }

        let Some(network_height) = self.peers.max_height() else {
            warn!("No peer reported a height");
            return false;
        };
        let lag = network_height.saturating_sub(local_height);
        let fast_sync = lag > self.config.fast_sync_block_diff;
        info!(local_height, network_height, lag, fast_sync, "Evaluated fast sync trigger");
        fast_sync
    }

    /// Run fast sync to `descriptor`, resuming persisted progress if there is any.
    ///
    /// Dropping the returned future cancels every request in flight; the
    /// next call picks up from the last persisted step.
    pub async fn start_sync(
        &self,
        descriptor: &CheckpointDescriptor,
    ) -> Result<Checkpoint, SyncError> {
        if self.repository.is_sync_complete()? {
            return Err(SyncError::AlreadyCompleted);
        }
        if self.peers.peer_count() == 0 {
            return Err(SyncError::NoPeers);
        }

        let result = self.run(descriptor).await;
        match &result {
            Ok(checkpoint) => {
                info!(
                    height = checkpoint.height,
                    block_hash = %checkpoint.block_hash,
                    "Fast sync completed"
                );
            }
            Err(err) => {
                error!(error = %err, "Fast sync failed");
                self.set_phase(SyncPhase::Failed);
            }
        }
        self.report_progress();
        result
    }

    async fn run(&self, descriptor: &CheckpointDescriptor) -> Result<Checkpoint, SyncError> {
        let checkpoint = match self.repository.progress() {
            Some(progress) => {
                if let Ok(requested) = descriptor.complete() {
                    if requested != progress.checkpoint {
                        return Err(SyncError::Invariant(format!(
                            "sync in progress targets block {} at height {}, not the requested checkpoint",
                            progress.checkpoint.block_hash, progress.checkpoint.height
                        )));
                    }
                }
                info!(
                    height = progress.checkpoint.height,
                    tries_completed = progress.tries_completed,
                    "Resuming fast sync"
                );
                progress.checkpoint
            }
            None => {
                self.set_phase(SyncPhase::VerifyingCheckpoint);
                let verifier = CheckpointVerifier::new(
                    self.network.clone(),
                    self.peers.clone(),
                    self.config.clone(),
                );
                let checkpoint = verifier.verify(descriptor).await?;
                self.repository.init_progress(checkpoint.clone())?;
                checkpoint
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.set_target_block_height(checkpoint.height as i64);
        }

        self.set_phase(SyncPhase::Downloading);
        {
            let download = async {
                tokio::try_join!(self.download_tries(&checkpoint), self.download_blocks(&checkpoint))
            };
            tokio::pin!(download);
            let mut report = tokio::time::interval(PROGRESS_REPORT_INTERVAL);
            loop {
                tokio::select! {
                    result = &mut download => {
                        result?;
                        break;
                    }
                    _ = report.tick() => self.report_progress(),
                }
            }
        }

        self.set_phase(SyncPhase::Committing);
        self.commit(&checkpoint)?;
        self.set_phase(SyncPhase::Completed);
        Ok(checkpoint)
    }

    async fn download_tries(&self, checkpoint: &Checkpoint) -> Result<(), SyncError> {
        let tries_completed = self
            .repository
            .progress()
            .map(|progress| progress.tries_completed)
            .unwrap_or_default();

        for trie in TrieName::ALL.into_iter().skip(tries_completed) {
            let frontier = Arc::new(FrontierQueue::new(
                trie,
                self.config.frontier_batch_size,
                self.repository.clone(),
                self.storage.clone(),
            ));
            *self.current_frontier.lock() = Some(frontier.clone());

            let root = checkpoint.state_roots.get(trie);
            if root != EMPTY_TRIE_HASH
                && !self.storage.has_node(&root)?
                && self.repository.frontier_counters(trie).total == 0
            {
                frontier.add(root)?;
            }
            info!(trie = %trie, root = %root, "Downloading trie");

            let coordinator = Arc::new(NodeFetchCoordinator::new(
                frontier,
                self.storage.clone(),
                self.config.node_request_batch_size,
                self.counters.clone(),
            ));
            let fetcher = Arc::new(NodeFetcher::new(
                coordinator,
                self.network.clone(),
                self.config.request_timeout(),
                self.counters.clone(),
            ));
            drive(fetcher, self.peers.clone(), &self.config).await?;

            self.storage.commit_batch()?;
            self.repository.mark_trie_complete(trie)?;
            self.report_progress();
        }

        *self.current_frontier.lock() = None;
        Ok(())
    }

    async fn download_blocks(&self, checkpoint: &Checkpoint) -> Result<(), SyncError> {
        let coordinator = Arc::new(BlockFetchCoordinator::new(
            self.repository.clone(),
            checkpoint.height,
            self.config.block_batch_size,
            self.counters.clone(),
        )?);
        *self.blocks.lock() = Some(coordinator.clone());

        let fetcher = Arc::new(BlockFetcher::new(
            coordinator.clone(),
            self.network.clone(),
            self.config.request_timeout(),
            self.counters.clone(),
        ));
        tokio::try_join!(
            drive(fetcher, self.peers.clone(), &self.config),
            coordinator.run_verifier(self.config.verifier_interval()),
        )?;

        let tip = self
            .repository
            .block_by_height(checkpoint.height)?
            .ok_or_else(|| SyncError::Invariant("checkpoint block is not stored".into()))?;
        if tip.hash != checkpoint.block_hash {
            return Err(SyncError::Invariant(format!(
                "verified block {} at the checkpoint height differs from checkpoint block {}",
                tip.hash, checkpoint.block_hash
            )));
        }
        Ok(())
    }

    fn commit(&self, checkpoint: &Checkpoint) -> Result<(), SyncError> {
        for (trie, root) in checkpoint.state_roots.iter() {
            let root_id = if root == EMPTY_TRIE_HASH {
                NodeId::EMPTY
            } else {
                self.storage.get_id_by_hash(&root)?.ok_or_else(|| {
                    SyncError::Invariant(format!("root {root} of trie {trie} is not stored"))
                })?
            };
            self.storage.set_trie_version(trie, root_id)?;
            debug!(trie = %trie, root = %root, id = %root_id, "Trie version set");
        }
        self.storage.commit_snapshot(checkpoint.height)?;
        self.repository.mark_sync_complete()?;
        Ok(())
    }

    fn set_phase(&self, target: SyncPhase) {
        let mut phase = self.phase.lock();
        if *phase == target {
            return;
        }
        if !phase.can_transition_to(target) {
            warn!(from = ?*phase, to = ?target, "Invalid fast sync phase transition attempted");
            return;
        }
        info!(from = ?*phase, to = ?target, "Fast sync phase changed");
        *phase = target;
        if let Some(metrics) = &self.metrics {
            metrics.set_sync_phase(target as i64);
        }
    }

    /// Snapshot of the current run.
    pub fn stats(&self) -> SyncStats {
        let progress = self.repository.progress();
        let frontier = self.current_frontier.lock().clone();
        let blocks = self.blocks.lock().clone();
        let counters = &self.counters;

        SyncStats {
            phase: self.phase(),
            target_height: progress.as_ref().map(|progress| progress.checkpoint.height),
            tries_completed: progress
                .as_ref()
                .map(|progress| progress.tries_completed)
                .unwrap_or_default(),
            current_trie: frontier.as_ref().map(|frontier| frontier.trie()),
            frontier: frontier.as_ref().map(|frontier| frontier.stats()),
            verified_height: blocks.as_ref().map(|blocks| blocks.done()),
            peers: self.peers.peer_count(),
            nodes_accepted: SyncCounters::get(&counters.nodes_accepted),
            nodes_rejected: SyncCounters::get(&counters.nodes_rejected),
            nodes_duplicate: SyncCounters::get(&counters.nodes_duplicate),
            blocks_verified: SyncCounters::get(&counters.blocks_verified),
            blocks_rejected: SyncCounters::get(&counters.blocks_rejected),
            requests_sent: SyncCounters::get(&counters.requests_sent),
            requests_failed: SyncCounters::get(&counters.requests_failed),
            requests_timed_out: SyncCounters::get(&counters.requests_timed_out),
        }
    }

    fn report_progress(&self) {
        let stats = self.stats();
        info!(
            phase = ?stats.phase,
            tries_completed = stats.tries_completed,
            trie = ?stats.current_trie,
            batches_saved = stats.frontier.map(|frontier| frontier.saved),
            batches_total = stats.frontier.map(|frontier| frontier.total),
            verified_height = ?stats.verified_height,
            target_height = ?stats.target_height,
            nodes = stats.nodes_accepted,
            "Fast sync progress"
        );

        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.set_peers(stats.peers as i64);
        metrics.set_tries_completed(stats.tries_completed as i64);
        if let Some(frontier) = stats.frontier {
            metrics.set_frontier_batches(
                frontier.loaded as i64,
                frontier.saved as i64,
                frontier.total as i64,
            );
        }
        if let Some(height) = stats.verified_height {
            metrics.set_verified_block_height(height as i64);
        }
        metrics.set_trie_nodes("accepted", stats.nodes_accepted as i64);
        metrics.set_trie_nodes("rejected", stats.nodes_rejected as i64);
        metrics.set_trie_nodes("duplicate", stats.nodes_duplicate as i64);
        metrics.set_requests("sent", stats.requests_sent as i64);
        metrics.set_requests("failed", stats.requests_failed as i64);
        metrics.set_requests("timed_out", stats.requests_timed_out as i64);
    }
}
