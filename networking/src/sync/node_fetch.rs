use containers::{NodeHash, TrieNode};
use std::sync::Arc;
use storage::{StorageError, TrieStorage};
use tracing::debug;

use super::frontier::FrontierQueue;
use super::stats::SyncCounters;

/// How a node response was handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeResponseOutcome {
    pub accepted: usize,
    pub rejected: usize,
    pub duplicate: usize,
    /// The response was absent or did not answer every requested hash.
    pub malformed: bool,
}

impl NodeResponseOutcome {
    /// Whether the peer answered completely and correctly.
    pub fn peer_ok(&self) -> bool {
        !self.malformed && self.rejected == 0
    }
}

/// Hands out hash batches to request and feeds verified nodes back into the
/// frontier and the trie storage.
pub struct NodeFetchCoordinator {
    frontier: Arc<FrontierQueue>,
    storage: Arc<dyn TrieStorage>,
    batch_size: usize,
    counters: Arc<SyncCounters>,
}

impl NodeFetchCoordinator {
    pub fn new(
        frontier: Arc<FrontierQueue>,
        storage: Arc<dyn TrieStorage>,
        batch_size: usize,
        counters: Arc<SyncCounters>,
    ) -> Self {
        Self {
            frontier,
            storage,
            batch_size: batch_size.max(1),
            counters,
        }
    }

    pub fn frontier(&self) -> &Arc<FrontierQueue> {
        &self.frontier
    }

    /// Up to `batch_size` hashes to request. Empty when there is nothing to hand out.
    pub fn try_get_hash_batch(&self) -> Result<Vec<NodeHash>, StorageError> {
        let mut frontier = self.frontier.lock();
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match frontier.try_get_next()? {
                Some(hash) => batch.push(hash),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Process the answer to a request for `requested`.
    ///
    /// Every node must hash to the hash at the same position. A response of
    /// the wrong length fails every hash. Failed hashes go back to the
    /// frontier if they are still pending. Accepted nodes are stored only if
    /// their hash is still pending; a node already delivered by another
    /// request is dropped.
    pub fn handle_response(
        &self,
        requested: &[NodeHash],
        response: Option<Vec<TrieNode>>,
    ) -> Result<NodeResponseOutcome, StorageError> {
        let mut outcome = NodeResponseOutcome::default();
        let mut failed = Vec::new();
        let mut verified = Vec::new();

        match response {
            Some(nodes) if nodes.len() == requested.len() => {
                for (hash, node) in requested.iter().zip(nodes) {
                    if node.hash() == *hash {
                        verified.push((*hash, node));
                    } else {
                        failed.push(*hash);
                    }
                }
                outcome.rejected = failed.len();
            }
            _ => {
                outcome.malformed = true;
                failed.extend_from_slice(requested);
            }
        }

        let mut frontier = self.frontier.lock();
        for hash in failed {
            if frontier.is_pending(&hash) {
                frontier.add(hash)?;
            }
        }

        for (hash, node) in verified {
            if !frontier.is_pending(&hash) {
                outcome.duplicate += 1;
                continue;
            }
            for child in node.children() {
                frontier.add(*child)?;
            }
            self.storage.add_node(node)?;
            frontier.mark_resolved(&hash)?;
            outcome.accepted += 1;
        }
        drop(frontier);

        SyncCounters::add(&self.counters.nodes_accepted, outcome.accepted as u64);
        SyncCounters::add(&self.counters.nodes_rejected, outcome.rejected as u64);
        SyncCounters::add(&self.counters.nodes_duplicate, outcome.duplicate as u64);
        if !outcome.peer_ok() {
            debug!(
                trie = %self.frontier.trie(),
                requested = requested.len(),
                rejected = outcome.rejected,
                malformed = outcome.malformed,
                "Bad node response"
            );
        }
        Ok(outcome)
    }

    pub fn is_done(&self) -> bool {
        self.frontier.is_complete()
    }
}
