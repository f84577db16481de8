use containers::{BlockRecord, Checkpoint, CheckpointDescriptor, NodeHash, StateRoots, TrieName};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::SyncConfig;
use super::error::CheckpointError;
use super::network::NetworkRequester;
use super::peer_pool::PeerPool;

/// Cross-check a claimed checkpoint against data fetched from peers.
///
/// The block must carry the claimed hash, the aggregate of the fetched roots
/// must be the block's state hash, and every claimed root must equal the
/// fetched root of the same trie.
pub fn is_checkpoint_ok(
    checkpoint: &Checkpoint,
    block: &BlockRecord,
    fetched_roots: &StateRoots,
) -> Result<(), CheckpointError> {
    if block.hash != checkpoint.block_hash {
        return Err(CheckpointError::BlockHashMismatch {
            claimed: checkpoint.block_hash,
            fetched: block.hash,
        });
    }

    let computed = fetched_roots.aggregate_hash();
    if computed != block.header.state_hash {
        return Err(CheckpointError::StateHashMismatch {
            expected: block.header.state_hash,
            computed,
        });
    }

    for (trie, fetched) in fetched_roots.iter() {
        let claimed = checkpoint.state_roots.get(trie);
        if claimed != fetched {
            return Err(CheckpointError::RootMismatch {
                trie,
                claimed,
                fetched,
            });
        }
    }
    Ok(())
}

pub struct CheckpointVerifier<N: NetworkRequester> {
    network: Arc<N>,
    peers: Arc<PeerPool>,
    config: SyncConfig,
}

impl<N: NetworkRequester> CheckpointVerifier<N> {
    pub fn new(network: Arc<N>, peers: Arc<PeerPool>, config: SyncConfig) -> Self {
        Self {
            network,
            peers,
            config,
        }
    }

    /// Validate `descriptor` and cross-check it against the network.
    pub async fn verify(
        &self,
        descriptor: &CheckpointDescriptor,
    ) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = descriptor.complete()?;
        debug!(height = checkpoint.height, "Verifying checkpoint");

        let (block, roots) = tokio::join!(
            self.fetch_block(checkpoint.height),
            join_all(
                TrieName::ALL
                    .into_iter()
                    .map(|trie| self.fetch_root(trie, checkpoint.height))
            )
        );
        let block = block?;
        let mut fetched_roots = StateRoots::default();
        for (trie, root) in TrieName::ALL.into_iter().zip(roots) {
            fetched_roots.set(trie, root?);
        }

        is_checkpoint_ok(&checkpoint, &block, &fetched_roots)?;
        info!(
            height = checkpoint.height,
            block_hash = %checkpoint.block_hash,
            "Checkpoint verified"
        );
        Ok(checkpoint)
    }

    async fn fetch_block(&self, height: u64) -> Result<BlockRecord, CheckpointError> {
        let mut last_error = None;
        for attempt in 0..self.config.checkpoint_attempts {
            let peer = self
                .peers
                .acquire(self.config.poll_interval(), self.config.stall_alert())
                .await;
            let response = tokio::time::timeout(
                self.config.request_timeout(),
                self.network.request_blocks_by_range(peer, height, height),
            )
            .await
            .ok()
            .flatten();

            let block = match response {
                Some(mut blocks) if blocks.len() == 1 && blocks[0].height() == height => {
                    blocks.remove(0)
                }
                _ => {
                    debug!(peer = %peer, attempt, "Checkpoint block request failed");
                    self.peers.release(peer, false);
                    continue;
                }
            };
            match block.verify() {
                Ok(()) => {
                    self.peers.release(peer, true);
                    return Ok(block);
                }
                Err(err) => {
                    warn!(peer = %peer, error = %err, "Peer sent an invalid checkpoint block");
                    self.peers.release(peer, false);
                    last_error = Some(err);
                }
            }
        }

        Err(match last_error {
            Some(err) => CheckpointError::InvalidBlock(err),
            None => CheckpointError::BlockUnavailable { height },
        })
    }

    async fn fetch_root(&self, trie: TrieName, height: u64) -> Result<NodeHash, CheckpointError> {
        for attempt in 0..self.config.checkpoint_attempts {
            let peer = self
                .peers
                .acquire(self.config.poll_interval(), self.config.stall_alert())
                .await;
            let response = tokio::time::timeout(
                self.config.request_timeout(),
                self.network.request_root_hash(peer, trie, height),
            )
            .await
            .ok()
            .flatten();

            match response {
                Some(root) => {
                    self.peers.release(peer, true);
                    return Ok(root);
                }
                None => {
                    debug!(peer = %peer, trie = %trie, attempt, "Root hash request failed");
                    self.peers.release(peer, false);
                }
            }
        }
        Err(CheckpointError::RootUnavailable { trie })
    }
}
