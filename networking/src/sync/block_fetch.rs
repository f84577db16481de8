//! Block header catch-up.
//!
//! Ranges are downloaded out of order from many peers, staged in memory,
//! and verified strictly in height order by a single verifier: a block is
//! only accepted once it links to the already verified block below it.

use containers::BlockRecord;
use libp2p_identity::PeerId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::error::SyncError;
use super::repository::FastSyncRepository;
use super::stats::SyncCounters;

#[derive(Debug, Default)]
struct BlockState {
    next_to_download: BTreeSet<u64>,
    /// Downloaded blocks above `done`, waiting for verification.
    to_verify: BTreeMap<u64, BlockRecord>,
    /// Highest verified and persisted height.
    done: u64,
    max_block: u64,
}

pub struct BlockFetchCoordinator {
    repository: Arc<FastSyncRepository>,
    batch_size: u64,
    counters: Arc<SyncCounters>,
    state: Mutex<BlockState>,
    /// Serializes verification passes.
    verifier: Mutex<()>,
    staged: Notify,
}

impl BlockFetchCoordinator {
    /// Schedule every height between the stored chain head and `max_block`.
    ///
    /// The genesis block must already be stored.
    pub fn new(
        repository: Arc<FastSyncRepository>,
        max_block: u64,
        batch_size: u64,
        counters: Arc<SyncCounters>,
    ) -> Result<Self, SyncError> {
        let done = repository
            .current_block_height()?
            .ok_or_else(|| SyncError::Invariant("genesis block is not stored".into()))?;
        if done > max_block {
            return Err(SyncError::Invariant(format!(
                "stored chain height {done} is above the checkpoint height {max_block}"
            )));
        }
        info!(from = done + 1, to = max_block, "Scheduling block download");

        Ok(Self {
            repository,
            batch_size: batch_size.max(1),
            counters,
            state: Mutex::new(BlockState {
                next_to_download: (done + 1..=max_block).collect(),
                to_verify: BTreeMap::new(),
                done,
                max_block,
            }),
            verifier: Mutex::new(()),
            staged: Notify::new(),
        })
    }

    /// Smallest missing height and the consecutive missing heights after it,
    /// up to `batch_size` blocks.
    pub fn try_get_batch(&self) -> Option<(u64, u64)> {
        let mut state = self.state.lock();
        let from = state.next_to_download.pop_first()?;
        let mut to = from;
        while to - from + 1 < self.batch_size {
            match state.next_to_download.first() {
                Some(&next) if next == to + 1 => {
                    state.next_to_download.pop_first();
                    to = next;
                }
                _ => break,
            }
        }
        Some((from, to))
    }

    /// Stage the answer to a request for `from..=to`.
    ///
    /// The whole range is scheduled again if the response is absent, has
    /// the wrong length, or holds a block at the wrong position. Returns
    /// whether the response was usable.
    pub fn handle_response(
        &self,
        from: u64,
        to: u64,
        response: Option<Vec<BlockRecord>>,
        peer: Option<PeerId>,
    ) -> bool {
        let expected = (to + 1).saturating_sub(from) as usize;
        let blocks = match response {
            Some(blocks)
                if blocks.len() == expected
                    && blocks
                        .iter()
                        .zip(from..=to)
                        .all(|(block, height)| block.height() == height) =>
            {
                blocks
            }
            response => {
                warn!(
                    peer = ?peer,
                    from,
                    to,
                    received = response.as_ref().map(Vec::len),
                    "Invalid block range response"
                );
                let mut state = self.state.lock();
                state.next_to_download.extend(from..=to);
                return false;
            }
        };

        {
            let mut state = self.state.lock();
            let done = state.done;
            for block in blocks {
                if block.height() > done {
                    state.to_verify.entry(block.height()).or_insert(block);
                }
            }
        }
        self.staged.notify_one();
        true
    }

    /// Verify and persist staged blocks from `done + 1` upward.
    ///
    /// Stops at the first missing or invalid block; an invalid block is
    /// dropped and its height scheduled again. Returns the number of blocks
    /// persisted.
    ///
    /// The state lock is only held to take the staged run out and to put
    /// the outcome back, so storage access never blocks the fetch tasks.
    pub fn verify_pass(&self) -> Result<u64, SyncError> {
        let _pass = self.verifier.lock();

        let (done, staged) = {
            let mut state = self.state.lock();
            let done = state.done;
            let mut staged = Vec::new();
            while let Some(block) = state.to_verify.remove(&(done + staged.len() as u64 + 1)) {
                staged.push(block);
            }
            (done, staged)
        };
        if staged.is_empty() {
            return Ok(0);
        }

        let mut prev_hash = self
            .repository
            .block_by_height(done)?
            .ok_or_else(|| {
                SyncError::Invariant(format!("block {done} is verified but not stored"))
            })?
            .hash;

        let mut staged = staged.into_iter();
        let mut run: Vec<BlockRecord> = Vec::new();
        let mut rejected = None;
        for block in staged.by_ref() {
            let height = block.height();
            let result = block.verify().map_err(|err| err.to_string()).and_then(|()| {
                if block.header.prev_block_hash == prev_hash {
                    Ok(())
                } else {
                    Err(format!(
                        "previous hash {} does not match block {} hash {prev_hash}",
                        block.header.prev_block_hash,
                        height - 1
                    ))
                }
            });
            if let Err(reason) = result {
                warn!(height, reason = %reason, "Block verification failed");
                SyncCounters::add(&self.counters.blocks_rejected, 1);
                rejected = Some(height);
                break;
            }
            prev_hash = block.hash;
            run.push(block);
        }

        if !run.is_empty() {
            self.repository.persist_blocks(&run)?;
        }

        let verified = run.len() as u64;
        let mut state = self.state.lock();
        state.done += verified;
        let done = state.done;
        // Late answers may have staged heights of the run while it was unlocked.
        state.to_verify.retain(|height, _| *height > done);
        for block in staged {
            state.to_verify.entry(block.height()).or_insert(block);
        }
        if let Some(height) = rejected {
            state.to_verify.remove(&height);
            state.next_to_download.insert(height);
        }
        drop(state);

        if verified > 0 {
            SyncCounters::add(&self.counters.blocks_verified, verified);
            debug!(height = done, verified, "Blocks verified");
        }
        Ok(verified)
    }

    /// Run [`Self::verify_pass`] whenever blocks are staged, or every
    /// `interval` at the latest, until the last block is verified.
    pub async fn run_verifier(&self, interval: Duration) -> Result<(), SyncError> {
        loop {
            self.verify_pass()?;
            if self.is_done() {
                info!(height = self.done(), "Block download complete");
                return Ok(());
            }
            tokio::select! {
                _ = self.staged.notified() => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    pub fn is_done(&self) -> bool {
        let state = self.state.lock();
        state.done == state.max_block
    }

    pub fn done(&self) -> u64 {
        self.state.lock().done
    }

    pub fn max_block(&self) -> u64 {
        self.state.lock().max_block
    }

    pub fn staged_count(&self) -> usize {
        self.state.lock().to_verify.len()
    }
}
