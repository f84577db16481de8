//! Durable bookkeeping of a fast sync run.
//!
//! All progress lives in a single [`SyncProgress`] value. Every mutation is
//! written in the same [`WriteBatch`] as the data it accounts for, so a crash
//! never leaves the counters and the stored batches disagreeing.

use alloy_rlp::Decodable;
use containers::{BlockRecord, Checkpoint, NodeHash, TrieName};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{KeyValueStore, StorageError, WriteBatch};
use tracing::{debug, info};

pub const PROGRESS_KEY: &[u8] = b"checkpoint.progress";
pub const COMPLETE_KEY: &[u8] = b"checkpoint.complete";
pub const BLOCK_HEIGHT_KEY: &[u8] = b"blocks.height";

pub fn frontier_batch_key(trie: TrieName, seq: u64) -> Vec<u8> {
    format!("checkpoint.frontierBatch.{trie}.{seq}").into_bytes()
}

pub fn block_key(height: u64) -> Vec<u8> {
    format!("blocks.{height}").into_bytes()
}

/// Frontier batch counters of one trie. Batches are numbered from 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontierCounters {
    /// Batches whose every hash is resolved, deleted from the store.
    pub saved: u64,
    /// Batches ever written.
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub checkpoint: Checkpoint,
    /// Number of tries, in canonical order, fully downloaded.
    pub tries_completed: usize,
    pub frontier: [FrontierCounters; TrieName::COUNT],
}

impl SyncProgress {
    pub fn new(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint,
            tries_completed: 0,
            frontier: Default::default(),
        }
    }

    pub fn is_trie_complete(&self, trie: TrieName) -> bool {
        trie.index() < self.tries_completed
    }
}

pub struct FastSyncRepository {
    store: Arc<dyn KeyValueStore>,
    progress: Mutex<Option<SyncProgress>>,
}

impl FastSyncRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let progress = match store.get(PROGRESS_KEY)? {
            Some(raw) => Some(
                serde_json::from_slice(&raw)
                    .map_err(|err| StorageError::corrupt(PROGRESS_KEY, err))?,
            ),
            None => None,
        };
        Ok(Self {
            store,
            progress: Mutex::new(progress),
        })
    }

    pub fn progress(&self) -> Option<SyncProgress> {
        self.progress.lock().clone()
    }

    /// Persist fresh progress for a verified checkpoint.
    pub fn init_progress(&self, checkpoint: Checkpoint) -> Result<SyncProgress, StorageError> {
        let mut guard = self.progress.lock();
        let progress = SyncProgress::new(checkpoint);
        let mut batch = WriteBatch::new();
        put_progress(&mut batch, &progress)?;
        self.store.write(batch)?;
        *guard = Some(progress.clone());
        info!(
            height = progress.checkpoint.height,
            block_hash = %progress.checkpoint.block_hash,
            "Fast sync progress initialized"
        );
        Ok(progress)
    }

    pub fn frontier_counters(&self, trie: TrieName) -> FrontierCounters {
        self.progress
            .lock()
            .as_ref()
            .map(|progress| progress.frontier[trie.index()])
            .unwrap_or_default()
    }

    /// Write batch `seq` of `trie`. It must be the next batch after the last one written.
    pub fn save_frontier_batch(
        &self,
        trie: TrieName,
        seq: u64,
        hashes: &[NodeHash],
    ) -> Result<(), StorageError> {
        self.update_progress(|progress, batch| {
            let counters = &mut progress.frontier[trie.index()];
            if seq != counters.total + 1 {
                return Err(StorageError::Backend(format!(
                    "frontier batch {seq} of {trie} written out of order, total is {}",
                    counters.total
                )));
            }
            counters.total = seq;
            let raw: Vec<u8> = hashes.iter().flat_map(|hash| hash.0).collect();
            batch.put(frontier_batch_key(trie, seq), raw);
            Ok(())
        })?;
        debug!(trie = %trie, seq, size = hashes.len(), "Frontier batch written");
        Ok(())
    }

    pub fn load_frontier_batch(
        &self,
        trie: TrieName,
        seq: u64,
    ) -> Result<Vec<NodeHash>, StorageError> {
        let key = frontier_batch_key(trie, seq);
        let raw = self
            .store
            .get(&key)?
            .ok_or_else(|| StorageError::corrupt(&key, "frontier batch is missing"))?;
        if raw.len() % 32 != 0 {
            return Err(StorageError::corrupt(
                &key,
                format!("length {} is not a multiple of 32", raw.len()),
            ));
        }
        Ok(raw.chunks_exact(32).map(NodeHash::from_slice).collect())
    }

    /// Mark batch `seq` of `trie` resolved and delete it. Batches are saved strictly in order.
    pub fn mark_frontier_batch_saved(&self, trie: TrieName, seq: u64) -> Result<(), StorageError> {
        self.update_progress(|progress, batch| {
            let counters = &mut progress.frontier[trie.index()];
            if seq != counters.saved + 1 || seq > counters.total {
                return Err(StorageError::Backend(format!(
                    "frontier batch {seq} of {trie} saved out of order, saved is {}",
                    counters.saved
                )));
            }
            counters.saved = seq;
            batch.delete(frontier_batch_key(trie, seq));
            Ok(())
        })
    }

    pub fn mark_trie_complete(&self, trie: TrieName) -> Result<(), StorageError> {
        self.update_progress(|progress, _| {
            progress.tries_completed = progress.tries_completed.max(trie.index() + 1);
            Ok(())
        })?;
        info!(trie = %trie, "Trie download complete");
        Ok(())
    }

    pub fn mark_sync_complete(&self) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(COMPLETE_KEY, vec![1u8]);
        self.store.write(batch)
    }

    pub fn is_sync_complete(&self) -> Result<bool, StorageError> {
        self.store.contains(COMPLETE_KEY)
    }

    /// Store a contiguous run of blocks and advance the block height in one write.
    pub fn persist_blocks(&self, blocks: &[BlockRecord]) -> Result<(), StorageError> {
        let Some(last) = blocks.last() else {
            return Ok(());
        };
        let mut batch = WriteBatch::new();
        for block in blocks {
            batch.put(block_key(block.height()), alloy_rlp::encode(block));
        }
        batch.put(BLOCK_HEIGHT_KEY, last.height().to_be_bytes().to_vec());
        self.store.write(batch)
    }

    pub fn block_by_height(&self, height: u64) -> Result<Option<BlockRecord>, StorageError> {
        let key = block_key(height);
        let Some(raw) = self.store.get(&key)? else {
            return Ok(None);
        };
        let block = BlockRecord::decode(&mut raw.as_slice())
            .map_err(|err| StorageError::corrupt(&key, err))?;
        Ok(Some(block))
    }

    /// Highest block persisted, `None` before the genesis block is stored.
    pub fn current_block_height(&self) -> Result<Option<u64>, StorageError> {
        let Some(raw) = self.store.get(BLOCK_HEIGHT_KEY)? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = raw
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::corrupt(BLOCK_HEIGHT_KEY, "expected 8 bytes"))?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    fn update_progress<F>(&self, update: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut SyncProgress, &mut WriteBatch) -> Result<(), StorageError>,
    {
        let mut guard = self.progress.lock();
        let mut progress = guard
            .clone()
            .ok_or_else(|| StorageError::Backend("sync progress is not initialized".into()))?;
        let mut batch = WriteBatch::new();
        update(&mut progress, &mut batch)?;
        put_progress(&mut batch, &progress)?;
        self.store.write(batch)?;
        *guard = Some(progress);
        Ok(())
    }
}

fn put_progress(batch: &mut WriteBatch, progress: &SyncProgress) -> Result<(), StorageError> {
    let raw = serde_json::to_vec(progress).map_err(|err| StorageError::corrupt(PROGRESS_KEY, err))?;
    batch.put(PROGRESS_KEY, raw);
    Ok(())
}
