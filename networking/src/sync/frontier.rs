//! Hybrid disk/memory frontier of a breadth-first trie download.
//!
//! The set of hashes discovered but not yet downloaded grows without bound
//! as the walk goes deeper, so it is kept on disk in numbered batches and
//! only a window of it lives in memory:
//!
//! ```text
//!  add(child) ──► incoming ──flush──► batch N (disk) ──load──► outgoing ──► pending ──► resolved
//!                                                                  ▲            │
//!                                                                  └── add(h) ──┘  (retry)
//! ```
//!
//! Batches are saved (deleted from disk, counter advanced) strictly in
//! order. Saving a batch first flushes `incoming`, so the children of every
//! node resolved so far are durable, and commits the trie storage, so the
//! nodes themselves are durable. Restarting from the saved counter therefore
//! never loses a discovered hash.

use containers::{NodeHash, TrieName};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use storage::{StorageError, TrieStorage};
use tracing::{debug, trace};

use super::repository::FastSyncRepository;

/// Snapshot of the frontier counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrontierStats {
    pub loaded: u64,
    pub saved: u64,
    pub total: u64,
    pub incoming: usize,
    pub outgoing: usize,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct FrontierState {
    loaded: u64,
    saved: u64,
    total: u64,
    incoming: Vec<NodeHash>,
    outgoing: VecDeque<(NodeHash, u64)>,
    queued: HashSet<NodeHash>,
    pending: HashMap<NodeHash, u64>,
    /// Unresolved hash count of every loaded, unsaved batch.
    remaining: BTreeMap<u64, usize>,
}

pub struct FrontierQueue {
    trie: TrieName,
    batch_size: usize,
    repository: Arc<FastSyncRepository>,
    storage: Arc<dyn TrieStorage>,
    state: Mutex<FrontierState>,
}

impl FrontierQueue {
    /// Open the frontier of `trie`, resuming from the persisted counters.
    pub fn new(
        trie: TrieName,
        batch_size: usize,
        repository: Arc<FastSyncRepository>,
        storage: Arc<dyn TrieStorage>,
    ) -> Self {
        let counters = repository.frontier_counters(trie);
        debug!(
            trie = %trie,
            saved = counters.saved,
            total = counters.total,
            "Opening frontier"
        );
        Self {
            trie,
            batch_size: batch_size.max(1),
            repository,
            storage,
            state: Mutex::new(FrontierState {
                loaded: counters.saved,
                saved: counters.saved,
                total: counters.total,
                ..Default::default()
            }),
        }
    }

    pub fn trie(&self) -> TrieName {
        self.trie
    }

    /// Lock the frontier for a sequence of operations that must not interleave
    /// with other callers.
    pub fn lock(&self) -> FrontierGuard<'_> {
        FrontierGuard {
            queue: self,
            state: self.state.lock(),
        }
    }

    pub fn add(&self, hash: NodeHash) -> Result<(), StorageError> {
        self.lock().add(hash)
    }

    pub fn try_get_next(&self) -> Result<Option<NodeHash>, StorageError> {
        self.lock().try_get_next()
    }

    pub fn mark_resolved(&self, hash: &NodeHash) -> Result<bool, StorageError> {
        self.lock().mark_resolved(hash)
    }

    pub fn is_pending(&self, hash: &NodeHash) -> bool {
        self.lock().is_pending(hash)
    }

    pub fn is_complete(&self) -> bool {
        self.lock().is_complete()
    }

    pub fn stats(&self) -> FrontierStats {
        let state = self.state.lock();
        FrontierStats {
            loaded: state.loaded,
            saved: state.saved,
            total: state.total,
            incoming: state.incoming.len(),
            outgoing: state.outgoing.len(),
            pending: state.pending.len(),
        }
    }
}

/// Exclusive access to a [`FrontierQueue`].
pub struct FrontierGuard<'a> {
    queue: &'a FrontierQueue,
    state: MutexGuard<'a, FrontierState>,
}

impl FrontierGuard<'_> {
    /// Queue a hash for download.
    ///
    /// A pending hash goes straight back to `outgoing` under its original
    /// batch. Anything else is a new discovery and is accumulated for the
    /// next batch.
    pub fn add(&mut self, hash: NodeHash) -> Result<(), StorageError> {
        if let Some(batch) = self.state.pending.remove(&hash) {
            self.state.queued.insert(hash);
            self.state.outgoing.push_back((hash, batch));
            return Ok(());
        }

        self.state.incoming.push(hash);
        if self.state.incoming.len() >= self.queue.batch_size {
            self.flush_incoming()?;
        }
        Ok(())
    }

    /// Next hash to request, or `None` when nothing is left to hand out.
    ///
    /// The returned hash is pending until resolved or added back.
    pub fn try_get_next(&mut self) -> Result<Option<NodeHash>, StorageError> {
        if self.state.outgoing.is_empty() {
            if self.state.loaded == self.state.total && !self.state.incoming.is_empty() {
                self.flush_incoming()?;
            }
            while self.state.loaded < self.state.total && self.state.outgoing.is_empty() {
                self.load_next_batch()?;
            }
        }

        let Some((hash, batch)) = self.state.outgoing.pop_front() else {
            return Ok(None);
        };
        self.state.queued.remove(&hash);
        self.state.pending.insert(hash, batch);
        Ok(Some(hash))
    }

    /// Record that the node of a pending hash is stored.
    ///
    /// Returns `false` without doing anything if the hash is not pending.
    pub fn mark_resolved(&mut self, hash: &NodeHash) -> Result<bool, StorageError> {
        let Some(batch) = self.state.pending.remove(hash) else {
            return Ok(false);
        };
        if let Some(remaining) = self.state.remaining.get_mut(&batch) {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                trace!(trie = %self.queue.trie, batch, "Frontier batch resolved");
            }
        }
        self.try_save_sequential()?;
        Ok(true)
    }

    pub fn is_pending(&self, hash: &NodeHash) -> bool {
        self.state.pending.contains_key(hash)
    }

    pub fn is_complete(&self) -> bool {
        self.state.loaded == self.state.total
            && self.state.incoming.is_empty()
            && self.state.outgoing.is_empty()
            && self.state.pending.is_empty()
    }

    fn flush_incoming(&mut self) -> Result<(), StorageError> {
        if self.state.incoming.is_empty() {
            return Ok(());
        }
        let seq = self.state.total + 1;
        self.queue
            .repository
            .save_frontier_batch(self.queue.trie, seq, &self.state.incoming)?;
        self.state.total = seq;
        self.state.incoming.clear();
        Ok(())
    }

    fn load_next_batch(&mut self) -> Result<(), StorageError> {
        let seq = self.state.loaded + 1;
        let hashes = self
            .queue
            .repository
            .load_frontier_batch(self.queue.trie, seq)?;

        let mut count = 0;
        for hash in hashes {
            if self.state.pending.contains_key(&hash)
                || self.state.queued.contains(&hash)
                || self.queue.storage.has_node(&hash)?
            {
                continue;
            }
            self.state.queued.insert(hash);
            self.state.outgoing.push_back((hash, seq));
            count += 1;
        }
        self.state.remaining.insert(seq, count);
        self.state.loaded = seq;
        debug!(trie = %self.queue.trie, batch = seq, size = count, "Frontier batch loaded");

        if count == 0 {
            self.try_save_sequential()?;
        }
        Ok(())
    }

    fn try_save_sequential(&mut self) -> Result<(), StorageError> {
        loop {
            let next = self.state.saved + 1;
            if self.state.remaining.get(&next) != Some(&0) {
                return Ok(());
            }
            self.flush_incoming()?;
            self.queue.storage.commit_batch()?;
            self.queue
                .repository
                .mark_frontier_batch_saved(self.queue.trie, next)?;
            self.state.remaining.remove(&next);
            self.state.saved = next;
            debug!(trie = %self.queue.trie, batch = next, "Frontier batch saved");
        }
    }
}
