use alloy_primitives::B256;
use containers::{BlockError, IncompleteCheckpoint, NodeHash, TrieName};
use storage::StorageError;

/// Reasons a checkpoint is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Incomplete(#[from] IncompleteCheckpoint),
    #[error("no peer returned the checkpoint block at height {height}")]
    BlockUnavailable { height: u64 },
    #[error("no peer returned the root hash of trie {trie}")]
    RootUnavailable { trie: TrieName },
    #[error("checkpoint block failed verification: {0}")]
    InvalidBlock(#[from] BlockError),
    #[error("block hash {fetched} differs from claimed {claimed}")]
    BlockHashMismatch { claimed: B256, fetched: B256 },
    #[error("aggregate of fetched roots {computed} differs from block state hash {expected}")]
    StateHashMismatch { expected: B256, computed: B256 },
    #[error("claimed root {claimed} of trie {trie} differs from fetched root {fetched}")]
    RootMismatch {
        trie: TrieName,
        claimed: NodeHash,
        fetched: NodeHash,
    },
}

/// Errors that end a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("fast sync already completed")]
    AlreadyCompleted,
    #[error("checkpoint rejected: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("no peers to sync from")]
    NoPeers,
    #[error("sync invariant violated: {0}")]
    Invariant(String),
    #[error("sync task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Task(err.to_string())
    }
}
