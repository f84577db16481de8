mod block_fetch_tests;
mod node_fetch_tests;
mod peer_pool_tests;
mod provider_tests;

use alloy_primitives::{keccak256, B256};
use containers::{Checkpoint, NodeHash, StateRoots};
use std::sync::Arc;
use storage::{MemoryKvStore, MemoryTrieStorage};

use crate::sync::{FastSyncRepository, SyncConfig};

/// Small batches and short timeouts so every code path runs in a few milliseconds.
fn test_config() -> SyncConfig {
    SyncConfig {
        frontier_batch_size: 4,
        node_request_batch_size: 3,
        block_batch_size: 4,
        request_timeout_ms: 200,
        peer_penalty_secs: 0,
        poll_interval_ms: 5,
        verifier_interval_ms: 10,
        max_in_flight_requests: 4,
        checkpoint_attempts: 3,
        stall_alert_secs: 5,
        ..SyncConfig::default()
    }
}

fn test_hash(i: u64) -> NodeHash {
    keccak256(i.to_be_bytes())
}

fn test_checkpoint() -> Checkpoint {
    Checkpoint {
        height: 1,
        block_hash: B256::repeat_byte(0xaa),
        state_roots: StateRoots::default(),
    }
}

struct Stores {
    kv: Arc<MemoryKvStore>,
    tries: Arc<MemoryTrieStorage>,
    repository: Arc<FastSyncRepository>,
}

/// Fresh stores with sync progress initialized.
fn initialized_stores() -> Stores {
    let kv = Arc::new(MemoryKvStore::new());
    let repository = Arc::new(FastSyncRepository::new(kv.clone()).unwrap());
    repository.init_progress(test_checkpoint()).unwrap();
    Stores {
        kv,
        tries: Arc::new(MemoryTrieStorage::new()),
        repository,
    }
}
