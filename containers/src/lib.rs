pub mod block;
pub mod checkpoint;
pub mod merkle;
pub mod trie;
pub mod types;

pub use block::{BlockError, BlockHeader, BlockRecord, ValidatorSignature};
pub use checkpoint::{Checkpoint, CheckpointDescriptor, IncompleteCheckpoint, StateRoots};
pub use merkle::merkle_root;
pub use trie::{TrieName, TrieNode, UnknownTrieName};
pub use types::{NodeHash, NodeId, EMPTY_TRIE_HASH};

pub use alloy_primitives::{Bytes, B256};
