use crate::{NodeHash, TrieName};
use alloy_primitives::{keccak256, B256};
use serde::{Deserialize, Serialize};

/// Root hashes of the six tries, stored in canonical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateRoots(pub [NodeHash; TrieName::COUNT]);

impl StateRoots {
    pub fn get(&self, trie: TrieName) -> NodeHash {
        self.0[trie.index()]
    }

    pub fn set(&mut self, trie: TrieName, root: NodeHash) {
        self.0[trie.index()] = root;
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrieName, NodeHash)> + '_ {
        TrieName::ALL.into_iter().zip(self.0.iter().copied())
    }

    /// `keccak256(root_0 ‖ ... ‖ root_5)` in canonical order.
    ///
    /// Must equal the `state_hash` field of the block the roots belong to.
    pub fn aggregate_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(32 * TrieName::COUNT);
        for root in &self.0 {
            buf.extend_from_slice(root.as_slice());
        }
        keccak256(buf)
    }
}

/// Sync target as supplied by whoever starts the sync. Not trusted until cross-checked.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDescriptor {
    pub block_height: Option<u64>,
    pub block_hash: Option<B256>,
    pub state_hashes: Vec<(TrieName, NodeHash)>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IncompleteCheckpoint {
    #[error("checkpoint block height is missing")]
    MissingHeight,
    #[error("checkpoint block hash is missing")]
    MissingBlockHash,
    #[error("expected {expected} state hashes, got {got}")]
    StateHashCount { expected: usize, got: usize },
    #[error("no state hash for trie {0}")]
    MissingStateHash(TrieName),
    #[error("more than one state hash for trie {0}")]
    DuplicateStateHash(TrieName),
}

/// A complete checkpoint: target block and the six trie roots at that block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub height: u64,
    pub block_hash: B256,
    pub state_roots: StateRoots,
}

impl CheckpointDescriptor {
    pub fn new(height: u64, block_hash: B256, state_roots: &StateRoots) -> Self {
        Self {
            block_height: Some(height),
            block_hash: Some(block_hash),
            state_hashes: state_roots.iter().collect(),
        }
    }

    pub fn state_hash(&self, trie: TrieName) -> Option<NodeHash> {
        self.state_hashes
            .iter()
            .find(|(name, _)| *name == trie)
            .map(|(_, hash)| *hash)
    }

    /// Check that every field is present and exactly one root is given per trie.
    pub fn complete(&self) -> Result<Checkpoint, IncompleteCheckpoint> {
        let height = self.block_height.ok_or(IncompleteCheckpoint::MissingHeight)?;
        let block_hash = self
            .block_hash
            .ok_or(IncompleteCheckpoint::MissingBlockHash)?;
        if self.state_hashes.len() != TrieName::COUNT {
            return Err(IncompleteCheckpoint::StateHashCount {
                expected: TrieName::COUNT,
                got: self.state_hashes.len(),
            });
        }

        let mut state_roots = StateRoots::default();
        for trie in TrieName::ALL {
            let mut matching = self.state_hashes.iter().filter(|(name, _)| *name == trie);
            let (_, root) = matching
                .next()
                .ok_or(IncompleteCheckpoint::MissingStateHash(trie))?;
            if matching.next().is_some() {
                return Err(IncompleteCheckpoint::DuplicateStateHash(trie));
            }
            state_roots.set(trie, *root);
        }

        Ok(Checkpoint {
            height,
            block_hash,
            state_roots,
        })
    }
}
