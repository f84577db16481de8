use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Keccak-256 digest of a trie node's encoding. Nodes are addressed by it everywhere.
pub type NodeHash = B256;

/// Root hash of a trie without nodes. Such a trie needs no download.
pub const EMPTY_TRIE_HASH: NodeHash = B256::ZERO;

/// Local identifier assigned to a node by the trie storage engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Version of an empty trie.
    pub const EMPTY: NodeId = NodeId(0);

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_node_id() {
        assert!(NodeId::EMPTY.is_empty());
        assert!(!NodeId(7).is_empty());
        assert_eq!(NodeId::default(), NodeId::EMPTY);
    }

    #[test]
    fn test_node_id_serializes_as_number() {
        let json = serde_json::to_string(&NodeId(42)).unwrap();
        assert_eq!(json, "42");
    }
}
