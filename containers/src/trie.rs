use crate::types::NodeHash;
use alloy_primitives::{keccak256, Bytes};
use alloy_rlp::{BufMut, Decodable, Encodable, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire tag of an internal node.
pub const INTERNAL_NODE_TAG: u8 = 0;
/// Wire tag of a leaf node.
pub const LEAF_NODE_TAG: u8 = 1;

/// The six state tries, declared in canonical order.
///
/// The order is load-bearing: the aggregate state hash of a block is the
/// Keccak digest of the six root hashes concatenated in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrieName {
    Balances,
    Contracts,
    Storage,
    Transactions,
    Events,
    Validators,
}

impl TrieName {
    pub const COUNT: usize = 6;

    /// All tries in canonical order.
    pub const ALL: [TrieName; TrieName::COUNT] = [
        TrieName::Balances,
        TrieName::Contracts,
        TrieName::Storage,
        TrieName::Transactions,
        TrieName::Events,
        TrieName::Validators,
    ];

    /// Position of the trie in canonical order.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrieName::Balances => "Balances",
            TrieName::Contracts => "Contracts",
            TrieName::Storage => "Storage",
            TrieName::Transactions => "Transactions",
            TrieName::Events => "Events",
            TrieName::Validators => "Validators",
        }
    }
}

impl fmt::Display for TrieName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trie name: {0}")]
pub struct UnknownTrieName(pub String);

impl FromStr for TrieName {
    type Err = UnknownTrieName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|trie| trie.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownTrieName(s.to_string()))
    }
}

impl Encodable for TrieName {
    fn encode(&self, out: &mut dyn BufMut) {
        (self.index() as u8).encode(out)
    }

    fn length(&self) -> usize {
        (self.index() as u8).length()
    }
}

impl Decodable for TrieName {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let index = u8::decode(buf)?;
        TrieName::from_index(index as usize).ok_or(alloy_rlp::Error::Custom("unknown trie name"))
    }
}

/// A node of a content-addressed state trie.
///
/// A node is only valid under the hash it was requested by: recomputing
/// [`TrieNode::hash`] must reproduce that hash exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrieNode {
    Internal { children: Vec<NodeHash> },
    Leaf { value: Bytes },
}

impl TrieNode {
    pub fn leaf(value: impl Into<Bytes>) -> Self {
        TrieNode::Leaf {
            value: value.into(),
        }
    }

    pub fn internal(children: Vec<NodeHash>) -> Self {
        TrieNode::Internal { children }
    }

    /// Canonical encoding the content hash is computed over.
    pub fn encoded(&self) -> Vec<u8> {
        alloy_rlp::encode(self)
    }

    /// Content hash of the node.
    pub fn hash(&self) -> NodeHash {
        keccak256(self.encoded())
    }

    /// Child hashes to discover next. Empty for leaves.
    pub fn children(&self) -> &[NodeHash] {
        match self {
            TrieNode::Internal { children } => children,
            TrieNode::Leaf { .. } => &[],
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TrieNode::Leaf { .. })
    }

    fn payload_length(&self) -> usize {
        match self {
            TrieNode::Internal { children } => INTERNAL_NODE_TAG.length() + children.length(),
            TrieNode::Leaf { value } => LEAF_NODE_TAG.length() + value.length(),
        }
    }
}

impl Encodable for TrieNode {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        match self {
            TrieNode::Internal { children } => {
                INTERNAL_NODE_TAG.encode(out);
                children.encode(out);
            }
            TrieNode::Leaf { value } => {
                LEAF_NODE_TAG.encode(out);
                value.encode(out);
            }
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for TrieNode {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        if buf.len() < header.payload_length {
            return Err(alloy_rlp::Error::InputTooShort);
        }
        let started = buf.len();
        let node = match u8::decode(buf)? {
            INTERNAL_NODE_TAG => TrieNode::Internal {
                children: Vec::<NodeHash>::decode(buf)?,
            },
            LEAF_NODE_TAG => TrieNode::Leaf {
                value: Bytes::decode(buf)?,
            },
            _ => return Err(alloy_rlp::Error::Custom("unknown trie node tag")),
        };
        let consumed = started - buf.len();
        if consumed != header.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: header.payload_length,
                got: consumed,
            });
        }
        Ok(node)
    }
}
