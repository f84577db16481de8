use crate::StorageError;
use containers::{NodeHash, NodeId, TrieName, TrieNode, EMPTY_TRIE_HASH};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Node store the downloaded tries are written to.
///
/// Nodes become durable only on [`TrieStorage::commit_batch`]. A node added
/// but not committed is visible to reads and lost on a crash.
pub trait TrieStorage: Send + Sync {
    fn has_node(&self, hash: &NodeHash) -> Result<bool, StorageError>;

    fn get_id_by_hash(&self, hash: &NodeHash) -> Result<Option<NodeId>, StorageError>;

    fn get_node(&self, id: NodeId) -> Result<Option<TrieNode>, StorageError>;

    /// Store a node. Adding a node that is already stored returns its existing id.
    fn add_node(&self, node: TrieNode) -> Result<NodeId, StorageError>;

    /// Make every node added so far durable.
    fn commit_batch(&self) -> Result<(), StorageError>;

    /// Point `trie` at the node `root`. [`NodeId::EMPTY`] is the empty trie.
    fn set_trie_version(&self, trie: TrieName, root: NodeId) -> Result<(), StorageError>;

    /// Record the current trie versions as the state snapshot at `height`.
    fn commit_snapshot(&self, height: u64) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct Nodes {
    next_id: u64,
    committed: HashMap<NodeId, TrieNode>,
    committed_ids: HashMap<NodeHash, NodeId>,
    uncommitted: HashMap<NodeId, TrieNode>,
    uncommitted_ids: HashMap<NodeHash, NodeId>,
    versions: [NodeId; TrieName::COUNT],
    snapshots: BTreeMap<u64, [NodeId; TrieName::COUNT]>,
}

impl Nodes {
    fn id_of(&self, hash: &NodeHash) -> Option<NodeId> {
        self.committed_ids
            .get(hash)
            .or_else(|| self.uncommitted_ids.get(hash))
            .copied()
    }

    fn node(&self, id: NodeId) -> Option<&TrieNode> {
        self.committed.get(&id).or_else(|| self.uncommitted.get(&id))
    }
}

/// In-memory [`TrieStorage`] that keeps committed and uncommitted nodes apart.
#[derive(Debug, Default)]
pub struct MemoryTrieStorage {
    nodes: RwLock<Nodes>,
}

impl MemoryTrieStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every node added since the last commit, as a crash would.
    pub fn discard_uncommitted(&self) -> usize {
        let mut nodes = self.nodes.write();
        let dropped = nodes.uncommitted.len();
        nodes.uncommitted.clear();
        nodes.uncommitted_ids.clear();
        dropped
    }

    pub fn node_count(&self) -> usize {
        let nodes = self.nodes.read();
        nodes.committed.len() + nodes.uncommitted.len()
    }

    pub fn committed_node_count(&self) -> usize {
        self.nodes.read().committed.len()
    }

    pub fn trie_version(&self, trie: TrieName) -> NodeId {
        self.nodes.read().versions[trie.index()]
    }

    pub fn snapshot(&self, height: u64) -> Option<[NodeId; TrieName::COUNT]> {
        self.nodes.read().snapshots.get(&height).copied()
    }

    pub fn node_by_hash(&self, hash: &NodeHash) -> Option<TrieNode> {
        let nodes = self.nodes.read();
        nodes.id_of(hash).and_then(|id| nodes.node(id).cloned())
    }

    /// Walk the trie under `root` and count its distinct nodes.
    ///
    /// Fails with [`StorageError::MissingNode`] if any reachable node is absent,
    /// so a successful walk proves the trie is complete.
    pub fn reachable_nodes(&self, root: &NodeHash) -> Result<usize, StorageError> {
        if *root == EMPTY_TRIE_HASH {
            return Ok(0);
        }

        let nodes = self.nodes.read();
        let mut seen = HashSet::from([*root]);
        let mut queue = VecDeque::from([*root]);
        while let Some(hash) = queue.pop_front() {
            let node = nodes
                .id_of(&hash)
                .and_then(|id| nodes.node(id))
                .ok_or(StorageError::MissingNode(hash))?;
            for child in node.children() {
                if seen.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
        Ok(seen.len())
    }
}

impl TrieStorage for MemoryTrieStorage {
    fn has_node(&self, hash: &NodeHash) -> Result<bool, StorageError> {
        Ok(self.nodes.read().id_of(hash).is_some())
    }

    fn get_id_by_hash(&self, hash: &NodeHash) -> Result<Option<NodeId>, StorageError> {
        Ok(self.nodes.read().id_of(hash))
    }

    fn get_node(&self, id: NodeId) -> Result<Option<TrieNode>, StorageError> {
        Ok(self.nodes.read().node(id).cloned())
    }

    fn add_node(&self, node: TrieNode) -> Result<NodeId, StorageError> {
        let hash = node.hash();
        let mut nodes = self.nodes.write();
        if let Some(id) = nodes.id_of(&hash) {
            return Ok(id);
        }

        nodes.next_id += 1;
        let id = NodeId(nodes.next_id);
        nodes.uncommitted_ids.insert(hash, id);
        nodes.uncommitted.insert(id, node);
        Ok(id)
    }

    fn commit_batch(&self) -> Result<(), StorageError> {
        let mut nodes = self.nodes.write();
        let Nodes {
            committed,
            committed_ids,
            uncommitted,
            uncommitted_ids,
            ..
        } = &mut *nodes;
        let count = uncommitted.len();
        committed.extend(uncommitted.drain());
        committed_ids.extend(uncommitted_ids.drain());
        debug!(nodes = count, "Committed trie nodes");
        Ok(())
    }

    fn set_trie_version(&self, trie: TrieName, root: NodeId) -> Result<(), StorageError> {
        let mut nodes = self.nodes.write();
        if !root.is_empty() && nodes.node(root).is_none() {
            return Err(StorageError::Backend(format!(
                "trie {trie} cannot point at unknown node {root}"
            )));
        }
        nodes.versions[trie.index()] = root;
        Ok(())
    }

    fn commit_snapshot(&self, height: u64) -> Result<(), StorageError> {
        let mut nodes = self.nodes.write();
        let versions = nodes.versions;
        nodes.snapshots.insert(height, versions);
        debug!(height, "Committed state snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_duplicate_add_returns_same_id() {
        let storage = MemoryTrieStorage::new();
        let first = storage.add_node(TrieNode::leaf(vec![1u8])).unwrap();
        let second = storage.add_node(TrieNode::leaf(vec![1u8])).unwrap();
        assert_eq!(first, second);
        assert_eq!(storage.node_count(), 1);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_discard_drops_only_uncommitted() {
        let storage = MemoryTrieStorage::new();
        let kept = TrieNode::leaf(vec![1u8]);
        let lost = TrieNode::leaf(vec![2u8]);
        storage.add_node(kept.clone()).unwrap();
        storage.commit_batch().unwrap();
        storage.add_node(lost.clone()).unwrap();

        assert_eq!(storage.discard_uncommitted(), 1);
        assert!(storage.has_node(&kept.hash()).unwrap());
        assert!(!storage.has_node(&lost.hash()).unwrap());
    }

    #[test]
    fn test_reachable_nodes_detects_missing_child() {
        let storage = MemoryTrieStorage::new();
        let a = TrieNode::leaf(vec![1u8]);
        let b = TrieNode::leaf(vec![2u8]);
        let root = TrieNode::internal(vec![a.hash(), b.hash()]);
        storage.add_node(root.clone()).unwrap();
        storage.add_node(a).unwrap();

        assert_eq!(
            storage.reachable_nodes(&root.hash()),
            Err(StorageError::MissingNode(b.hash()))
        );

        storage.add_node(b).unwrap();
        assert_eq!(storage.reachable_nodes(&root.hash()), Ok(3));
        assert_eq!(storage.reachable_nodes(&EMPTY_TRIE_HASH), Ok(0));
    }

    #[test]
    fn test_snapshot_records_versions() {
        let storage = MemoryTrieStorage::new();
        let id = storage.add_node(TrieNode::leaf(vec![1u8])).unwrap();
        storage.set_trie_version(TrieName::Storage, id).unwrap();
        storage.commit_snapshot(12).unwrap();

        let snapshot = storage.snapshot(12).unwrap();
        assert_eq!(snapshot[TrieName::Storage.index()], id);
        assert_eq!(snapshot[TrieName::Balances.index()], NodeId::EMPTY);
        assert!(storage
            .set_trie_version(TrieName::Events, NodeId(999))
            .is_err());
    }
}
