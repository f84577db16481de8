//! In-memory chain and network.
//!
//! [`ChainBuilder`] produces a deterministic chain (signed blocks plus six
//! tries) and [`MemoryTransport`] serves it to a syncing node through the
//! real wire codec, with per-peer fault injection.

use alloy_primitives::{keccak256, B256};
use async_trait::async_trait;
use containers::{
    BlockError, BlockHeader, BlockRecord, CheckpointDescriptor, NodeHash, StateRoots, TrieName,
    TrieNode, EMPTY_TRIE_HASH,
};
use k256::ecdsa::SigningKey;
use libp2p_identity::PeerId;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::req_resp::{SyncCodec, SyncRequest, SyncResponse};
use crate::sync::network::RpcTransport;
use crate::sync::provider::{SyncDataSource, SyncProvider};

#[derive(Clone, Debug)]
enum TrieContent {
    Empty,
    Generated { leaves: usize, fanout: usize },
    Explicit { root: NodeHash, nodes: Vec<TrieNode> },
}

/// Builder of a deterministic [`MemoryChain`].
#[derive(Clone, Debug)]
pub struct ChainBuilder {
    seed: u64,
    height: u64,
    signers: usize,
    tries: [TrieContent; TrieName::COUNT],
}

impl ChainBuilder {
    /// Ten blocks above genesis, one signer and six empty tries.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            height: 10,
            signers: 1,
            tries: std::array::from_fn(|_| TrieContent::Empty),
        }
    }

    pub fn height(mut self, height: u64) -> Self {
        self.height = height;
        self
    }

    pub fn signers(mut self, signers: usize) -> Self {
        self.signers = signers.max(1);
        self
    }

    /// Generate `trie` with `leaves` leaves under internal nodes of `fanout` children.
    pub fn trie(mut self, trie: TrieName, leaves: usize, fanout: usize) -> Self {
        self.tries[trie.index()] = TrieContent::Generated {
            leaves,
            fanout: fanout.max(2),
        };
        self
    }

    /// Use the given nodes for `trie`.
    pub fn trie_nodes(mut self, trie: TrieName, root: NodeHash, nodes: Vec<TrieNode>) -> Self {
        self.tries[trie.index()] = TrieContent::Explicit { root, nodes };
        self
    }

    pub fn build(self) -> Result<MemoryChain, BlockError> {
        let mut nodes = HashMap::new();
        let mut trie_hashes: [Vec<NodeHash>; TrieName::COUNT] = Default::default();
        let mut roots = StateRoots::default();

        for trie in TrieName::ALL {
            let (root, trie_nodes) = match &self.tries[trie.index()] {
                TrieContent::Empty => (EMPTY_TRIE_HASH, Vec::new()),
                TrieContent::Generated { leaves, fanout } => {
                    generate_trie(self.seed, trie, *leaves, *fanout)
                }
                TrieContent::Explicit { root, nodes } => (*root, nodes.clone()),
            };
            roots.set(trie, root);
            for node in trie_nodes {
                let hash = node.hash();
                trie_hashes[trie.index()].push(hash);
                nodes.insert(hash, node);
            }
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let signers: Vec<SigningKey> = (0..self.signers)
            .map(|_| SigningKey::random(&mut rng))
            .collect();

        let state_hash = roots.aggregate_hash();
        let mut blocks: Vec<BlockRecord> = Vec::with_capacity(self.height as usize + 1);
        for index in 0..=self.height {
            let header = BlockHeader {
                index,
                prev_block_hash: blocks.last().map(|block| block.hash).unwrap_or_default(),
                state_hash,
                timestamp: 1_700_000_000 + index * 5,
                nonce: self.seed,
                ..Default::default()
            };
            let transactions = vec![keccak256(
                [self.seed.to_be_bytes(), index.to_be_bytes()].concat(),
            )];
            blocks.push(BlockRecord::seal(header, transactions, &signers)?);
        }

        Ok(MemoryChain {
            nodes,
            trie_hashes,
            roots,
            blocks,
        })
    }
}

fn generate_trie(
    seed: u64,
    trie: TrieName,
    leaves: usize,
    fanout: usize,
) -> (NodeHash, Vec<TrieNode>) {
    if leaves == 0 {
        return (EMPTY_TRIE_HASH, Vec::new());
    }

    let mut nodes = Vec::new();
    let mut level: Vec<NodeHash> = (0..leaves)
        .map(|i| {
            let leaf = TrieNode::leaf(format!("{seed}/{trie}/{i}").into_bytes());
            let hash = leaf.hash();
            nodes.push(leaf);
            hash
        })
        .collect();

    while level.len() > 1 {
        level = level
            .chunks(fanout)
            .map(|children| {
                let node = TrieNode::internal(children.to_vec());
                let hash = node.hash();
                nodes.push(node);
                hash
            })
            .collect();
    }
    (level[0], nodes)
}

/// A fully synced chain held in memory.
#[derive(Debug)]
pub struct MemoryChain {
    nodes: HashMap<NodeHash, TrieNode>,
    trie_hashes: [Vec<NodeHash>; TrieName::COUNT],
    roots: StateRoots,
    blocks: Vec<BlockRecord>,
}

impl MemoryChain {
    pub fn genesis(&self) -> &BlockRecord {
        &self.blocks[0]
    }

    pub fn tip(&self) -> &BlockRecord {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn height(&self) -> u64 {
        self.tip().height()
    }

    pub fn block(&self, height: u64) -> Option<&BlockRecord> {
        self.blocks.get(height as usize)
    }

    pub fn state_roots(&self) -> StateRoots {
        self.roots
    }

    /// Checkpoint descriptor of the tip block.
    pub fn checkpoint(&self) -> CheckpointDescriptor {
        CheckpointDescriptor::new(self.height(), self.tip().hash, &self.roots)
    }

    /// Hashes of every node of `trie`, leaves first.
    pub fn trie_hashes(&self, trie: TrieName) -> &[NodeHash] {
        &self.trie_hashes[trie.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl SyncDataSource for MemoryChain {
    fn node_by_hash(&self, hash: &NodeHash) -> Option<TrieNode> {
        self.nodes.get(hash).cloned()
    }

    fn block_by_height(&self, height: u64) -> Option<BlockRecord> {
        self.block(height).cloned()
    }

    fn root_hash(&self, trie: TrieName, height: u64) -> Option<NodeHash> {
        (height == self.height()).then(|| self.roots.get(trie))
    }

    fn latest_height(&self) -> u64 {
        self.height()
    }
}

/// Misbehaviour of a simulated peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PeerFault {
    #[default]
    Honest,
    /// Every request fails at once.
    Offline,
    /// Requests never get an answer.
    Silent,
    /// Node contents are altered so their hashes no longer match.
    CorruptNodes,
    /// The last item of every node or block list is dropped.
    Truncated,
    /// Root hashes are replaced with a wrong value.
    WrongRoots,
}

struct MemoryPeer {
    provider: Arc<SyncProvider<Arc<MemoryChain>>>,
    fault: PeerFault,
}

/// [`RpcTransport`] connecting to in-memory peers.
#[derive(Default)]
pub struct MemoryTransport {
    peers: RwLock<HashMap<PeerId, MemoryPeer>>,
    withheld: RwLock<HashSet<NodeHash>>,
    node_requests: Mutex<HashMap<NodeHash, usize>>,
    latency: Duration,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn add_peer(&self, chain: Arc<MemoryChain>, fault: PeerFault) -> PeerId {
        let peer_id = PeerId::random();
        self.peers.write().insert(
            peer_id,
            MemoryPeer {
                provider: Arc::new(SyncProvider::new(chain)),
                fault,
            },
        );
        peer_id
    }

    pub fn set_fault(&self, peer_id: &PeerId, fault: PeerFault) {
        if let Some(peer) = self.peers.write().get_mut(peer_id) {
            peer.fault = fault;
        }
    }

    /// Make every peer act as if it did not have these nodes.
    pub fn withhold(&self, hashes: impl IntoIterator<Item = NodeHash>) {
        self.withheld.write().extend(hashes);
    }

    pub fn release_withheld(&self) {
        self.withheld.write().clear();
    }

    /// How many times `hash` was requested since the last reset.
    pub fn node_request_count(&self, hash: &NodeHash) -> usize {
        self.node_requests.lock().get(hash).copied().unwrap_or_default()
    }

    pub fn total_node_requests(&self) -> usize {
        self.node_requests.lock().values().sum()
    }

    pub fn reset_request_counts(&self) {
        self.node_requests.lock().clear();
    }

    fn answer(&self, provider: &SyncProvider<Arc<MemoryChain>>, request: SyncRequest) -> SyncResponse {
        match request {
            SyncRequest::NodesByHash(hashes) => {
                let withheld = self.withheld.read();
                let mut counts = self.node_requests.lock();
                for hash in &hashes {
                    *counts.entry(*hash).or_default() += 1;
                }
                let served = hashes
                    .into_iter()
                    .take_while(|hash| !withheld.contains(hash))
                    .collect();
                provider.handle(SyncRequest::NodesByHash(served))
            }
            request => provider.handle(request),
        }
    }
}

fn apply_fault(fault: PeerFault, response: SyncResponse) -> SyncResponse {
    match (fault, response) {
        (PeerFault::CorruptNodes, SyncResponse::Nodes(nodes)) => SyncResponse::Nodes(
            nodes
                .into_iter()
                .map(|node| match node {
                    TrieNode::Leaf { value } => {
                        let mut value = value.to_vec();
                        value.push(0xff);
                        TrieNode::leaf(value)
                    }
                    TrieNode::Internal { mut children } => {
                        children.reverse();
                        children.push(B256::repeat_byte(0xff));
                        TrieNode::internal(children)
                    }
                })
                .collect(),
        ),
        (PeerFault::Truncated, SyncResponse::Nodes(mut nodes)) => {
            nodes.pop();
            SyncResponse::Nodes(nodes)
        }
        (PeerFault::Truncated, SyncResponse::Blocks(mut blocks)) => {
            blocks.pop();
            SyncResponse::Blocks(blocks)
        }
        (PeerFault::WrongRoots, SyncResponse::RootHash(root)) => {
            SyncResponse::RootHash(keccak256(root))
        }
        (_, response) => response,
    }
}

#[async_trait]
impl RpcTransport for MemoryTransport {
    async fn call(
        &self,
        peer_id: PeerId,
        protocol: &'static str,
        request: Vec<u8>,
    ) -> anyhow::Result<Vec<u8>> {
        let (provider, fault) = {
            let peers = self.peers.read();
            let peer = peers
                .get(&peer_id)
                .ok_or_else(|| anyhow::anyhow!("unknown peer {peer_id}"))?;
            (peer.provider.clone(), peer.fault)
        };

        match fault {
            PeerFault::Offline => anyhow::bail!("peer {peer_id} is offline"),
            PeerFault::Silent => std::future::pending::<()>().await,
            _ => {}
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let request = SyncCodec::decode_request(&request)?;
        trace!(peer = %peer_id, protocol, "Memory peer serving request");
        let response = apply_fault(fault, self.answer(&provider, request));
        Ok(SyncCodec::encode_response(&response)?)
    }
}
