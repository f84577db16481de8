use containers::{BlockRecord, NodeHash, TrieName, TrieNode};
use tracing::trace;

use super::config::{MAX_BLOCKS_PER_REQUEST, MAX_NODES_PER_REQUEST};
use crate::req_resp::{CodecError, SyncCodec, SyncRequest, SyncResponse};

/// Local chain data a node serves to syncing peers.
pub trait SyncDataSource: Send + Sync {
    fn node_by_hash(&self, hash: &NodeHash) -> Option<TrieNode>;

    fn block_by_height(&self, height: u64) -> Option<BlockRecord>;

    fn root_hash(&self, trie: TrieName, height: u64) -> Option<NodeHash>;

    fn latest_height(&self) -> u64;
}

impl<S: SyncDataSource + ?Sized> SyncDataSource for std::sync::Arc<S> {
    fn node_by_hash(&self, hash: &NodeHash) -> Option<TrieNode> {
        (**self).node_by_hash(hash)
    }

    fn block_by_height(&self, height: u64) -> Option<BlockRecord> {
        (**self).block_by_height(height)
    }

    fn root_hash(&self, trie: TrieName, height: u64) -> Option<NodeHash> {
        (**self).root_hash(trie, height)
    }

    fn latest_height(&self) -> u64 {
        (**self).latest_height()
    }
}

/// Serving side of the fast sync protocols.
pub struct SyncProvider<S: SyncDataSource> {
    source: S,
}

impl<S: SyncDataSource> SyncProvider<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Answer a request.
    ///
    /// Nodes are returned in request order and the answer stops at the first
    /// unknown hash, so a requester can tell an incomplete answer by its
    /// length. Block ranges stop at the first missing height.
    pub fn handle(&self, request: SyncRequest) -> SyncResponse {
        trace!(protocol = request.protocol(), "Serving fast sync request");
        match request {
            SyncRequest::NodesByHash(hashes) => {
                if hashes.len() > MAX_NODES_PER_REQUEST {
                    return SyncResponse::Error(format!(
                        "too many nodes requested: {} > {MAX_NODES_PER_REQUEST}",
                        hashes.len()
                    ));
                }
                SyncResponse::Nodes(
                    hashes
                        .iter()
                        .map_while(|hash| self.source.node_by_hash(hash))
                        .collect(),
                )
            }
            SyncRequest::BlocksByRange { from, to } => {
                if from > to {
                    return SyncResponse::Error(format!("empty block range {from}..={to}"));
                }
                let to = to.min(from.saturating_add(MAX_BLOCKS_PER_REQUEST - 1));
                SyncResponse::Blocks(
                    (from..=to)
                        .map_while(|height| self.source.block_by_height(height))
                        .collect(),
                )
            }
            SyncRequest::RootHash { trie, height } => match self.source.root_hash(trie, height) {
                Some(root) => SyncResponse::RootHash(root),
                None => SyncResponse::Error(format!("no state of {trie} at height {height}")),
            },
            SyncRequest::LatestHeight => SyncResponse::LatestHeight(self.source.latest_height()),
        }
    }

    /// Decode a request, answer it and encode the answer.
    pub fn handle_bytes(&self, request: &[u8]) -> Result<Vec<u8>, CodecError> {
        let response = match SyncCodec::decode_request(request) {
            Ok(request) => self.handle(request),
            Err(CodecError::TooLarge { requested, max }) => {
                SyncResponse::Error(format!("too many items requested: {requested} > {max}"))
            }
            Err(err) => return Err(err),
        };
        SyncCodec::encode_response(&response)
    }
}
