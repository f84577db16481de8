use async_trait::async_trait;
use containers::{BlockRecord, NodeHash, TrieName, TrieNode};
use libp2p_identity::PeerId;
use tracing::debug;

use crate::req_resp::{SyncCodec, SyncRequest, SyncResponse};

/// Network requester trait for fast sync.
///
/// Abstracts the network layer to allow testing with mocks. Every method
/// returns `None` when the request failed for any reason.
#[async_trait]
pub trait NetworkRequester: Send + Sync + 'static {
    /// Request trie nodes by hash. The answer lists the nodes in request order.
    async fn request_nodes_by_hash(
        &self,
        peer_id: PeerId,
        hashes: Vec<NodeHash>,
    ) -> Option<Vec<TrieNode>>;

    /// Request blocks `from..=to`.
    async fn request_blocks_by_range(
        &self,
        peer_id: PeerId,
        from: u64,
        to: u64,
    ) -> Option<Vec<BlockRecord>>;

    /// Request the root hash of `trie` at block `height`.
    async fn request_root_hash(
        &self,
        peer_id: PeerId,
        trie: TrieName,
        height: u64,
    ) -> Option<NodeHash>;

    async fn request_latest_height(&self, peer_id: PeerId) -> Option<u64>;
}

/// Byte-level request/response transport.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn call(&self, peer_id: PeerId, protocol: &'static str, request: Vec<u8>)
        -> anyhow::Result<Vec<u8>>;
}

/// [`NetworkRequester`] speaking the fast sync wire protocol over an [`RpcTransport`].
pub struct RpcNetwork<T: RpcTransport> {
    transport: T,
}

impl<T: RpcTransport> RpcNetwork<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn request(&self, peer_id: PeerId, request: SyncRequest) -> Option<SyncResponse> {
        let protocol = request.protocol();
        let encoded = match SyncCodec::encode_request(&request) {
            Ok(encoded) => encoded,
            Err(err) => {
                debug!(peer = %peer_id, protocol, error = %err, "Failed to encode request");
                return None;
            }
        };

        let raw = match self.transport.call(peer_id, protocol, encoded).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!(peer = %peer_id, protocol, error = %err, "Request failed");
                return None;
            }
        };

        match SyncCodec::decode_response(&raw) {
            Ok(SyncResponse::Error(message)) => {
                debug!(peer = %peer_id, protocol, reason = %message, "Peer returned an error");
                None
            }
            Ok(response) => Some(response),
            Err(err) => {
                debug!(peer = %peer_id, protocol, error = %err, "Undecodable response");
                None
            }
        }
    }
}

#[async_trait]
impl<T: RpcTransport> NetworkRequester for RpcNetwork<T> {
    async fn request_nodes_by_hash(
        &self,
        peer_id: PeerId,
        hashes: Vec<NodeHash>,
    ) -> Option<Vec<TrieNode>> {
        match self.request(peer_id, SyncRequest::NodesByHash(hashes)).await? {
            SyncResponse::Nodes(nodes) => Some(nodes),
            _ => None,
        }
    }

    async fn request_blocks_by_range(
        &self,
        peer_id: PeerId,
        from: u64,
        to: u64,
    ) -> Option<Vec<BlockRecord>> {
        match self
            .request(peer_id, SyncRequest::BlocksByRange { from, to })
            .await?
        {
            SyncResponse::Blocks(blocks) => Some(blocks),
            _ => None,
        }
    }

    async fn request_root_hash(
        &self,
        peer_id: PeerId,
        trie: TrieName,
        height: u64,
    ) -> Option<NodeHash> {
        match self
            .request(peer_id, SyncRequest::RootHash { trie, height })
            .await?
        {
            SyncResponse::RootHash(root) => Some(root),
            _ => None,
        }
    }

    async fn request_latest_height(&self, peer_id: PeerId) -> Option<u64> {
        match self.request(peer_id, SyncRequest::LatestHeight).await? {
            SyncResponse::LatestHeight(height) => Some(height),
            _ => None,
        }
    }
}
