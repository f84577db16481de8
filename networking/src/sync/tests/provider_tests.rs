use crate::memory::{ChainBuilder, MemoryChain};
use crate::req_resp::{SyncCodec, SyncRequest, SyncResponse};
use crate::sync::{SyncDataSource, SyncProvider, MAX_NODES_PER_REQUEST};
use alloy_primitives::B256;
use containers::{TrieName, TrieNode};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn provider() -> SyncProvider<Arc<MemoryChain>> {
    let chain = ChainBuilder::new(5)
        .height(3)
        .trie(TrieName::Contracts, 6, 2)
        .build()
        .unwrap();
    SyncProvider::new(Arc::new(chain))
}

#[test]
fn test_nodes_are_served_in_request_order() {
    let provider = provider();
    let hashes: Vec<_> = provider
        .source()
        .trie_hashes(TrieName::Contracts)
        .iter()
        .rev()
        .copied()
        .collect();

    let SyncResponse::Nodes(nodes) = provider.handle(SyncRequest::NodesByHash(hashes.clone()))
    else {
        panic!("expected nodes");
    };
    let served: Vec<_> = nodes.iter().map(TrieNode::hash).collect();
    assert_eq!(served, hashes);
}

#[test]
fn test_nodes_stop_at_first_unknown_hash() {
    let provider = provider();
    let known = provider.source().trie_hashes(TrieName::Contracts).to_vec();
    let request = vec![known[0], B256::repeat_byte(9), known[1]];

    assert_eq!(
        provider.handle(SyncRequest::NodesByHash(request)),
        SyncResponse::Nodes(vec![provider.source().node_by_hash(&known[0]).unwrap()])
    );
}

#[test]
fn test_block_range_is_clamped_to_the_chain() {
    let provider = provider();

    let SyncResponse::Blocks(blocks) = provider.handle(SyncRequest::BlocksByRange { from: 2, to: 9 })
    else {
        panic!("expected blocks");
    };
    let heights: Vec<_> = blocks.iter().map(|block| block.height()).collect();
    assert_eq!(heights, vec![2, 3]);

    assert!(matches!(
        provider.handle(SyncRequest::BlocksByRange { from: 3, to: 1 }),
        SyncResponse::Error(_)
    ));
}

#[test]
fn test_root_hash_only_at_known_height() {
    let provider = provider();
    let root = provider.source().state_roots().get(TrieName::Contracts);

    assert_eq!(
        provider.handle(SyncRequest::RootHash {
            trie: TrieName::Contracts,
            height: 3
        }),
        SyncResponse::RootHash(root)
    );
    assert!(matches!(
        provider.handle(SyncRequest::RootHash {
            trie: TrieName::Contracts,
            height: 2
        }),
        SyncResponse::Error(_)
    ));
    assert_eq!(
        provider.handle(SyncRequest::LatestHeight),
        SyncResponse::LatestHeight(3)
    );
}

#[test]
fn test_oversize_request_gets_an_error_response() {
    let provider = provider();
    let request = SyncRequest::NodesByHash(vec![B256::ZERO; MAX_NODES_PER_REQUEST + 1]);
    let encoded = SyncCodec::encode_request(&request).unwrap();

    let response = SyncCodec::decode_response(&provider.handle_bytes(&encoded).unwrap()).unwrap();
    assert!(matches!(response, SyncResponse::Error(_)));
}

#[test]
fn test_garbage_request_is_a_codec_error() {
    let provider = provider();
    assert!(provider.handle_bytes(&[0x42, 0x00, 0x01]).is_err());
}
