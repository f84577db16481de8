use super::{initialized_stores, test_config, Stores};
use crate::memory::{ChainBuilder, MemoryTransport, PeerFault};
use crate::sync::downloader::{drive, NodeFetcher};
use crate::sync::{
    FrontierQueue, NodeFetchCoordinator, NodeResponseOutcome, PeerPool, RpcNetwork, SyncCounters,
};
use containers::{TrieName, TrieNode};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn coordinator(stores: &Stores, batch_size: usize) -> NodeFetchCoordinator {
    coordinator_with_counters(stores, batch_size, Arc::new(SyncCounters::default()))
}

fn coordinator_with_counters(
    stores: &Stores,
    batch_size: usize,
    counters: Arc<SyncCounters>,
) -> NodeFetchCoordinator {
    let frontier = Arc::new(FrontierQueue::new(
        TrieName::Contracts,
        8,
        stores.repository.clone(),
        stores.tries.clone(),
    ));
    NodeFetchCoordinator::new(
        frontier,
        stores.tries.clone(),
        batch_size,
        counters,
    )
}

/// Root with two leaf children.
fn small_trie() -> (TrieNode, TrieNode, TrieNode) {
    let left = TrieNode::leaf(b"left".to_vec());
    let right = TrieNode::leaf(b"right".to_vec());
    let root = TrieNode::internal(vec![left.hash(), right.hash()]);
    (root, left, right)
}

#[test]
fn test_accepted_node_queues_its_children() {
    let stores = initialized_stores();
    let coordinator = coordinator(&stores, 10);
    let (root, left, right) = small_trie();
    coordinator.frontier().add(root.hash()).unwrap();

    let batch = coordinator.try_get_hash_batch().unwrap();
    assert_eq!(batch, vec![root.hash()]);

    let outcome = coordinator
        .handle_response(&batch, Some(vec![root.clone()]))
        .unwrap();
    assert_eq!(
        outcome,
        NodeResponseOutcome {
            accepted: 1,
            ..Default::default()
        }
    );
    assert_eq!(stores.tries.node_by_hash(&root.hash()), Some(root));

    let batch = coordinator.try_get_hash_batch().unwrap();
    assert_eq!(batch, vec![left.hash(), right.hash()]);
    let outcome = coordinator
        .handle_response(&batch, Some(vec![left, right]))
        .unwrap();
    assert_eq!(outcome.accepted, 2);
    assert!(coordinator.is_done());
}

#[test]
fn test_batch_is_capped() {
    let stores = initialized_stores();
    let coordinator = coordinator(&stores, 2);
    for i in 0..5u8 {
        coordinator
            .frontier()
            .add(TrieNode::leaf(vec![i]).hash())
            .unwrap();
    }

    assert_eq!(coordinator.try_get_hash_batch().unwrap().len(), 2);
    assert_eq!(coordinator.try_get_hash_batch().unwrap().len(), 2);
    assert_eq!(coordinator.try_get_hash_batch().unwrap().len(), 1);
    assert!(coordinator.try_get_hash_batch().unwrap().is_empty());
}

#[test]
fn test_wrong_node_is_rejected_and_retried() {
    let stores = initialized_stores();
    let coordinator = coordinator(&stores, 10);
    let (_, left, right) = small_trie();
    coordinator.frontier().add(left.hash()).unwrap();
    coordinator.frontier().add(right.hash()).unwrap();
    let batch = coordinator.try_get_hash_batch().unwrap();

    let outcome = coordinator
        .handle_response(&batch, Some(vec![left.clone(), left.clone()]))
        .unwrap();
    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.rejected, 1);
    assert!(!outcome.peer_ok());
    assert!(stores.tries.node_by_hash(&right.hash()).is_none());

    assert_eq!(coordinator.try_get_hash_batch().unwrap(), vec![right.hash()]);
}

#[test]
fn test_short_response_fails_every_hash() {
    let stores = initialized_stores();
    let coordinator = coordinator(&stores, 10);
    let (_, left, right) = small_trie();
    coordinator.frontier().add(left.hash()).unwrap();
    coordinator.frontier().add(right.hash()).unwrap();
    let batch = coordinator.try_get_hash_batch().unwrap();

    let outcome = coordinator
        .handle_response(&batch, Some(vec![left.clone()]))
        .unwrap();
    assert!(outcome.malformed);
    assert_eq!(outcome.accepted, 0);
    assert_eq!(stores.tries.node_count(), 0);

    let outcome = coordinator.handle_response(&batch, None).unwrap();
    assert!(outcome.malformed);

    let mut retried = coordinator.try_get_hash_batch().unwrap();
    retried.sort();
    let mut expected = vec![left.hash(), right.hash()];
    expected.sort();
    assert_eq!(retried, expected);
}

#[test]
fn test_late_duplicate_answer_is_dropped() {
    let stores = initialized_stores();
    let coordinator = coordinator(&stores, 10);
    let (_, left, _) = small_trie();
    coordinator.frontier().add(left.hash()).unwrap();
    let batch = coordinator.try_get_hash_batch().unwrap();

    coordinator
        .handle_response(&batch, Some(vec![left.clone()]))
        .unwrap();
    let outcome = coordinator
        .handle_response(&batch, Some(vec![left.clone()]))
        .unwrap();

    assert_eq!(outcome.duplicate, 1);
    assert_eq!(outcome.accepted, 0);
    assert!(outcome.peer_ok());
    assert_eq!(stores.tries.node_count(), 1);
    assert!(coordinator.is_done());
}

#[tokio::test]
async fn test_timed_out_request_is_retried_on_another_peer() {
    let (root, left, right) = small_trie();
    let chain = ChainBuilder::new(12)
        .trie_nodes(
            TrieName::Contracts,
            root.hash(),
            vec![root.clone(), left.clone(), right.clone()],
        )
        .build()
        .unwrap();
    let chain = Arc::new(chain);
    let transport = MemoryTransport::new();
    let silent = transport.add_peer(chain.clone(), PeerFault::Silent);
    let honest = transport.add_peer(chain, PeerFault::Honest);
    let network = Arc::new(RpcNetwork::new(transport));

    let config = test_config();
    let peers = Arc::new(PeerPool::new(config.peer_penalty()));
    // The silent peer is first in rotation and gets the root request.
    peers.add_peer(silent, None);
    peers.add_peer(honest, None);

    let stores = initialized_stores();
    let counters = Arc::new(SyncCounters::default());
    let coordinator = Arc::new(coordinator_with_counters(&stores, 10, counters.clone()));
    coordinator.frontier().add(root.hash()).unwrap();
    let fetcher = Arc::new(NodeFetcher::new(
        coordinator.clone(),
        network.clone(),
        config.request_timeout(),
        counters.clone(),
    ));

    tokio::time::timeout(Duration::from_secs(10), drive(fetcher, peers.clone(), &config))
        .await
        .unwrap()
        .unwrap();

    assert!(coordinator.is_done());
    for node in [&root, &left, &right] {
        assert_eq!(stores.tries.node_by_hash(&node.hash()).as_ref(), Some(node));
    }
    assert!(SyncCounters::get(&counters.requests_timed_out) >= 1);
    assert!(
        SyncCounters::get(&counters.requests_failed)
            >= SyncCounters::get(&counters.requests_timed_out)
    );
    // Only the honest peer ever answered, so the root was sent again.
    assert!(network.transport().node_request_count(&root.hash()) >= 1);
    assert!(peers.get_peer(&silent).unwrap().failures >= 1);
    assert_eq!(peers.get_peer(&honest).unwrap().failures, 0);
    assert!(!peers.get_peer(&honest).unwrap().busy);
}
