use crate::sync::PeerPool;
use libp2p_identity::PeerId;
use std::time::Duration;

#[test]
fn test_peer_pool_add_and_get() {
    let pool = PeerPool::new(Duration::from_secs(30));
    let peer_id = PeerId::random();

    pool.add_peer(peer_id, Some(10));
    let peer = pool.get_peer(&peer_id).unwrap();
    assert_eq!(peer.height, Some(10));
    assert!(!peer.busy);
    assert_eq!(pool.available_count(), 1);
}

#[test]
fn test_add_known_peer_updates_height_only() {
    let pool = PeerPool::new(Duration::from_secs(30));
    let peer_id = PeerId::random();

    pool.add_peer(peer_id, Some(10));
    pool.add_peer(peer_id, None);
    pool.add_peer(peer_id, Some(20));

    assert_eq!(pool.peer_count(), 1);
    assert_eq!(pool.available_count(), 1);
    assert_eq!(pool.get_peer(&peer_id).unwrap().height, Some(20));
}

#[test]
fn test_peer_is_busy_until_released() {
    let pool = PeerPool::new(Duration::from_secs(30));
    let peer_id = PeerId::random();
    pool.add_peer(peer_id, None);

    assert_eq!(pool.try_get_peer(), Some(peer_id));
    assert!(pool.get_peer(&peer_id).unwrap().busy);
    assert_eq!(pool.try_get_peer(), None);

    assert!(pool.release(peer_id, true));
    assert_eq!(pool.try_get_peer(), Some(peer_id));
}

#[test]
fn test_release_of_idle_or_unknown_peer_is_rejected() {
    let pool = PeerPool::new(Duration::from_secs(30));
    let peer_id = PeerId::random();
    pool.add_peer(peer_id, None);

    assert!(!pool.release(peer_id, true));
    assert!(!pool.release(PeerId::random(), true));
    assert_eq!(pool.available_count(), 1);
}

#[test]
fn test_good_peers_rotate_in_order() {
    let pool = PeerPool::new(Duration::from_secs(30));
    let first = PeerId::random();
    let second = PeerId::random();
    pool.add_peer(first, None);
    pool.add_peer(second, None);

    assert_eq!(pool.try_get_peer(), Some(first));
    pool.release(first, true);
    assert_eq!(pool.try_get_peer(), Some(second));
    assert_eq!(pool.try_get_peer(), Some(first));
}

#[test]
fn test_failed_peer_is_penalized() {
    let pool = PeerPool::new(Duration::from_secs(30));
    let bad = PeerId::random();
    let good = PeerId::random();
    pool.add_peer(bad, None);
    pool.add_peer(good, None);

    assert_eq!(pool.try_get_peer(), Some(bad));
    pool.release(bad, false);
    assert_eq!(pool.get_peer(&bad).unwrap().failures, 1);

    assert_eq!(pool.try_get_peer(), Some(good));
    assert_eq!(pool.try_get_peer(), None);
}

#[test]
fn test_penalized_peer_returns_after_penalty() {
    let pool = PeerPool::new(Duration::from_millis(20));
    let peer_id = PeerId::random();
    pool.add_peer(peer_id, None);

    pool.try_get_peer().unwrap();
    pool.release(peer_id, false);
    assert_eq!(pool.try_get_peer(), None);

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(pool.try_get_peer(), Some(peer_id));
}

#[test]
fn test_remove_peer_drops_it_from_rotation() {
    let pool = PeerPool::new(Duration::ZERO);
    let peer_id = PeerId::random();
    pool.add_peer(peer_id, Some(5));

    assert!(pool.remove_peer(&peer_id).is_some());
    assert_eq!(pool.try_get_peer(), None);
    assert_eq!(pool.max_height(), None);
}

#[test]
fn test_max_height() {
    let pool = PeerPool::new(Duration::ZERO);
    let first = PeerId::random();
    let second = PeerId::random();
    pool.add_peer(first, Some(7));
    pool.add_peer(second, None);
    assert_eq!(pool.max_height(), Some(7));

    pool.update_height(&second, 42);
    assert_eq!(pool.max_height(), Some(42));
}

#[tokio::test]
async fn test_acquire_waits_for_release() {
    let pool = std::sync::Arc::new(PeerPool::new(Duration::from_secs(30)));
    let peer_id = PeerId::random();
    pool.add_peer(peer_id, None);
    pool.try_get_peer().unwrap();

    let releaser = {
        let pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pool.release(peer_id, true);
        })
    };

    let acquired = tokio::time::timeout(
        Duration::from_secs(1),
        pool.acquire(Duration::from_millis(5), Duration::from_secs(60)),
    )
    .await
    .unwrap();
    assert_eq!(acquired, peer_id);
    releaser.await.unwrap();
}
