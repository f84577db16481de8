use super::{initialized_stores, Stores};
use crate::memory::{ChainBuilder, MemoryChain};
use crate::sync::{BlockFetchCoordinator, SyncCounters, SyncError};
use containers::BlockRecord;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn setup(height: u64, batch_size: u64) -> (Stores, MemoryChain, BlockFetchCoordinator) {
    let stores = initialized_stores();
    let chain = ChainBuilder::new(3).height(height).build().unwrap();
    stores.repository.persist_blocks(&[chain.genesis().clone()]).unwrap();
    let coordinator = BlockFetchCoordinator::new(
        stores.repository.clone(),
        height,
        batch_size,
        Arc::new(SyncCounters::default()),
    )
    .unwrap();
    (stores, chain, coordinator)
}

fn blocks(chain: &MemoryChain, from: u64, to: u64) -> Vec<BlockRecord> {
    (from..=to)
        .map(|height| chain.block(height).unwrap().clone())
        .collect()
}

#[test]
fn test_missing_genesis_is_an_invariant_violation() {
    let stores = initialized_stores();
    let result = BlockFetchCoordinator::new(
        stores.repository.clone(),
        10,
        4,
        Arc::new(SyncCounters::default()),
    );
    assert!(matches!(result, Err(SyncError::Invariant(_))));
}

#[test]
fn test_batches_cover_consecutive_heights() {
    let (_, _, coordinator) = setup(10, 4);

    assert_eq!(coordinator.try_get_batch(), Some((1, 4)));
    assert_eq!(coordinator.try_get_batch(), Some((5, 8)));
    assert_eq!(coordinator.try_get_batch(), Some((9, 10)));
    assert_eq!(coordinator.try_get_batch(), None);
}

#[test]
fn test_failed_range_is_scheduled_again() {
    let (_, chain, coordinator) = setup(10, 4);
    let (from, to) = coordinator.try_get_batch().unwrap();

    assert!(!coordinator.handle_response(from, to, None, None));
    assert_eq!(coordinator.try_get_batch(), Some((1, 4)));

    // Right length, wrong heights.
    assert!(!coordinator.handle_response(1, 4, Some(blocks(&chain, 2, 5)), None));
    // Short.
    assert!(!coordinator.handle_response(1, 4, Some(blocks(&chain, 1, 3)), None));
    assert_eq!(coordinator.staged_count(), 0);
    assert_eq!(coordinator.try_get_batch(), Some((1, 4)));
}

#[test]
fn test_out_of_order_ranges_are_verified_in_order() {
    let (stores, chain, coordinator) = setup(8, 4);
    let first = coordinator.try_get_batch().unwrap();
    let second = coordinator.try_get_batch().unwrap();

    assert!(coordinator.handle_response(second.0, second.1, Some(blocks(&chain, 5, 8)), None));
    assert_eq!(coordinator.verify_pass().unwrap(), 0);
    assert_eq!(coordinator.done(), 0);

    assert!(coordinator.handle_response(first.0, first.1, Some(blocks(&chain, 1, 4)), None));
    assert_eq!(coordinator.verify_pass().unwrap(), 8);
    assert!(coordinator.is_done());

    assert_eq!(stores.repository.current_block_height().unwrap(), Some(8));
    assert_eq!(
        stores.repository.block_by_height(8).unwrap().unwrap().hash,
        chain.tip().hash
    );
}

#[test]
fn test_block_from_another_chain_is_rejected() {
    let (stores, chain, coordinator) = setup(4, 4);
    let fork = ChainBuilder::new(99).height(4).build().unwrap();
    coordinator.try_get_batch().unwrap();

    let mut mixed = blocks(&chain, 1, 2);
    mixed.extend(blocks(&fork, 3, 4));
    assert!(coordinator.handle_response(1, 4, Some(mixed), None));

    assert_eq!(coordinator.verify_pass().unwrap(), 2);
    assert_eq!(coordinator.done(), 2);
    assert_eq!(stores.repository.current_block_height().unwrap(), Some(2));
    // The bad block is scheduled again and the one above it waits.
    assert_eq!(coordinator.try_get_batch(), Some((3, 3)));
    assert_eq!(coordinator.staged_count(), 1);

    coordinator.handle_response(3, 3, Some(blocks(&chain, 3, 3)), None);
    coordinator.verify_pass().unwrap();
    // Block 4 staged from the fork does not link to block 3.
    assert_eq!(coordinator.done(), 3);
    assert_eq!(coordinator.try_get_batch(), Some((4, 4)));
}

#[test]
fn test_tampered_block_fails_verification() {
    let (_, chain, coordinator) = setup(2, 4);
    coordinator.try_get_batch().unwrap();

    let mut tampered = blocks(&chain, 1, 2);
    tampered[0].header.timestamp += 1;
    coordinator.handle_response(1, 2, Some(tampered), None);

    assert_eq!(coordinator.verify_pass().unwrap(), 0);
    assert_eq!(coordinator.try_get_batch(), Some((1, 1)));
}

#[test]
fn test_resume_schedules_only_missing_heights() {
    let (stores, chain, coordinator) = setup(6, 4);
    coordinator.try_get_batch().unwrap();
    coordinator.handle_response(1, 4, Some(blocks(&chain, 1, 4)), None);
    coordinator.verify_pass().unwrap();

    let resumed = BlockFetchCoordinator::new(
        stores.repository.clone(),
        6,
        4,
        Arc::new(SyncCounters::default()),
    )
    .unwrap();
    assert_eq!(resumed.done(), 4);
    assert_eq!(resumed.try_get_batch(), Some((5, 6)));
}

#[tokio::test]
async fn test_verifier_finishes_when_last_block_arrives() {
    let (_, chain, coordinator) = setup(4, 2);
    let coordinator = Arc::new(coordinator);

    let verifier = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run_verifier(Duration::from_secs(10)).await })
    };

    for (from, to) in [(3, 4), (1, 2)] {
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.handle_response(from, to, Some(blocks(&chain, from, to)), None);
    }

    tokio::time::timeout(Duration::from_secs(2), verifier)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(coordinator.done(), 4);
}

#[test]
fn test_answers_staged_during_a_pass_are_not_left_behind() {
    let (stores, chain, coordinator) = setup(40, 4);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            // Every range arrives twice, the copy often while a pass is persisting.
            for from in (1..=40).step_by(4) {
                for _ in 0..2 {
                    let to = from + 3;
                    let response = Some(blocks(&chain, from, to));
                    assert!(coordinator.handle_response(from, to, response, None));
                }
            }
        });
        scope.spawn(|| {
            while !coordinator.is_done() {
                coordinator.verify_pass().unwrap();
                std::thread::yield_now();
            }
        });
    });

    assert_eq!(coordinator.done(), 40);
    assert_eq!(coordinator.staged_count(), 0);
    assert_eq!(stores.repository.current_block_height().unwrap(), Some(40));
    assert_eq!(
        stores.repository.block_by_height(40).unwrap().unwrap().hash,
        chain.tip().hash
    );
}
