use containers::TrieName;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::frontier::FrontierStats;
use super::states::SyncPhase;

/// Request and node counters shared by the download tasks.
#[derive(Debug, Default)]
pub struct SyncCounters {
    pub nodes_accepted: AtomicU64,
    pub nodes_rejected: AtomicU64,
    pub nodes_duplicate: AtomicU64,
    pub blocks_verified: AtomicU64,
    pub blocks_rejected: AtomicU64,
    pub requests_sent: AtomicU64,
    pub requests_failed: AtomicU64,
    pub requests_timed_out: AtomicU64,
}

impl SyncCounters {
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub phase: SyncPhase,
    pub target_height: Option<u64>,
    pub tries_completed: usize,
    pub current_trie: Option<TrieName>,
    pub frontier: Option<FrontierStats>,
    pub verified_height: Option<u64>,
    pub peers: usize,
    pub nodes_accepted: u64,
    pub nodes_rejected: u64,
    pub nodes_duplicate: u64,
    pub blocks_verified: u64,
    pub blocks_rejected: u64,
    pub requests_sent: u64,
    pub requests_failed: u64,
    pub requests_timed_out: u64,
}
