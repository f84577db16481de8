//! Peer pool for fast sync requests.
//!
//! Hands out one idle peer per request. A peer that answered well goes back
//! to the front of the rotation; a peer that failed (error, timeout or bad
//! data) is parked for the penalty period before it is tried again.

use libp2p_identity::PeerId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sync-specific peer state.
#[derive(Debug, Clone)]
pub struct SyncPeer {
    pub peer_id: PeerId,
    /// Latest block height the peer reported, if known.
    pub height: Option<u64>,
    pub busy: bool,
    pub failures: u64,
}

impl SyncPeer {
    pub fn new(peer_id: PeerId, height: Option<u64>) -> Self {
        Self {
            peer_id,
            height,
            busy: false,
            failures: 0,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    peers: HashMap<PeerId, SyncPeer>,
    good: VecDeque<PeerId>,
    /// Failed peers with the time they failed, oldest first.
    penalized: VecDeque<(PeerId, Instant)>,
}

#[derive(Debug)]
pub struct PeerPool {
    state: Mutex<PoolState>,
    penalty: Duration,
}

impl PeerPool {
    pub fn new(penalty: Duration) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            penalty,
        }
    }

    /// Add a peer, or update the height of a known one.
    pub fn add_peer(&self, peer_id: PeerId, height: Option<u64>) {
        let mut state = self.state.lock();
        if let Some(peer) = state.peers.get_mut(&peer_id) {
            if height.is_some() {
                peer.height = height;
            }
            return;
        }
        state.peers.insert(peer_id, SyncPeer::new(peer_id, height));
        state.good.push_back(peer_id);
        debug!(peer = %peer_id, height = ?height, "Peer added to sync pool");
    }

    pub fn remove_peer(&self, peer_id: &PeerId) -> Option<SyncPeer> {
        let mut state = self.state.lock();
        state.good.retain(|peer| peer != peer_id);
        state.penalized.retain(|(peer, _)| peer != peer_id);
        state.peers.remove(peer_id)
    }

    pub fn update_height(&self, peer_id: &PeerId, height: u64) {
        if let Some(peer) = self.state.lock().peers.get_mut(peer_id) {
            peer.height = Some(height);
        }
    }

    /// Take an idle peer out of rotation.
    ///
    /// Good peers come first. A penalized peer is only handed out once its
    /// penalty has expired.
    pub fn try_get_peer(&self) -> Option<PeerId> {
        let mut state = self.state.lock();
        let peer_id = if let Some(peer_id) = state.good.pop_front() {
            peer_id
        } else {
            let (_, failed_at) = state.penalized.front()?;
            if failed_at.elapsed() < self.penalty {
                return None;
            }
            state.penalized.pop_front()?.0
        };

        if let Some(peer) = state.peers.get_mut(&peer_id) {
            peer.busy = true;
        }
        Some(peer_id)
    }

    /// Return a peer taken with [`PeerPool::try_get_peer`].
    ///
    /// Returns `false` if the peer is unknown or was not busy.
    pub fn release(&self, peer_id: PeerId, success: bool) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(peer) = state.peers.get_mut(&peer_id) else {
            return false;
        };
        if !peer.busy {
            return false;
        }
        peer.busy = false;

        if success {
            state.good.push_back(peer_id);
        } else {
            peer.failures += 1;
            debug!(peer = %peer_id, failures = peer.failures, "Peer penalized");
            state.penalized.push_back((peer_id, Instant::now()));
        }
        true
    }

    /// Wait until a peer is available.
    ///
    /// Polls every `poll_interval` and warns each time the wait exceeds another
    /// `stall_alert`.
    pub async fn acquire(&self, poll_interval: Duration, stall_alert: Duration) -> PeerId {
        let started = Instant::now();
        let mut next_alert = stall_alert;
        loop {
            if let Some(peer_id) = self.try_get_peer() {
                return peer_id;
            }
            let waited = started.elapsed();
            if waited >= next_alert {
                warn!(
                    waited_secs = waited.as_secs(),
                    peers = self.peer_count(),
                    "No peer available for fast sync"
                );
                next_alert += stall_alert;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn get_peer(&self, peer_id: &PeerId) -> Option<SyncPeer> {
        self.state.lock().peers.get(peer_id).cloned()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.state.lock().peers.keys().copied().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    /// Peers idle and ready now, penalized ones excluded.
    pub fn available_count(&self) -> usize {
        self.state.lock().good.len()
    }

    /// Highest height reported by any peer.
    pub fn max_height(&self) -> Option<u64> {
        self.state
            .lock()
            .peers
            .values()
            .filter_map(|peer| peer.height)
            .max()
    }
}
