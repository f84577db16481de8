//! Fast sync of the ledger state.
//!
//! A node far behind the network downloads a checkpointed copy of the six
//! state tries and the block headers up to the checkpoint instead of
//! replaying history. It includes:
//!
//! - **Peer Pool**: Hands out idle peers and parks failing ones for a penalty period
//! - **Frontier Queue**: Disk-backed breadth-first frontier of a trie download
//! - **Node Fetch**: Requests node batches and feeds verified nodes into storage
//! - **Block Fetch**: Downloads block ranges out of order and verifies them in order
//! - **Checkpoint**: Cross-checks a claimed checkpoint against independently fetched data
//! - **Sync Service**: Runs the phases and persists progress so a run can resume
//! - **Provider**: Serves the same protocols to peers that sync from this node
//!
//! ## Phases
//!
//! - **IDLE**: Sync not started
//! - **VERIFYING_CHECKPOINT**: Checkpoint block and roots are being cross-checked
//! - **DOWNLOADING**: Tries and blocks are downloading
//! - **COMMITTING**: Trie versions and the snapshot are being committed
//! - **COMPLETED**: Terminal, the complete marker is persisted

pub mod block_fetch;
pub mod checkpoint;
pub mod config;
pub mod downloader;
pub mod error;
pub mod frontier;
pub mod network;
pub mod node_fetch;
pub mod peer_pool;
pub mod provider;
pub mod repository;
pub mod service;
pub mod states;
pub mod stats;

pub use block_fetch::BlockFetchCoordinator;
pub use checkpoint::{is_checkpoint_ok, CheckpointVerifier};
pub use config::*;
pub use error::{CheckpointError, SyncError};
pub use frontier::{FrontierQueue, FrontierStats};
pub use network::{NetworkRequester, RpcNetwork, RpcTransport};
pub use node_fetch::{NodeFetchCoordinator, NodeResponseOutcome};
pub use peer_pool::{PeerPool, SyncPeer};
pub use provider::{SyncDataSource, SyncProvider};
pub use repository::{FastSyncRepository, FrontierCounters, SyncProgress};
pub use service::FastSyncService;
pub use states::SyncPhase;
pub use stats::{SyncCounters, SyncStats};

#[cfg(test)]
mod tests;
