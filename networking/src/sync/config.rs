//! Fast sync configuration.
//!
//! Protocol constants plus the tunables a node operator may override from a
//! YAML file.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

/// Hashes per persisted frontier batch.
pub const FRONTIER_BATCH_SIZE: usize = 5000;

/// Hashes requested from one peer in a single node request.
pub const NODE_REQUEST_BATCH_SIZE: usize = 500;

/// Blocks requested from one peer in a single range request.
pub const BLOCK_BATCH_SIZE: u64 = 1000;

/// Most nodes a serving peer returns for one request.
pub const MAX_NODES_PER_REQUEST: usize = 1000;

/// Most blocks a serving peer returns for one request.
pub const MAX_BLOCKS_PER_REQUEST: u64 = 1000;

pub const REQUEST_TIMEOUT_MS: u64 = 5000;

/// How long a peer that failed a request is kept out of rotation.
pub const PEER_PENALTY_SECS: u64 = 30;

/// Lag behind the network at which a node should fast sync instead of replaying blocks.
pub const FAST_SYNC_BLOCK_DIFF: u64 = 1_000_000;

/// Waiting this long for a peer or for work is worth a warning.
pub const STALL_ALERT_SECS: u64 = 60;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub frontier_batch_size: usize,
    pub node_request_batch_size: usize,
    pub block_batch_size: u64,
    pub request_timeout_ms: u64,
    pub peer_penalty_secs: u64,
    pub poll_interval_ms: u64,
    pub verifier_interval_ms: u64,
    pub max_in_flight_requests: usize,
    /// Peers tried for each checkpoint item before giving up.
    pub checkpoint_attempts: usize,
    pub fast_sync_block_diff: u64,
    pub stall_alert_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frontier_batch_size: FRONTIER_BATCH_SIZE,
            node_request_batch_size: NODE_REQUEST_BATCH_SIZE,
            block_batch_size: BLOCK_BATCH_SIZE,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            peer_penalty_secs: PEER_PENALTY_SECS,
            poll_interval_ms: 500,
            verifier_interval_ms: 1000,
            max_in_flight_requests: 16,
            checkpoint_attempts: 5,
            fast_sync_block_diff: FAST_SYNC_BLOCK_DIFF,
            stall_alert_secs: STALL_ALERT_SECS,
        }
    }
}

impl SyncConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn peer_penalty(&self) -> Duration {
        Duration::from_secs(self.peer_penalty_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn verifier_interval(&self) -> Duration {
        Duration::from_millis(self.verifier_interval_ms)
    }

    pub fn stall_alert(&self) -> Duration {
        Duration::from_secs(self.stall_alert_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "frontierBatchSize: 10\npeerPenaltySecs: 1").unwrap();

        let config = SyncConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.frontier_batch_size, 10);
        assert_eq!(config.peer_penalty(), Duration::from_secs(1));
        assert_eq!(config.node_request_batch_size, NODE_REQUEST_BATCH_SIZE);
        assert_eq!(config.fast_sync_block_diff, 1_000_000);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(SyncConfig::load_from_file("/nonexistent/sync.yaml").is_err());
    }
}
