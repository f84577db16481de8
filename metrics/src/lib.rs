pub mod server;

use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
    #[error("metrics output is not utf8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    peers: IntGauge,
    // Fast sync
    sync_phase: IntGauge,
    tries_completed: IntGauge,
    frontier_batches: IntGaugeVec,
    target_block_height: IntGauge,
    verified_block_height: IntGauge,
    trie_nodes: IntGaugeVec,
    requests: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peers = IntGauge::with_opts(Opts::new("network_peers_connected", "Number of connected peers"))?;
        registry.register(Box::new(peers.clone()))?;

        let sync_phase = IntGauge::with_opts(Opts::new(
            "fast_sync_phase",
            "Current fast sync phase (0 idle, 1 verifying checkpoint, 2 downloading, 3 committing, 4 completed, 5 failed)",
        ))?;
        registry.register(Box::new(sync_phase.clone()))?;

        let tries_completed = IntGauge::with_opts(Opts::new("fast_sync_tries_completed", "Number of fully downloaded state tries"))?;
        registry.register(Box::new(tries_completed.clone()))?;

        let frontier_batches = IntGaugeVec::new(
            Opts::new("fast_sync_frontier_batches", "Frontier batches of the trie being downloaded"),
            &["state"],
        )?;
        registry.register(Box::new(frontier_batches.clone()))?;

        let target_block_height = IntGauge::with_opts(Opts::new("fast_sync_target_block_height", "Height of the checkpoint block"))?;
        registry.register(Box::new(target_block_height.clone()))?;

        let verified_block_height = IntGauge::with_opts(Opts::new("fast_sync_verified_block_height", "Highest verified and stored block"))?;
        registry.register(Box::new(verified_block_height.clone()))?;

        let trie_nodes = IntGaugeVec::new(
            Opts::new("fast_sync_trie_nodes", "Trie nodes received, by outcome"),
            &["result"],
        )?;
        registry.register(Box::new(trie_nodes.clone()))?;

        let requests = IntGaugeVec::new(
            Opts::new("fast_sync_requests", "Fast sync requests, by outcome"),
            &["result"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        Ok(Self {
            registry,
            peers,
            sync_phase,
            tries_completed,
            frontier_batches,
            target_block_height,
            verified_block_height,
            trie_nodes,
            requests,
        })
    }

    pub fn gather(&self) -> Result<String, MetricsError> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::<u8>::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn set_peers(&self, v: i64) {
        self.peers.set(v);
    }

    // Fast sync
    pub fn set_sync_phase(&self, v: i64) {
        self.sync_phase.set(v);
    }

    pub fn set_tries_completed(&self, v: i64) {
        self.tries_completed.set(v);
    }

    pub fn set_frontier_batches(&self, loaded: i64, saved: i64, total: i64) {
        self.frontier_batches.with_label_values(&["loaded"]).set(loaded);
        self.frontier_batches.with_label_values(&["saved"]).set(saved);
        self.frontier_batches.with_label_values(&["total"]).set(total);
    }

    pub fn set_target_block_height(&self, v: i64) {
        self.target_block_height.set(v);
    }

    pub fn set_verified_block_height(&self, v: i64) {
        self.verified_block_height.set(v);
    }

    pub fn set_trie_nodes(&self, result: &str, v: i64) {
        self.trie_nodes.with_label_values(&[result]).set(v);
    }

    pub fn set_requests(&self, result: &str, v: i64) {
        self.requests.with_label_values(&[result]).set(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_sync_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.set_tries_completed(3);
        metrics.set_frontier_batches(4, 2, 9);
        metrics.set_requests("timed_out", 1);

        let text = metrics.gather().unwrap();
        assert!(text.contains("fast_sync_tries_completed 3"));
        assert!(text.contains("fast_sync_frontier_batches{state=\"total\"} 9"));
        assert!(text.contains("fast_sync_requests{result=\"timed_out\"} 1"));
    }
}
