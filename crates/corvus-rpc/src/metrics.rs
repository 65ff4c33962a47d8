//! Process-wide RPC metrics.
//!
//! Shared by `Arc` across every connection driver; all fields are
//! atomics so updates are safe from any thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Aggregate counters for the RPC layer.
#[derive(Debug, Default)]
pub struct RpcMetrics {
    /// Completed outbound transfers (queue-to-wire).
    outbound_transfer_count: AtomicU64,
    /// Total queue-to-wire latency in microseconds.
    outbound_transfer_sum_micros: AtomicU64,
    /// Worst observed queue-to-wire latency in microseconds.
    outbound_transfer_max_micros: AtomicU64,
    /// Connections torn down with a non-OK status.
    connections_torn_down: AtomicU64,
}

impl RpcMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record the time one outbound transfer spent between being
    /// queued and its last byte reaching the socket.
    pub fn record_outbound_transfer(&self, elapsed: Duration) {
        let micros = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        self.outbound_transfer_count.fetch_add(1, Ordering::Relaxed);
        self.outbound_transfer_sum_micros
            .fetch_add(micros, Ordering::Relaxed);
        self.outbound_transfer_max_micros
            .fetch_max(micros, Ordering::Relaxed);
    }

    pub fn record_connection_torn_down(&self) {
        self.connections_torn_down.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outbound_transfer_count(&self) -> u64 {
        self.outbound_transfer_count.load(Ordering::Relaxed)
    }

    pub fn outbound_transfer_sum_micros(&self) -> u64 {
        self.outbound_transfer_sum_micros.load(Ordering::Relaxed)
    }

    pub fn outbound_transfer_max_micros(&self) -> u64 {
        self.outbound_transfer_max_micros.load(Ordering::Relaxed)
    }

    pub fn connections_torn_down(&self) -> u64 {
        self.connections_torn_down.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_count_sum_and_max() {
        let metrics = RpcMetrics::new();
        metrics.record_outbound_transfer(Duration::from_micros(100));
        metrics.record_outbound_transfer(Duration::from_micros(300));

        assert_eq!(metrics.outbound_transfer_count(), 2);
        assert_eq!(metrics.outbound_transfer_sum_micros(), 400);
        assert_eq!(metrics.outbound_transfer_max_micros(), 300);
    }
}
