//! Traffic statistics

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-connection counters and timestamps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatistics {
    pub message_count: u64,
    pub tx_count: u64,
    pub rx_count: u64,
    pub error_count: u64,
    /// First connection attempt
    pub started_at: Option<DateTime<Utc>>,
    /// Most recent successful open
    pub connected_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConnectionStatistics {
    pub fn reset_counters(&mut self) {
        self.message_count = 0;
        self.tx_count = 0;
        self.rx_count = 0;
        self.error_count = 0;
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|t| now - t)
    }

    pub fn connection_uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.connected_at.map(|t| now - t)
    }
}

/// Manager-wide totals, always summed fresh from the networks
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalStatistics {
    pub total_networks: usize,
    pub active_connections: usize,
    pub total_messages: u64,
    pub total_tx: u64,
    pub total_rx: u64,
    pub total_errors: u64,
    pub uptime_secs: f64,
}

impl GlobalStatistics {
    pub fn accumulate(&mut self, stats: &ConnectionStatistics) {
        self.total_messages += stats.message_count;
        self.total_tx += stats.tx_count;
        self.total_rx += stats.rx_count;
        self.total_errors += stats.error_count;
    }
}
