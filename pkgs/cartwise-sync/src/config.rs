//! Sync timing and policy configuration

use std::time::Duration;

/// Configuration for the sync services
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval of the periodic price-change poll (default: 5 minutes)
    pub poll_interval: Duration,

    /// Interval of the stale-notification sweep (default: 1 hour)
    pub purge_interval: Duration,

    /// Age after which a notification is no longer shown (default: 24 hours)
    pub recency_window: Duration,

    /// New prices closer than this are the same drop (default: 0.01)
    pub price_tolerance: f64,

    /// Total attempts to persist a sent chat message (default: 3)
    pub send_max_attempts: u32,

    /// Fixed delay between persist attempts (default: 1s)
    pub send_retry_delay: Duration,
}

impl SyncConfig {
    pub fn recency_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.recency_window).unwrap_or(chrono::Duration::hours(24))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5 * 60),
            purge_interval: Duration::from_secs(3600),
            recency_window: Duration::from_secs(24 * 3600),
            price_tolerance: 0.01,
            send_max_attempts: 3,
            send_retry_delay: Duration::from_secs(1),
        }
    }
}
