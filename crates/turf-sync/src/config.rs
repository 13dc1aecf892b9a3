use std::time::Duration;

/// Tunables for the synchronization core. `Default` matches production
/// settings; tests shrink these to keep paused-clock runs tight.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// A send with no response inside this window is marked failed. The
    /// underlying write may still land later and reconcile via the feed.
    pub send_timeout: Duration,
    /// First reconnect delay after a feed drop; doubles per attempt.
    pub feed_backoff_base: Duration,
    /// Ceiling on the reconnect delay.
    pub feed_backoff_cap: Duration,
    /// Consecutive failed connect attempts before the feed is declared
    /// unavailable and the subscription goes terminal.
    pub feed_max_attempts: u32,
    /// Quiet period between outbound "is typing" writes.
    pub typing_debounce: Duration,
    /// A typing entry older than this is treated as expired even if no
    /// explicit stop event arrived.
    pub typing_liveness: Duration,
    /// Tolerance for the content+author fallback when a confirmed row
    /// carries no correlation id.
    pub reconcile_window: Duration,
    /// History page size.
    pub page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(10),
            feed_backoff_base: Duration::from_secs(1),
            feed_backoff_cap: Duration::from_secs(30),
            feed_max_attempts: 8,
            typing_debounce: Duration::from_millis(500),
            typing_liveness: Duration::from_secs(3),
            reconcile_window: Duration::from_secs(2),
            page_size: 50,
        }
    }
}
