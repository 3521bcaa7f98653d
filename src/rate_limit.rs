use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::time::interval;

/// Length of the sliding window `RATE_LIMIT_PER_MINUTE` is counted over.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Source of "now" for the limiter, swapped out in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Per-client sliding window limiter.
///
/// Each client keeps the timestamps of its accepted requests that are still
/// inside the window. Expired timestamps are dropped lazily whenever that
/// client is checked, and idle clients are removed by [`RateLimiter::sweep`].
/// The `DashMap` entry guard serializes concurrent checks for the same key.
pub struct RateLimiter {
    clients: DashMap<String, VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_requests: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            clients: DashMap::new(),
            max_requests,
            window,
            clock,
        }
    }

    /// Returns `true` and records the request if `client_id` still has room
    /// in its window. A rejected request is not recorded.
    pub fn allow(&self, client_id: &str) -> bool {
        let now = self.clock.now();

        let mut timestamps = self.clients.entry(client_id.to_string()).or_default();
        prune(&mut timestamps, now, self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push_back(now);
        true
    }

    /// Drops every client whose window is empty. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.clients.len();
        self.clients.retain(|_, timestamps| {
            prune(timestamps, now, self.window);
            !timestamps.is_empty()
        });
        before.saturating_sub(self.clients.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

// Timestamps are pushed in clock order, so expired ones sit at the front
fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

// Eviction loop - keeps memory bounded by the clients seen in the last window
pub async fn run_sweeper(limiter: Arc<RateLimiter>, every: Duration) {
    let mut ticker = interval(every);
    tracing::info!("Rate limit sweeper started (interval: {every:?})");

    loop {
        ticker.tick().await;
        let evicted = limiter.sweep();
        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining = limiter.tracked_clients(),
                "Evicted idle rate limit entries"
            );
        }
    }
}
