//! Sliding-window rate limiter
//!
//! Bounds call frequency toward a dependency within a rolling time window.
//! Timestamps older than the window are pruned on every check.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window rate limiter
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_ms: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_millis(window_ms),
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Admit and record the call if the window has room
    pub async fn try_acquire(&self) -> bool {
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();
        Self::prune(&mut timestamps, now, self.window);

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Wait until a slot frees up, then take it.
    ///
    /// Sleeps precisely until the oldest timestamp exits the window rather
    /// than busy-polling.
    pub async fn wait_for_slot(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                Self::prune(&mut timestamps, now, self.window);

                if timestamps.len() < self.max_requests {
                    timestamps.push_back(now);
                    return;
                }

                // Oldest entry leaves the window after this long
                let oldest = *timestamps.front().expect("window is full");
                self.window.saturating_sub(now.duration_since(oldest))
            };

            debug!("rate limit window full, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls currently counted in the window
    pub async fn in_flight(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        Self::prune(&mut timestamps, Instant::now(), self.window);
        timestamps.len()
    }

    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
