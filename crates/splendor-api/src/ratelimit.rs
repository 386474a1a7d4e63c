//! Request rate limiting for the x402 surface.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window limiter over the last minute. Disabled limiters admit
/// everything; the window only grows while requests keep arriving.
pub struct RateLimiter {
    enabled: bool,
    max_per_minute: u32,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_per_minute: u32) -> Self {
        Self { enabled, max_per_minute, window: Mutex::new(VecDeque::new()) }
    }

    /// Try to admit one request now.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }
        let mut window = self.window.lock();
        let horizon = now - Duration::from_secs(60);
        while window.front().is_some_and(|t| *t < horizon) {
            window.pop_front();
        }
        if window.len() >= self.max_per_minute as usize {
            return false;
        }
        window.push_back(now);
        true
    }
}
