//! Fixed-window rate limiting.
//!
//! # Design Decisions
//! - Fixed windows (not sliding): a cell holds (window index, count)
//! - Keyed by client IP string; cells live in a concurrent map
//! - State is process-local; a restart empties every bucket

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

/// Per-client counter cell.
#[derive(Debug)]
struct WindowCell {
    window: u64,
    count: u32,
}

/// Token counter over fixed windows, keyed by client identity.
pub struct FixedWindowLimiter {
    cells: DashMap<String, WindowCell>,
    limit: u32,
    window_s: u64,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window_s: u64) -> Self {
        Self {
            cells: DashMap::new(),
            limit,
            window_s: window_s.max(1),
        }
    }

    /// Admit or reject one request from `key` at the current time.
    pub fn check(&self, key: &str) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.check_at(key, now)
    }

    /// Admit or reject at an explicit epoch-seconds instant.
    fn check_at(&self, key: &str, now_secs: u64) -> bool {
        let window = now_secs / self.window_s;
        let mut cell = self.cells.entry(key.to_string()).or_insert(WindowCell {
            window,
            count: 0,
        });

        if cell.window != window {
            cell.window = window;
            cell.count = 0;
        }
        cell.count += 1;
        cell.count <= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = FixedWindowLimiter::new(3, 1);
        assert!(limiter.check_at("10.0.0.1", 100));
        assert!(limiter.check_at("10.0.0.1", 100));
        assert!(limiter.check_at("10.0.0.1", 100));
        assert!(!limiter.check_at("10.0.0.1", 100));
    }

    #[test]
    fn window_rollover_resets_the_counter() {
        let limiter = FixedWindowLimiter::new(1, 1);
        assert!(limiter.check_at("10.0.0.1", 100));
        assert!(!limiter.check_at("10.0.0.1", 100));
        assert!(limiter.check_at("10.0.0.1", 101));
    }

    #[test]
    fn clients_are_counted_separately() {
        let limiter = FixedWindowLimiter::new(1, 1);
        assert!(limiter.check_at("10.0.0.1", 100));
        assert!(limiter.check_at("10.0.0.2", 100));
        assert!(!limiter.check_at("10.0.0.1", 100));
    }

    #[test]
    fn wide_windows_share_the_floor() {
        let limiter = FixedWindowLimiter::new(1, 10);
        assert!(limiter.check_at("c", 100));
        // 109 is still window 10; 110 starts window 11.
        assert!(!limiter.check_at("c", 109));
        assert!(limiter.check_at("c", 110));
    }
}
