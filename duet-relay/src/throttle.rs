//! Per-key request throttling for the front door.
//!
//! A fixed window per public key: 60 requests per 60 seconds by default.
//! Requests without a public key header are not throttled here; the
//! pairing endpoints rely on signature cost and token semantics for
//! abuse resistance.

use dashmap::DashMap;

/// Default per-key request cap.
pub const DEFAULT_MAX_REQUESTS: u32 = 60;

/// Default window length in milliseconds.
pub const DEFAULT_WINDOW_MS: i64 = 60_000;

/// A fixed-window per-key throttle.
pub struct Throttle {
    windows: DashMap<String, Window>,
    max_requests: u32,
    window_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: i64,
}

/// Error returned when a key exceeds its window cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleExceeded;

impl std::fmt::Display for ThrottleExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request rate limit exceeded")
    }
}

impl std::error::Error for ThrottleExceeded {}

impl Throttle {
    /// Create a throttle with the given cap and window.
    pub fn new(max_requests: u32, window_ms: i64) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window_ms,
        }
    }

    /// Record a request for a key at the given instant.
    pub fn check(&self, key: &str, now: i64) -> Result<(), ThrottleExceeded> {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window {
                count: 0,
                reset_at: now + self.window_ms,
            });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window_ms;
        }

        if entry.count >= self.max_requests {
            return Err(ThrottleExceeded);
        }

        entry.count += 1;
        Ok(())
    }

    /// Drop windows whose reset instant has passed.
    ///
    /// Called by the periodic sweeper so the map does not accumulate
    /// one slot per key ever seen.
    pub fn retain_active(&self, now: i64) {
        self.windows.retain(|_, w| w.reset_at > now);
    }

    /// Number of tracked keys (for health reporting).
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
