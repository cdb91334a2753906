//! Fixed-window rate limiting for the ingestion endpoint.
//!
//! Limits are keyed by a caller identifier (usually the client address). The
//! [`RateLimiter`] trait is the seam for a shared counter store; the
//! in-memory [`MemoryRateLimiter`] only sees the requests of its own process
//! and forgets every caller on restart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

/// How many requests a caller may make per window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    pub quota: u32,

    #[serde(rename = "window_seconds", with = "seconds")]
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit {
            quota: 10,
            window: Duration::from_secs(60),
        }
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// The outcome of a rate check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed; `remaining` more fit in the current window.
    Allowed { remaining: u32 },

    /// The caller is over quota until the window resets.
    Limited { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Counts requests per caller.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records one request from `key` and decides whether it may proceed.
    async fn check(&self, key: &str) -> Decision;
}

struct Window {
    count: u32,
    resets_at: Instant,
}

/// A [`RateLimiter`] holding its counters in process memory. The number of
/// tracked callers is unbounded; windows are only replaced when their caller
/// comes back after the reset.
pub struct MemoryRateLimiter {
    limit: RateLimit,
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryRateLimiter {
    pub fn new(limit: RateLimit) -> MemoryRateLimiter {
        MemoryRateLimiter {
            limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request from `key` made at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = windows.entry(key.to_owned()).or_insert(Window {
            count: 0,
            resets_at: now + self.limit.window,
        });
        if now >= window.resets_at {
            window.count = 0;
            window.resets_at = now + self.limit.window;
        }
        if window.count >= self.limit.quota {
            return Decision::Limited {
                retry_after: window.resets_at.saturating_duration_since(now),
            };
        }
        window.count += 1;
        Decision::Allowed {
            remaining: self.limit.quota - window.count,
        }
    }

    pub fn tracked_callers(&self) -> usize {
        self.windows
            .lock()
            .map(|windows| windows.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_per_window() {
        let limiter = MemoryRateLimiter::new(RateLimit::default());
        let start = Instant::now();
        for i in 0..10 {
            assert_eq!(
                Decision::Allowed { remaining: 9 - i },
                limiter.check_at("1.2.3.4", start + Duration::from_secs(i as u64))
            );
        }
        match limiter.check_at("1.2.3.4", start + Duration::from_secs(15)) {
            Decision::Limited { retry_after } => assert_eq!(Duration::from_secs(45), retry_after),
            other => panic!("wanted the 11th request limited; found {:?}", other),
        }
    }

    #[test]
    fn test_window_resets() {
        let limiter = MemoryRateLimiter::new(RateLimit {
            quota: 1,
            window: Duration::from_secs(60),
        });
        let start = Instant::now();
        assert!(limiter.check_at("a", start).is_allowed());
        assert!(!limiter.check_at("a", start + Duration::from_secs(59)).is_allowed());
        assert!(limiter.check_at("a", start + Duration::from_secs(60)).is_allowed());
    }

    #[test]
    fn test_callers_are_independent() {
        let limiter = MemoryRateLimiter::new(RateLimit {
            quota: 1,
            window: Duration::from_secs(60),
        });
        let now = Instant::now();
        assert!(limiter.check_at("a", now).is_allowed());
        assert!(limiter.check_at("b", now).is_allowed());
        assert!(!limiter.check_at("a", now).is_allowed());
        assert_eq!(2, limiter.tracked_callers());
    }

    #[test]
    fn test_deserialize_limit() -> serde_yaml::Result<()> {
        let limit: RateLimit = serde_yaml::from_str("quota: 3\nwindow_seconds: 5")?;
        assert_eq!(3, limit.quota);
        assert_eq!(Duration::from_secs(5), limit.window);
        let limit: RateLimit = serde_yaml::from_str("quota: 3")?;
        assert_eq!(Duration::from_secs(60), limit.window);
        Ok(())
    }
}
