//! Fixed-window rate limiter keyed by voter
//!
//! Windows are aligned to multiples of the window length. The map is
//! bounded: when full, expired windows are dropped first, then the
//! oldest remaining one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub max_keys: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
            max_keys: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateDecision {
    /// Whole seconds until the window resets, at least 1
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let ms = (self.reset_at - now).num_milliseconds().max(0) as u64;
        ms.div_ceil(1000).max(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    window_start_ms: i64,
    count: u32,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, WindowCounter>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn window_ms(&self) -> i64 {
        (self.config.window.as_millis() as i64).max(1)
    }

    /// Count one request for `key` at `now`
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> RateDecision {
        let window_ms = self.window_ms();
        let now_ms = now.timestamp_millis();
        let window_start_ms = now_ms - now_ms.rem_euclid(window_ms);
        let reset_at = DateTime::from_timestamp_millis(window_start_ms + window_ms).unwrap_or(now);

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if !windows.contains_key(key) && windows.len() >= self.config.max_keys {
            evict(&mut windows, window_start_ms, self.config.max_keys);
        }

        let counter = windows.entry(key.to_string()).or_insert(WindowCounter {
            window_start_ms,
            count: 0,
        });
        if counter.window_start_ms != window_start_ms {
            *counter = WindowCounter {
                window_start_ms,
                count: 0,
            };
        }

        let limit = self.config.max_requests;
        if counter.count >= limit {
            log::warn!("🚫 Rate limit hit for {}", key);
            return RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at,
            };
        }

        counter.count += 1;
        RateDecision {
            allowed: true,
            limit,
            remaining: limit - counter.count,
            reset_at,
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn evict(windows: &mut HashMap<String, WindowCounter>, current_start_ms: i64, max_keys: usize) {
    windows.retain(|_, w| w.window_start_ms >= current_start_ms);

    while windows.len() >= max_keys {
        let oldest = windows
            .iter()
            .min_by_key(|(key, w)| (w.window_start_ms, w.count, key.to_string()))
            .map(|(key, _)| key.clone());

        match oldest {
            Some(key) => {
                windows.remove(&key);
            }
            None => break,
        }
    }
}
