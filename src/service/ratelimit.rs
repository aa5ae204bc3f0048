//! Best-effort request rate limiting.
//!
//! Fixed-window counters keyed by caller address. State is purely
//! in-process: restarts forget counts and a few extra requests can
//! slip through around window edges, which is fine for an abuse
//! brake (it was never an accounting system).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from a rate limit check.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The limiter's shared state is unusable.
    #[error("rate limiter state unavailable: {0}")]
    State(String),
}

/// Decides whether a keyed caller has exceeded its request budget.
pub trait RateLimiter: Send + Sync {
    /// Counts one request against `key`; true means over budget.
    fn should_limit(
        &self,
        key: &str,
        max: u64,
        window: Duration,
    ) -> Result<bool, RateLimitError>;
}

struct WindowState {
    count: u64,
    started: Instant,
}

/// In-process fixed-window limiter.
#[derive(Default)]
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<String, WindowState>>,
}

impl MemoryRateLimiter {
    /// Creates an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiter for MemoryRateLimiter {
    fn should_limit(
        &self,
        key: &str,
        max: u64,
        window: Duration,
    ) -> Result<bool, RateLimitError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| RateLimitError::State("window map lock poisoned".into()))?;

        let state = windows.entry(key.to_owned()).or_insert(WindowState {
            count: 0,
            started: Instant::now(),
        });
        if state.started.elapsed() >= window {
            state.count = 0;
            state.started = Instant::now();
        }
        state.count += 1;
        if state.count > max {
            tracing::debug!(key, max, "request over rate limit");
            return Ok(true);
        }
        Ok(false)
    }
}

/// Builds a limiter key from a caller address.
///
/// Very long IPv6 addresses are collapsed to their first four groups
/// so one host cannot dodge the limiter by rotating through interface
/// identifiers inside its /64.
pub fn ip_key(prefix: &str, addr: &str) -> String {
    let groups: Vec<&str> = addr.split(':').collect();
    if groups.len() > 4 {
        format!("{prefix}{}", groups[..4].join(":"))
    } else {
        format!("{prefix}{addr}")
    }
}
