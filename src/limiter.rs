//! Sliding-window rate limiter gating access to the relay endpoints.
//!
//! A single [`RateLimiter`] is constructed at startup and shared through
//! `AppState`. It admits at most `max_requests` calls in any trailing
//! `window` of time:
//! - **admit**: prune expired timestamps, reject when full, otherwise record "now"
//! - **status**: same pruning without recording, plus time until a slot frees up
//!
//! Timestamps use `tokio::time::Instant` so tests can pause and advance time.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Default sliding window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default number of admissions allowed per window.
pub const DEFAULT_MAX_REQUESTS: usize = 10;

/// Read-only snapshot of the limiter's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// True when the next `admit()` would be rejected.
    pub limited: bool,
    /// Admissions still available in the current window.
    pub remaining: usize,
    /// Time until the oldest retained admission leaves the window (zero if not limited).
    pub retry_after: Duration,
    /// Configured window length.
    pub window: Duration,
}

impl RateLimitStatus {
    /// `retry_after` rounded up to whole seconds.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Window bookkeeping (not thread-safe on its own).
struct WindowState {
    recent: VecDeque<Instant>,
}

impl WindowState {
    /// Drop every admission at or beyond `window` in the past.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.recent.front() {
            if now.duration_since(oldest) >= window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Process-wide sliding-window limiter.
pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window`.
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            state: Mutex::new(WindowState {
                recent: VecDeque::with_capacity(max_requests),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Try to admit one request now.
    ///
    /// Check-then-append happens under a single lock, so concurrent callers
    /// can never push the window past `max_requests`.
    pub fn admit(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.prune(now, self.window);

        if state.recent.len() >= self.max_requests {
            tracing::debug!(
                in_window = state.recent.len(),
                max_requests = self.max_requests,
                "rate limiter: request rejected"
            );
            return false;
        }

        state.recent.push_back(now);
        true
    }

    /// Inspect the limiter without consuming a slot.
    pub fn status(&self) -> RateLimitStatus {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.prune(now, self.window);

        let used = state.recent.len();
        let limited = used >= self.max_requests;
        let retry_after = match state.recent.front() {
            Some(&oldest) if limited => self.window.saturating_sub(now.duration_since(oldest)),
            _ => Duration::ZERO,
        };

        RateLimitStatus {
            limited,
            remaining: self.max_requests.saturating_sub(used),
            retry_after,
            window: self.window,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_REQUESTS)
    }
}
