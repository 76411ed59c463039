use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::RateLimitPolicy;

/// Slack added to a window wait so the wakeup lands past the boundary.
const WINDOW_EPSILON: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

/// Fixed-window call-quota gate.
///
/// At most `rate` grants happen between two window resets. Callers are served
/// in lock-arrival order; a blocked caller holds the lock while it sleeps, so
/// later arrivals queue behind it.
#[derive(Debug)]
pub struct RateLimiter {
    rate: u32,
    period: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(rate: u32, period: Duration) -> Self {
        Self {
            rate: rate.max(1),
            period,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    pub fn from_policy(policy: RateLimitPolicy) -> Self {
        Self::new(policy.rate, policy.period())
    }

    pub const fn rate(&self) -> u32 {
        self.rate
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Grants used in the current window.
    pub fn count(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .count
    }

    /// Non-blocking acquisition. Returns `false` when the window is exhausted.
    pub fn try_acquire(&self) -> bool {
        self.acquire(false, |_| {})
    }

    /// Acquire one quota unit.
    ///
    /// When the window is exhausted and `blocking` is set, `on_block` receives
    /// the wait duration before the calling thread sleeps out the window.
    pub fn acquire(&self, blocking: bool, on_block: impl FnOnce(Duration)) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let elapsed = state.window_start.elapsed();
        if elapsed > self.period {
            state.count = 0;
            state.window_start = Instant::now();
        }

        if state.count < self.rate {
            state.count += 1;
            return true;
        }

        if !blocking {
            return false;
        }

        let wait = self.period.saturating_sub(state.window_start.elapsed()) + WINDOW_EPSILON;
        on_block(wait);
        std::thread::sleep(wait);

        state.count = 1;
        state.window_start = Instant::now();
        true
    }
}
