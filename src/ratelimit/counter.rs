//! Fixed-window request counter.

use std::time::{Duration, Instant};

/// Request count for one (category, key) pair in the current window.
///
/// The count only goes down inside a window when a reserved slot is
/// released. The window resets to zero exactly when
/// `now - window_start >= window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    count: u32,
    window_start: Instant,
}

/// What happened when a counter was checked against its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Under the ceiling; `remaining` is what is left after this request
    Admitted { remaining: u32 },
    /// At or over the ceiling
    Exceeded { retry_after: Duration },
}

impl WindowCounter {
    /// Create an empty counter whose window starts at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    /// Whether the window that started at `window_start` is over.
    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }

    /// Reset the counter if its window has elapsed. Returns true on reset.
    pub fn roll(&mut self, now: Instant, window: Duration) -> bool {
        if self.is_expired(now, window) {
            self.count = 0;
            self.window_start = now;
            true
        } else {
            false
        }
    }

    /// Time left in the current window.
    pub fn duration_until_reset(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.window_start))
    }

    /// Add one request to the window.
    pub fn increment(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Give back one slot taken by [`WindowCounter::admit`].
    pub fn release(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    /// Check the counter against `ceiling` and take a slot when it fits.
    ///
    /// The caller must have rolled the window for `now` first.
    pub fn admit(&mut self, now: Instant, window: Duration, ceiling: u32) -> Admission {
        if self.count < ceiling {
            self.increment();
            Admission::Admitted {
                remaining: ceiling - self.count,
            }
        } else {
            Admission::Exceeded {
                retry_after: self.duration_until_reset(now, window),
            }
        }
    }
}
