//! Sliding-Window Rate Limiter
//!
//! Admission control for user-initiated `question` traffic. Only admissions
//! inside the trailing window count; older entries are pruned lazily on every
//! check.
//!
//! Each operation has an `*_at(now)` form so callers and tests can supply the
//! clock. The plain forms read [`tokio::time::Instant::now`], which follows
//! tokio's paused test clock.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_messages: usize,
    window: Duration,
    sent: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_messages: usize, window: Duration) -> Self {
        Self {
            max_messages,
            window,
            sent: VecDeque::with_capacity(max_messages),
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn can_send(&mut self) -> bool {
        self.can_send_at(Instant::now())
    }

    pub fn can_send_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.sent.len() < self.max_messages
    }

    pub fn record_sent(&mut self) {
        self.record_sent_at(Instant::now())
    }

    pub fn record_sent_at(&mut self, now: Instant) {
        self.sent.push_back(now);
    }

    /// Admissions left in the current window
    pub fn remaining(&mut self) -> usize {
        self.remaining_at(Instant::now())
    }

    pub fn remaining_at(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.max_messages.saturating_sub(self.sent.len())
    }

    /// Wait until the oldest retained admission leaves the window
    ///
    /// Zero when a slot is already free.
    pub fn time_until_next_slot(&mut self) -> Duration {
        self.time_until_next_slot_at(Instant::now())
    }

    pub fn time_until_next_slot_at(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if self.sent.len() < self.max_messages {
            return Duration::ZERO;
        }
        match self.sent.front() {
            Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.sent.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}
