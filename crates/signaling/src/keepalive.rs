//! Keepalive 调度
//!
//! Pure deadline bookkeeping. The loop sleeps until [`KeepAliveScheduler::next_deadline`]
//! and calls [`KeepAliveScheduler::poll`]; the scheduler never touches the
//! transport itself.

use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Shorter intervals are raised to this floor
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct KeepAliveScheduler {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Default for KeepAliveScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_KEEPALIVE_INTERVAL)
    }
}

impl KeepAliveScheduler {
    pub fn new(interval: Duration) -> Self {
        if interval < MIN_KEEPALIVE_INTERVAL {
            warn!(
                "keepalive 间隔 {:?} 过短，使用 {:?}",
                interval, MIN_KEEPALIVE_INTERVAL
            );
        }
        Self {
            interval: interval.max(MIN_KEEPALIVE_INTERVAL),
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking; the first keepalive is due one interval after `now`
    pub fn arm(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    pub fn disarm(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_due
    }

    /// Returns `true` when a keepalive is due and reschedules the next one.
    /// Missed ticks collapse into a single keepalive.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}
