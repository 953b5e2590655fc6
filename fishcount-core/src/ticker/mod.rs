//! ticker — the periodic schedule that drives video playback
//!
//! Poll-based: the owner asks `poll(now)` from its event loop and sleeps or
//! repaints until `next_due`.  Stopping disarms the schedule; nothing fires
//! afterwards until `start` is called again.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// Arm the schedule; the first tick is due immediately.
    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// True if a tick is due at `now`.  The next tick is then scheduled one
    /// interval after `now`, so a slow tick delays the following one instead
    /// of triggering a burst.
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

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn inactive_ticker_never_fires() {
        let mut ticker = Ticker::new(30 * MS);
        let now = Instant::now();
        assert!(!ticker.is_active());
        assert!(!ticker.poll(now));
        assert!(!ticker.poll(now + 1000 * MS));
        assert_eq!(ticker.next_due(), None);
    }

    #[test]
    fn fires_immediately_then_once_per_interval() {
        let mut ticker = Ticker::new(30 * MS);
        let t0 = Instant::now();
        ticker.start(t0);
        assert!(ticker.poll(t0));
        assert!(!ticker.poll(t0 + 10 * MS));
        assert_eq!(ticker.next_due(), Some(t0 + 30 * MS));
        assert!(ticker.poll(t0 + 30 * MS));
        assert!(!ticker.poll(t0 + 59 * MS));
    }

    #[test]
    fn late_poll_does_not_burst() {
        let mut ticker = Ticker::new(30 * MS);
        let t0 = Instant::now();
        ticker.start(t0);
        assert!(ticker.poll(t0));
        assert!(ticker.poll(t0 + 200 * MS));
        assert!(!ticker.poll(t0 + 201 * MS));
        assert_eq!(ticker.next_due(), Some(t0 + 230 * MS));
    }

    #[test]
    fn stop_cancels_pending_ticks() {
        let mut ticker = Ticker::new(Duration::ZERO);
        let t0 = Instant::now();
        ticker.start(t0);
        ticker.stop();
        assert!(!ticker.poll(t0 + 5 * MS));
        assert!(!ticker.is_active());
    }
}
