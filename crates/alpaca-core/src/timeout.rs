// src/timeout.rs
use std::time::{Duration, Instant};

use crate::conn::Connection;

impl Connection {
    /// Schedule the connection's deadline `seconds` from now.
    ///
    /// A negative value cancels the deadline and returns `false` if there
    /// was none. Otherwise the server is woken when the new deadline is the
    /// first one or sooner than the current one, so its wait step can be
    /// shortened. Values that do not fit a `Duration` (NaN, infinity) are
    /// rejected with `false`.
    pub fn set_timeout(&mut self, seconds: f64) -> bool {
        self.set_timeout_at(Instant::now(), seconds)
    }

    pub(crate) fn set_timeout_at(&mut self, now: Instant, seconds: f64) -> bool {
        if seconds < 0.0 {
            return self.deadline.take().is_some();
        }

        let Some(deadline) = Duration::try_from_secs_f64(seconds)
            .ok()
            .and_then(|d| now.checked_add(d))
        else {
            return false;
        };

        let sooner = match self.deadline {
            None => true,
            Some(current) => deadline < current,
        };
        if sooner {
            self.waker.wake();
        }

        self.deadline = Some(deadline);
        true
    }

    /// Absolute deadline, `None` when no timeout is scheduled.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}
