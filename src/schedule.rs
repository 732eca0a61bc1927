//! # Scheduled Trigger
//!
//! Fires on wall-clock boundaries that are multiples of a fixed interval since
//! the Unix epoch, so the cadence stays the same across restarts.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Interval-based trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    interval_ms: i64,
    next_fire: DateTime<Utc>,
}

impl Trigger {
    /// Due at `now`, then on every aligned multiple of `interval`
    ///
    /// A zero interval gives a trigger that is always due.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use chrono::{TimeZone, Utc};
    /// use waspi::schedule::Trigger;
    ///
    /// let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 3, 10).unwrap();
    /// let mut trigger = Trigger::every(Duration::from_secs(600), start);
    /// assert!(trigger.is_due(start));
    ///
    /// trigger.fire(start);
    /// assert_eq!(trigger.next_fire(), Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap());
    /// ```
    pub fn every(interval: Duration, now: DateTime<Utc>) -> Self {
        Self {
            interval_ms: i64::try_from(interval.as_millis()).unwrap_or(i64::MAX),
            next_fire: now,
        }
    }

    /// Trigger that is due on every check
    pub fn always() -> Self {
        Self {
            interval_ms: 0,
            next_fire: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.interval_ms == 0 || now >= self.next_fire
    }

    /// Record a firing at `now` and schedule the next boundary
    pub fn fire(&mut self, now: DateTime<Utc>) {
        if self.interval_ms == 0 {
            return;
        }

        let slot = now.timestamp_millis().div_euclid(self.interval_ms);
        let next_ms = slot.saturating_add(1).saturating_mul(self.interval_ms);
        self.next_fire = Utc
            .timestamp_millis_opt(next_ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn next_fire(&self) -> DateTime<Utc> {
        self.next_fire
    }

    /// Time left until the trigger is due
    pub fn until_next(&self, now: DateTime<Utc>) -> Duration {
        if self.is_due(now) {
            return Duration::ZERO;
        }
        (self.next_fire - now).to_std().unwrap_or(Duration::ZERO)
    }
}
