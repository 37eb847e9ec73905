//! Time source and the cached `Date` header.
//!
//! Formatting an HTTP date for every response is wasteful, so [`DateCache`]
//! keeps the complete `Date: ...\r\n` line and only reformats it when the clock
//! has moved on to another second.

use std::fmt;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use once_cell::sync::Lazy;

use crate::utils::lock;

pub trait Clock: Send + Sync + fmt::Debug {
    fn utc_now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn utc_now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[derive(Debug)]
struct CachedDate {
    second: i64,
    line: Bytes,
}

static SYSTEM_DATES: Lazy<Arc<DateCache>> = Lazy::new(|| Arc::new(DateCache::new(Arc::new(SystemClock))));

/// The formatted `Date` header line, refreshed at most once per second.
#[derive(Debug)]
pub struct DateCache {
    clock: Arc<dyn Clock>,
    current: ArcSwap<CachedDate>,
}

impl DateCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.utc_now();
        let current = ArcSwap::from_pointee(CachedDate { second: now.timestamp(), line: format_line(now) });
        Self { clock, current }
    }

    /// The process-wide cache backed by the system clock.
    pub fn system() -> Arc<DateCache> {
        Arc::clone(&SYSTEM_DATES)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// `Date: <IMF-fixdate>\r\n`
    pub fn date_line(&self) -> Bytes {
        let now = self.clock.utc_now();
        let second = now.timestamp();

        let cached = self.current.load();
        if cached.second == second {
            return cached.line.clone();
        }

        let line = format_line(now);
        self.current.store(Arc::new(CachedDate { second, line: line.clone() }));
        line
    }
}

fn format_line(now: DateTime<Utc>) -> Bytes {
    Bytes::from(format!("Date: {}\r\n", now.format("%a, %d %b %Y %H:%M:%S GMT")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn formats_imf_fixdate() {
        let at = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        let dates = DateCache::new(Arc::new(ManualClock::new(at)));
        assert_eq!(dates.date_line(), Bytes::from_static(b"Date: Sun, 06 Nov 1994 08:49:37 GMT\r\n"));
    }

    #[test]
    fn refreshes_once_per_second() {
        let at = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        let clock = Arc::new(ManualClock::new(at));
        let dates = DateCache::new(Arc::clone(&clock) as Arc<dyn Clock>);

        let first = dates.date_line();
        clock.advance(TimeDelta::milliseconds(400));
        assert_eq!(dates.date_line(), first);

        clock.advance(TimeDelta::milliseconds(600));
        assert_eq!(dates.date_line(), Bytes::from_static(b"Date: Fri, 01 Mar 2024 00:00:00 GMT\r\n"));
    }
}
