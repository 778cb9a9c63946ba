use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use chrono::{Datelike, Local, NaiveDate, Utc};

use crate::model::Ms;

/// Source of "today" for admission and of creation timestamps.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
    fn now_ms(&self) -> Ms;
}

/// Wall clock. "Today" is the server's local calendar date.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now_ms(&self) -> Ms {
        Utc::now().timestamp_millis()
    }
}

/// Pinned clock for tests and replays. The date can be moved forward.
#[derive(Debug)]
pub struct FixedClock {
    days_from_ce: AtomicI32,
    now_ms: AtomicI64,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        let now_ms = today
            .and_hms_opt(8, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or_default();
        Self {
            days_from_ce: AtomicI32::new(today.num_days_from_ce()),
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set_today(&self, today: NaiveDate) {
        self.days_from_ce
            .store(today.num_days_from_ce(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        NaiveDate::from_num_days_from_ce_opt(self.days_from_ce.load(Ordering::SeqCst))
            .unwrap_or(NaiveDate::MIN)
    }

    fn now_ms(&self) -> Ms {
        // Strictly increasing so creation stamps stay ordered within a test.
        self.now_ms.fetch_add(1, Ordering::SeqCst)
    }
}
