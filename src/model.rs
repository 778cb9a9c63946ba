use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::limits::MAX_SLOTS_PER_SCHEDULE;

/// Unix milliseconds, used for creation stamps only.
pub type Ms = i64;

/// A wall-clock time of day on the minute grid, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self(hour * 60 + minute))
        } else {
            None
        }
    }

    /// Parse `"HH:MM"` (a single-digit hour is accepted).
    pub fn parse(s: &str) -> Result<Self, InputError> {
        let bad = || InputError::Time(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if h.is_empty() || h.len() > 2 || m.len() != 2 || !digits(h) || !digits(m) {
            return Err(bad());
        }
        let hour: u16 = h.parse().map_err(|_| bad())?;
        let minute: u16 = m.parse().map_err(|_| bad())?;
        Self::from_hm(hour, minute).ok_or_else(bad)
    }

    pub fn hour(&self) -> u16 {
        self.0 / 60
    }

    pub fn minute(&self) -> u16 {
        self.0 % 60
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Hourly slots from 09:00 through 17:00.
pub fn default_schedule() -> Vec<TimeOfDay> {
    (9..=17)
        .filter_map(|h| TimeOfDay::from_hm(h, 0))
        .collect()
}

/// A schedule must be non-empty and strictly ascending.
pub fn validate_schedule(schedule: &[TimeOfDay]) -> Result<(), InputError> {
    if schedule.is_empty() {
        return Err(InputError::Schedule("empty schedule".into()));
    }
    if schedule.len() > MAX_SLOTS_PER_SCHEDULE {
        return Err(InputError::Schedule(format!(
            "{} slots exceeds {MAX_SLOTS_PER_SCHEDULE}",
            schedule.len()
        )));
    }
    if let Some(w) = schedule.windows(2).find(|w| w[0] >= w[1]) {
        return Err(InputError::Schedule(format!(
            "{} does not come after {}",
            w[1], w[0]
        )));
    }
    Ok(())
}

/// Parse a comma-separated list of `"HH:MM"` times.
pub fn parse_schedule(s: &str) -> Result<Vec<TimeOfDay>, InputError> {
    let schedule = s
        .split(',')
        .map(TimeOfDay::parse)
        .collect::<Result<Vec<_>, _>>()?;
    validate_schedule(&schedule)?;
    Ok(schedule)
}

/// Parse an ISO calendar date (`YYYY-MM-DD`).
pub fn parse_date(s: &str) -> Result<NaiveDate, InputError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| InputError::Date(s.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("malformed date: {0:?} (expected YYYY-MM-DD)")]
    Date(String),
    #[error("malformed time of day: {0:?} (expected HH:MM)")]
    Time(String),
    #[error("invalid schedule: {0}")]
    Schedule(String),
}

// ── People ───────────────────────────────────────────────────────

/// Organization role. Whether a role is quota-bound is decided by `QuotaPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub u8);

impl Role {
    pub const ADMIN: Role = Role(0);
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The group a booking is made on behalf of, with its optional parent (parish).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parish: Option<String>,
}

impl GroupRef {
    /// `"Parish - Group"`, or just the group name for a top-level group.
    pub fn display_name(&self) -> String {
        match &self.parish {
            Some(parish) => format!("{parish} - {}", self.name),
            None => self.name.clone(),
        }
    }
}

/// The caller, as resolved by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub identity: String,
    pub name: String,
    pub group: GroupRef,
    pub role: Role,
}

// ── Places, slots, bookings ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    /// Fixed daily times, strictly ascending.
    pub schedule: Vec<TimeOfDay>,
}

impl Place {
    pub fn offers(&self, time: TimeOfDay) -> bool {
        self.schedule.binary_search(&time).is_ok()
    }
}

/// A committed reservation of one (place, date, time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub place_id: Ulid,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    pub requester: String,
    pub requester_name: String,
    pub group: GroupRef,
    pub reason: String,
    pub created_at: Ms,
}

/// What a caller submits to book a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub place_id: Ulid,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    Available,
    BookedBySelf,
    BookedByOther,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "AVAILABLE",
            SlotStatus::BookedBySelf => "BOOKED_BY_SELF",
            SlotStatus::BookedByOther => "BOOKED_BY_OTHER",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only details of whoever occupies a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotHolder {
    pub booking_id: Ulid,
    pub reserved_by: String,
    pub group: GroupRef,
    pub reason: String,
}

/// Derived view of one (place, date, time). Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub place_id: Ulid,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    pub status: SlotStatus,
    pub holder: Option<SlotHolder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub date: NaiveDate,
    pub count: u32,
    pub ceiling: u32,
    pub exempt: bool,
}

impl QuotaStatus {
    pub fn at_ceiling(&self) -> bool {
        !self.exempt && self.count >= self.ceiling
    }

    /// Bookings still admissible on this date; `None` means unlimited.
    pub fn remaining(&self) -> Option<u32> {
        (!self.exempt).then(|| self.ceiling.saturating_sub(self.count))
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// Ledger events. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PlaceCreated {
        id: Ulid,
        name: String,
        description: Option<String>,
        schedule: Vec<TimeOfDay>,
    },
    PlaceRetired {
        id: Ulid,
    },
    BookingCreated(Booking),
    BookingCancelled {
        id: Ulid,
        place_id: Ulid,
        date: NaiveDate,
    },
}

impl Event {
    pub fn place_id(&self) -> Ulid {
        match self {
            Event::PlaceCreated { id, .. } | Event::PlaceRetired { id } => *id,
            Event::BookingCreated(booking) => booking.place_id,
            Event::BookingCancelled { place_id, .. } => *place_id,
        }
    }
}
