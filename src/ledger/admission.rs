use chrono::{Days, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::{DaySheet, LedgerError, QuotaPolicy};

/// Shape checks that need no ledger state beyond the place record.
pub(crate) fn validate_request(
    requester: &Requester,
    request: &NewBooking,
    place: Option<&Place>,
) -> Result<(), LedgerError> {
    if requester.identity.trim().is_empty() {
        return Err(LedgerError::InvalidInput("requester identity is empty".into()));
    }
    if requester.identity.len() > MAX_IDENTITY_LEN {
        return Err(LedgerError::InvalidInput("requester identity too long".into()));
    }
    if request.reason.trim().is_empty() {
        return Err(LedgerError::InvalidInput("reason is required".into()));
    }
    if request.reason.chars().count() > MAX_REASON_LEN {
        return Err(LedgerError::InvalidInput(format!(
            "reason exceeds {MAX_REASON_LEN} characters"
        )));
    }
    let place = match place {
        Some(p) if p.active => p,
        _ => {
            return Err(LedgerError::InvalidInput(format!(
                "no bookable place {}",
                request.place_id
            )));
        }
    };
    if !place.offers(request.time) {
        return Err(LedgerError::InvalidInput(format!(
            "{} has no slot at {}",
            place.name, request.time
        )));
    }
    Ok(())
}

/// Dates strictly before today are closed; today itself is bookable.
pub(crate) fn check_not_past(date: NaiveDate, today: NaiveDate) -> Result<(), LedgerError> {
    if date < today {
        return Err(LedgerError::PastDate(date));
    }
    Ok(())
}

pub(crate) fn check_horizon(date: NaiveDate, today: NaiveDate) -> Result<(), LedgerError> {
    let horizon = today
        .checked_add_days(Days::new(MAX_BOOKING_HORIZON_DAYS as u64))
        .unwrap_or(NaiveDate::MAX);
    if date > horizon {
        return Err(LedgerError::InvalidInput(format!(
            "{date} is more than {MAX_BOOKING_HORIZON_DAYS} days ahead"
        )));
    }
    Ok(())
}

pub(crate) fn check_quota(
    policy: &QuotaPolicy,
    role: Role,
    count: u32,
    date: NaiveDate,
) -> Result<(), LedgerError> {
    if policy.admits(role, count) {
        return Ok(());
    }
    Err(LedgerError::QuotaExceeded {
        date,
        count,
        ceiling: policy.ceiling,
    })
}

pub(crate) fn check_slot_free(sheet: &DaySheet, time: TimeOfDay) -> Result<(), LedgerError> {
    match sheet.occupant(time) {
        Some(existing) => Err(LedgerError::Conflict {
            date: sheet.date,
            time,
            existing: existing.id,
        }),
        None => Ok(()),
    }
}
