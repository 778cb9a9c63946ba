use std::collections::BTreeMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Ledger, LedgerError};

/// Status of a slot as seen by members of `viewer_group`.
pub fn classify(occupant: Option<&Booking>, viewer_group: &str) -> SlotStatus {
    match occupant {
        None => SlotStatus::Available,
        Some(b) if b.group.id == viewer_group => SlotStatus::BookedBySelf,
        Some(_) => SlotStatus::BookedByOther,
    }
}

/// The slots of one place on one date, captured from a single consistent
/// read of the ledger. Statuses are derived while iterating; the view can
/// be walked any number of times and always yields schedule order.
#[derive(Debug, Clone)]
pub struct DaySlots {
    place_id: Ulid,
    date: NaiveDate,
    viewer_group: String,
    schedule: Vec<TimeOfDay>,
    occupied: BTreeMap<TimeOfDay, Booking>,
}

impl DaySlots {
    pub fn new(
        place: &Place,
        date: NaiveDate,
        viewer_group: &str,
        occupied: BTreeMap<TimeOfDay, Booking>,
    ) -> Self {
        Self {
            place_id: place.id,
            date,
            viewer_group: viewer_group.to_string(),
            schedule: place.schedule.clone(),
            occupied,
        }
    }

    pub fn place_id(&self) -> Ulid {
        self.place_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }

    pub fn iter(&self) -> SlotIter<'_> {
        SlotIter { view: self, pos: 0 }
    }

    pub fn get(&self, time: TimeOfDay) -> Option<Slot> {
        self.schedule
            .binary_search(&time)
            .ok()
            .map(|_| self.derive(time))
    }

    fn derive(&self, time: TimeOfDay) -> Slot {
        let occupant = self.occupied.get(&time);
        Slot {
            place_id: self.place_id,
            date: self.date,
            time,
            status: classify(occupant, &self.viewer_group),
            holder: occupant.map(|b| SlotHolder {
                booking_id: b.id,
                reserved_by: b.requester_name.clone(),
                group: b.group.clone(),
                reason: b.reason.clone(),
            }),
        }
    }
}

pub struct SlotIter<'a> {
    view: &'a DaySlots,
    pos: usize,
}

impl Iterator for SlotIter<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let time = *self.view.schedule.get(self.pos)?;
        self.pos += 1;
        Some(self.view.derive(time))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.view.schedule.len() - self.pos;
        (left, Some(left))
    }
}

impl ExactSizeIterator for SlotIter<'_> {}

impl<'a> IntoIterator for &'a DaySlots {
    type Item = Slot;
    type IntoIter = SlotIter<'a>;

    fn into_iter(self) -> SlotIter<'a> {
        self.iter()
    }
}

impl Ledger {
    /// Every slot of an active place on `date`. Past dates are listed too;
    /// admission, not listing, refuses them.
    pub async fn list_slots(
        &self,
        place_id: Ulid,
        date: NaiveDate,
        viewer_group: &str,
    ) -> Result<DaySlots, LedgerError> {
        let place = self
            .store
            .place(&place_id)
            .filter(|p| p.active)
            .ok_or(LedgerError::NotFound(place_id))?;
        let occupied = match self.store.sheet(&(place_id, date)) {
            Some(sheet) => sheet.read().await.entries.clone(),
            None => BTreeMap::new(),
        };
        Ok(DaySlots::new(&place, date, viewer_group, occupied))
    }
}
