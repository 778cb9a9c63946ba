use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;

/// (place, date): the unit of slot exclusivity.
pub type SheetKey = (Ulid, NaiveDate);
pub type SharedDaySheet = Arc<RwLock<DaySheet>>;

/// (group id, date): the unit of quota counting.
pub type QuotaKey = (String, NaiveDate);

/// Committed bookings of one place on one date, one per time of day.
#[derive(Debug)]
pub struct DaySheet {
    pub place_id: Ulid,
    pub date: NaiveDate,
    pub entries: BTreeMap<TimeOfDay, Booking>,
}

impl DaySheet {
    pub fn new(place_id: Ulid, date: NaiveDate) -> Self {
        Self {
            place_id,
            date,
            entries: BTreeMap::new(),
        }
    }

    pub fn occupant(&self, time: TimeOfDay) -> Option<&Booking> {
        self.entries.get(&time)
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.entries.values().find(|b| b.id == *id)
    }

    /// Remove by booking id, returning it if it was present.
    pub fn remove(&mut self, id: &Ulid) -> Option<Booking> {
        let time = self.booking(id)?.time;
        self.entries.remove(&time)
    }
}

/// In-memory state of one tenant's ledger plus the secondary indexes
/// every query runs on. Sheets hold the bookings; everything else points
/// into them by id.
pub struct LedgerStore {
    places: DashMap<Ulid, Place>,
    sheets: DashMap<SheetKey, SharedDaySheet>,
    /// booking id → the sheet holding it
    locator: DashMap<Ulid, SheetKey>,
    /// (group, date) → booking ids
    group_day: DashMap<QuotaKey, Vec<Ulid>>,
    /// requester identity → booking ids
    by_requester: DashMap<String, Vec<Ulid>>,
    quota_gates: DashMap<QuotaKey, Arc<Mutex<()>>>,
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            places: DashMap::new(),
            sheets: DashMap::new(),
            locator: DashMap::new(),
            group_day: DashMap::new(),
            by_requester: DashMap::new(),
            quota_gates: DashMap::new(),
        }
    }

    // ── Places ───────────────────────────────────────────────

    pub fn place_count(&self) -> usize {
        self.places.len()
    }

    pub fn contains_place(&self, id: &Ulid) -> bool {
        self.places.contains_key(id)
    }

    pub fn place(&self, id: &Ulid) -> Option<Place> {
        self.places.get(id).map(|e| e.value().clone())
    }

    pub fn places(&self) -> Vec<Place> {
        self.places.iter().map(|e| e.value().clone()).collect()
    }

    // ── Sheets ───────────────────────────────────────────────

    pub fn sheet(&self, key: &SheetKey) -> Option<SharedDaySheet> {
        self.sheets.get(key).map(|e| e.value().clone())
    }

    pub fn sheet_or_insert(&self, place_id: Ulid, date: NaiveDate) -> SharedDaySheet {
        self.sheets
            .entry((place_id, date))
            .or_insert_with(|| Arc::new(RwLock::new(DaySheet::new(place_id, date))))
            .clone()
    }

    pub fn sheets(&self) -> Vec<SharedDaySheet> {
        self.sheets.iter().map(|e| e.value().clone()).collect()
    }

    // ── Indexes ──────────────────────────────────────────────

    pub fn locate(&self, booking_id: &Ulid) -> Option<SheetKey> {
        self.locator.get(booking_id).map(|e| *e.value())
    }

    /// Live bookings of a group on a date. Ids whose booking has since been
    /// removed are skipped, so the count always reflects the sheets.
    pub fn group_day_count(&self, group_id: &str, date: NaiveDate) -> u32 {
        let ids = self
            .group_day
            .get(&(group_id.to_string(), date))
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter(|id| self.locator.contains_key(id)).count() as u32
    }

    pub fn requester_booking_ids(&self, identity: &str) -> Vec<Ulid> {
        self.by_requester
            .get(identity)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// The admission scope for a (group, date): held across the quota
    /// check and the commit.
    pub fn quota_gate(&self, group_id: &str, date: NaiveDate) -> Arc<Mutex<()>> {
        self.quota_gates
            .entry((group_id.to_string(), date))
            .or_default()
            .clone()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a place event. Booking events go through `apply_to_sheet`.
    pub fn apply_place_event(&self, event: &Event) {
        match event {
            Event::PlaceCreated {
                id,
                name,
                description,
                schedule,
            } => {
                self.places.insert(
                    *id,
                    Place {
                        id: *id,
                        name: name.clone(),
                        description: description.clone(),
                        active: true,
                        schedule: schedule.clone(),
                    },
                );
            }
            Event::PlaceRetired { id } => {
                if let Some(mut place) = self.places.get_mut(id) {
                    place.active = false;
                }
            }
            Event::BookingCreated(_) | Event::BookingCancelled { .. } => {}
        }
    }

    /// Apply a booking event to its sheet (caller holds the sheet's write lock).
    pub fn apply_to_sheet(&self, sheet: &mut DaySheet, event: &Event) {
        match event {
            Event::BookingCreated(booking) => {
                self.locator
                    .insert(booking.id, (booking.place_id, booking.date));
                self.group_day
                    .entry((booking.group.id.clone(), booking.date))
                    .or_default()
                    .push(booking.id);
                self.by_requester
                    .entry(booking.requester.clone())
                    .or_default()
                    .push(booking.id);
                sheet.entries.insert(booking.time, booking.clone());
            }
            Event::BookingCancelled { id, .. } => {
                if let Some(booking) = sheet.remove(id) {
                    self.unindex(&booking);
                }
            }
            Event::PlaceCreated { .. } | Event::PlaceRetired { .. } => {}
        }
    }

    fn unindex(&self, booking: &Booking) {
        self.locator.remove(&booking.id);
        let quota_key = (booking.group.id.clone(), booking.date);
        if let Some(mut ids) = self.group_day.get_mut(&quota_key) {
            ids.retain(|id| *id != booking.id);
        }
        self.group_day.remove_if(&quota_key, |_, ids| ids.is_empty());
        if let Some(mut ids) = self.by_requester.get_mut(&booking.requester) {
            ids.retain(|id| *id != booking.id);
        }
        self.by_requester
            .remove_if(&booking.requester, |_, ids| ids.is_empty());
    }

    /// Drop every sheet dated before `cutoff`. Returns the number of bookings removed.
    pub async fn drop_before(&self, cutoff: NaiveDate) -> usize {
        let stale: Vec<SheetKey> = self
            .sheets
            .iter()
            .filter(|e| e.key().1 < cutoff)
            .map(|e| *e.key())
            .collect();

        let mut removed = 0;
        for key in stale {
            let Some((_, sheet)) = self.sheets.remove(&key) else {
                continue;
            };
            let sheet = sheet.read().await;
            for booking in sheet.entries.values() {
                self.unindex(booking);
                removed += 1;
            }
        }
        self.quota_gates.retain(|key, _| key.1 >= cutoff);
        self.group_day.retain(|key, _| key.1 >= cutoff);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 10).unwrap()
    }

    fn booking(place_id: Ulid, hour: u16, group: &str, who: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            place_id,
            date: day(),
            time: TimeOfDay::from_hm(hour, 0).unwrap(),
            requester: who.into(),
            requester_name: who.into(),
            group: GroupRef { id: group.into(), name: group.into(), parish: None },
            reason: "r".into(),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn created_booking_is_indexed_everywhere() {
        let store = LedgerStore::new();
        let pid = Ulid::new();
        let b = booking(pid, 10, "g1", "kim");
        let sheet = store.sheet_or_insert(pid, day());
        store.apply_to_sheet(&mut *sheet.write().await, &Event::BookingCreated(b.clone()));

        assert_eq!(store.locate(&b.id), Some((pid, day())));
        assert_eq!(store.group_day_count("g1", day()), 1);
        assert_eq!(store.group_day_count("g2", day()), 0);
        assert_eq!(store.requester_booking_ids("kim"), vec![b.id]);
        assert_eq!(sheet.read().await.occupant(b.time), Some(&b));
    }

    #[tokio::test]
    async fn cancelled_booking_leaves_no_trace() {
        let store = LedgerStore::new();
        let pid = Ulid::new();
        let b = booking(pid, 10, "g1", "kim");
        let sheet = store.sheet_or_insert(pid, day());
        {
            let mut guard = sheet.write().await;
            store.apply_to_sheet(&mut guard, &Event::BookingCreated(b.clone()));
            store.apply_to_sheet(
                &mut guard,
                &Event::BookingCancelled { id: b.id, place_id: pid, date: day() },
            );
        }
        assert_eq!(store.locate(&b.id), None);
        assert_eq!(store.group_day_count("g1", day()), 0);
        assert!(store.requester_booking_ids("kim").is_empty());
        assert!(sheet.read().await.entries.is_empty());
    }

    #[tokio::test]
    async fn drop_before_only_touches_older_sheets() {
        let store = LedgerStore::new();
        let pid = Ulid::new();
        let old = booking(pid, 10, "g1", "kim");
        let mut fresh = booking(pid, 11, "g1", "kim");
        fresh.date = day().succ_opt().unwrap();

        for b in [&old, &fresh] {
            let sheet = store.sheet_or_insert(pid, b.date);
            store.apply_to_sheet(&mut *sheet.write().await, &Event::BookingCreated(b.clone()));
        }

        let removed = store.drop_before(fresh.date).await;
        assert_eq!(removed, 1);
        assert_eq!(store.locate(&old.id), None);
        assert!(store.locate(&fresh.id).is_some());
        assert_eq!(store.requester_booking_ids("kim"), vec![fresh.id]);
    }

    #[test]
    fn retiring_a_place_keeps_it_listed_inactive() {
        let store = LedgerStore::new();
        let id = Ulid::new();
        store.apply_place_event(&Event::PlaceCreated {
            id,
            name: "Hall".into(),
            description: None,
            schedule: default_schedule(),
        });
        store.apply_place_event(&Event::PlaceRetired { id });
        let place = store.place(&id).unwrap();
        assert!(!place.active);
        assert_eq!(store.place_count(), 1);
    }
}
