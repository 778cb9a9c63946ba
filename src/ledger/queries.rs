use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::Ledger;

impl Ledger {
    /// Active places, ordered by name.
    pub fn list_places(&self) -> Vec<Place> {
        let mut places: Vec<Place> = self.store.places().into_iter().filter(|p| p.active).collect();
        places.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        places
    }

    pub fn get_place(&self, id: &Ulid) -> Option<Place> {
        self.store.place(id)
    }

    pub async fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        let key = self.store.locate(id)?;
        let sheet = self.store.sheet(&key)?;
        let guard = sheet.read().await;
        guard.booking(id).cloned()
    }

    /// Bookings made by `identity` dated on or after `from`, ordered by date
    /// then time.
    pub async fn list_for_requester(&self, identity: &str, from: NaiveDate) -> Vec<Booking> {
        let mut out = Vec::new();
        for id in self.store.requester_booking_ids(identity) {
            if let Some(booking) = self.get_booking(&id).await
                && booking.date >= from
            {
                out.push(booking);
            }
        }
        out.sort_by(|a, b| (a.date, a.time, a.place_id).cmp(&(b.date, b.time, b.place_id)));
        out
    }

    /// Bookings made by `identity` on exactly `date`, ordered by time.
    pub async fn bookings_on_date(&self, identity: &str, date: NaiveDate) -> Vec<Booking> {
        let mut out = self.list_for_requester(identity, date).await;
        out.retain(|b| b.date == date);
        out
    }
}
