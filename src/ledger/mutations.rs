use chrono::NaiveDate;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_CANCELLED_TOTAL, BOOKINGS_CREATED_TOTAL, BOOKINGS_REJECTED_TOTAL};

use super::admission::{check_horizon, check_not_past, check_quota, check_slot_free, validate_request};
use super::{Ledger, LedgerError, WalRequest};

impl Ledger {
    pub async fn create_place(
        &self,
        id: Ulid,
        name: String,
        description: Option<String>,
        schedule: Option<Vec<TimeOfDay>>,
    ) -> Result<Place, LedgerError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::InvalidInput("place name is required".into()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(LedgerError::LimitExceeded("place name too long"));
        }
        if let Some(d) = &description
            && d.chars().count() > MAX_DESCRIPTION_LEN
        {
            return Err(LedgerError::LimitExceeded("place description too long"));
        }
        let schedule = schedule.unwrap_or_else(default_schedule);
        validate_schedule(&schedule)?;

        let _barrier = self.commit_barrier.read().await;
        let _admin = self.place_admin.lock().await;
        if self.store.contains_place(&id) {
            return Err(LedgerError::AlreadyExists(id));
        }
        if self.store.place_count() >= MAX_PLACES_PER_TENANT {
            return Err(LedgerError::LimitExceeded("too many places"));
        }

        let event = Event::PlaceCreated {
            id,
            name,
            description,
            schedule,
        };
        self.persist_place_event(&event).await?;
        tracing::info!("place {id} created");
        self.store.place(&id).ok_or(LedgerError::NotFound(id))
    }

    /// Take a place out of service. Its bookings stay in the ledger but no
    /// new ones are admitted and its slots are no longer listed.
    pub async fn retire_place(&self, id: Ulid) -> Result<(), LedgerError> {
        let _barrier = self.commit_barrier.read().await;
        let _admin = self.place_admin.lock().await;
        match self.store.place(&id) {
            Some(p) if p.active => {}
            _ => return Err(LedgerError::NotFound(id)),
        }
        self.persist_place_event(&Event::PlaceRetired { id }).await?;
        tracing::info!("place {id} retired");
        Ok(())
    }

    /// Admit and commit one booking. Checks run in a fixed order and the
    /// first failure wins: input shape, past date, quota, slot uniqueness.
    pub async fn create_booking(
        &self,
        requester: &Requester,
        request: NewBooking,
    ) -> Result<Booking, LedgerError> {
        let result = self.admit(requester, request).await;
        match &result {
            Ok(booking) => {
                metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
                tracing::info!(
                    booking = %booking.id,
                    place = %booking.place_id,
                    date = %booking.date,
                    time = %booking.time,
                    requester = %booking.requester,
                    group = %booking.group.id,
                    "booking committed"
                );
            }
            Err(e) => {
                metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => e.kind()).increment(1);
                tracing::debug!(requester = %requester.identity, reason = e.kind(), "booking rejected: {e}");
            }
        }
        result
    }

    async fn admit(&self, requester: &Requester, request: NewBooking) -> Result<Booking, LedgerError> {
        let place = self.store.place(&request.place_id);
        validate_request(requester, &request, place.as_ref())?;
        let today = self.clock.today();
        check_not_past(request.date, today)?;
        check_horizon(request.date, today)?;

        // Lock order for every booking writer: barrier, quota gate, sheet.
        let _barrier = self.commit_barrier.read().await;
        let gate = self.store.quota_gate(&requester.group.id, request.date);
        let _quota = gate.lock().await;
        let sheet = self.store.sheet_or_insert(request.place_id, request.date);
        let mut sheet = sheet.write().await;

        let count = self.current_count(&requester.group.id, request.date);
        check_quota(&self.policy, requester.role, count, request.date)?;
        check_slot_free(&sheet, request.time)?;

        let booking = Booking {
            id: Ulid::new(),
            place_id: request.place_id,
            date: request.date,
            time: request.time,
            requester: requester.identity.clone(),
            requester_name: requester.name.clone(),
            group: requester.group.clone(),
            reason: request.reason.trim().to_string(),
            created_at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut sheet, &Event::BookingCreated(booking.clone()))
            .await?;
        Ok(booking)
    }

    /// Remove a booking. Only the identity that made it may cancel it; a
    /// booking that is already gone (including one cancelled by a racing
    /// call) is `NotFound`.
    pub async fn cancel_booking(&self, id: Ulid, identity: &str) -> Result<Booking, LedgerError> {
        let key = self.store.locate(&id).ok_or(LedgerError::NotFound(id))?;
        let shared = self.store.sheet(&key).ok_or(LedgerError::NotFound(id))?;

        let group_id = {
            let sheet = shared.read().await;
            let booking = sheet.booking(&id).ok_or(LedgerError::NotFound(id))?;
            if booking.requester != identity {
                return Err(LedgerError::NotOwner(id));
            }
            booking.group.id.clone()
        };

        let _barrier = self.commit_barrier.read().await;
        let gate = self.store.quota_gate(&group_id, key.1);
        let _quota = gate.lock().await;
        let mut sheet = shared.write().await;
        let booking = sheet.booking(&id).cloned().ok_or(LedgerError::NotFound(id))?;

        let event = Event::BookingCancelled {
            id,
            place_id: key.0,
            date: key.1,
        };
        self.persist_and_apply(&mut sheet, &event).await?;
        metrics::counter!(BOOKINGS_CANCELLED_TOTAL).increment(1);
        tracing::info!(
            booking = %id,
            place = %key.0,
            date = %key.1,
            time = %booking.time,
            requester = identity,
            "booking cancelled"
        );
        Ok(booking)
    }

    /// Forget bookings dated before `cutoff`, then compact so they stay gone
    /// after a restart. Returns how many were dropped.
    pub async fn prune_before(&self, cutoff: NaiveDate) -> Result<usize, LedgerError> {
        let removed = {
            let _barrier = self.commit_barrier.write().await;
            self.store.drop_before(cutoff).await
        };
        if removed > 0 {
            self.compact_wal().await?;
            tracing::info!("pruned {removed} bookings dated before {cutoff}");
        }
        Ok(removed)
    }

    /// Rewrite the WAL as the minimal event set for the current state:
    /// every place (retired ones followed by their retirement) and every live booking.
    pub async fn compact_wal(&self) -> Result<(), LedgerError> {
        let _barrier = self.commit_barrier.write().await;

        let mut places = self.store.places();
        places.sort_by_key(|p| p.id);
        let mut events = Vec::with_capacity(places.len());
        for place in places {
            let id = place.id;
            let active = place.active;
            events.push(Event::PlaceCreated {
                id,
                name: place.name,
                description: place.description,
                schedule: place.schedule,
            });
            if !active {
                events.push(Event::PlaceRetired { id });
            }
        }
        for shared in self.store.sheets() {
            let sheet = shared.read().await;
            events.extend(sheet.entries.values().cloned().map(Event::BookingCreated));
        }

        let (done, rx) = oneshot::channel();
        self.wal_tx
            .send(WalRequest::Compact { events, done })
            .await
            .map_err(|_| LedgerError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (done, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalRequest::AppendsSinceCompact { done })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
