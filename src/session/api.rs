use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::ledger::{Ledger, LedgerError};
use crate::model::*;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("transport: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Ledger(e) => e.kind(),
            ApiError::Transport(_) => "transport",
        }
    }
}

/// The operations a reservation session needs from its backend, on behalf
/// of one already-identified requester.
#[async_trait]
pub trait ReservationApi: Send + Sync {
    async fn places(&self) -> Result<Vec<Place>, ApiError>;
    async fn quota_status(&self, date: NaiveDate) -> Result<QuotaStatus, ApiError>;
    async fn slots(&self, place_id: Ulid, date: NaiveDate) -> Result<Vec<Slot>, ApiError>;
    async fn create_booking(&self, request: NewBooking) -> Result<Booking, ApiError>;
    async fn cancel_booking(&self, booking_id: Ulid) -> Result<(), ApiError>;
    async fn my_bookings(&self, from: NaiveDate) -> Result<Vec<Booking>, ApiError>;
}

/// In-process backend: calls the ledger directly as `requester`.
pub struct LedgerClient {
    ledger: Arc<Ledger>,
    requester: Requester,
}

impl LedgerClient {
    pub fn new(ledger: Arc<Ledger>, requester: Requester) -> Self {
        Self { ledger, requester }
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }
}

#[async_trait]
impl ReservationApi for LedgerClient {
    async fn places(&self) -> Result<Vec<Place>, ApiError> {
        Ok(self.ledger.list_places())
    }

    async fn quota_status(&self, date: NaiveDate) -> Result<QuotaStatus, ApiError> {
        Ok(self.ledger.quota_status(&self.requester, date))
    }

    async fn slots(&self, place_id: Ulid, date: NaiveDate) -> Result<Vec<Slot>, ApiError> {
        let view = self
            .ledger
            .list_slots(place_id, date, &self.requester.group.id)
            .await?;
        Ok(view.iter().collect())
    }

    async fn create_booking(&self, request: NewBooking) -> Result<Booking, ApiError> {
        Ok(self.ledger.create_booking(&self.requester, request).await?)
    }

    async fn cancel_booking(&self, booking_id: Ulid) -> Result<(), ApiError> {
        self.ledger
            .cancel_booking(booking_id, &self.requester.identity)
            .await?;
        Ok(())
    }

    async fn my_bookings(&self, from: NaiveDate) -> Result<Vec<Booking>, ApiError> {
        Ok(self
            .ledger
            .list_for_requester(&self.requester.identity, from)
            .await)
    }
}
