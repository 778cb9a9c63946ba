//! The client-side reservation flow: date, then place, then slot, then a
//! reason and a submission, with a "my bookings" view on the side.
//!
//! A [`ReservationSession`] never performs I/O. Every transition returns the
//! [`Request`]s it needs answered; the caller runs them against a
//! [`ReservationApi`] (see [`drive`]) and feeds each [`Response`] back through
//! [`ReservationSession::apply`]. Requests carry a [`Ticket`] with a
//! monotonically increasing sequence number. Only the newest outstanding
//! ticket of each kind is accepted, and changing the date or place retires
//! the tickets that depended on it, so a late answer to an outdated
//! question is dropped instead of overwriting newer state.

mod api;

pub use api::{ApiError, LedgerClient, ReservationApi};

use std::collections::HashMap;

use chrono::{Datelike, Days, NaiveDate};
use thiserror::Error;
use ulid::Ulid;

use crate::limits::MAX_REASON_LEN;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    DateChosen,
    PlaceChosen,
    SlotChosen(SlotStatus),
    Composing,
    Submitting,
    ViewBookings,
}

/// What the requester should be told about the last thing that happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Booked(Booking),
    Cancelled(Ulid),
    Failed { kind: &'static str, message: String },
}

impl Notice {
    fn failed(err: &ApiError) -> Self {
        Notice::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{0} is not in the bookable window")]
    OutsideWindow(NaiveDate),
    #[error("choose a date first")]
    NoDate,
    #[error("choose a place first")]
    NoPlace,
    #[error("unknown place {0}")]
    UnknownPlace(Ulid),
    #[error("slots are still loading")]
    SlotsNotLoaded,
    #[error("no slot at {0}")]
    UnknownSlot(TimeOfDay),
    #[error("this slot cannot be booked")]
    NotBookable,
    #[error("no booking is being composed")]
    NotComposing,
    #[error("a reason is required")]
    EmptyReason,
    #[error("reason exceeds {MAX_REASON_LEN} characters")]
    ReasonTooLong,
    #[error("a submission is still in flight")]
    Busy,
    #[error("booking {0} is not listed")]
    UnknownBooking(Ulid),
}

// ── Requests and responses ───────────────────────────────

/// Which outstanding question a ticket answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKey {
    Places,
    Quota,
    Slots,
    Create,
    MyBookings,
    Cancel(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub seq: u64,
    pub key: FetchKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch {
    Places,
    Quota { date: NaiveDate },
    Slots { place_id: Ulid, date: NaiveDate },
    Create(NewBooking),
    MyBookings { from: NaiveDate },
    Cancel { booking_id: Ulid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub ticket: Ticket,
    pub fetch: Fetch,
}

#[derive(Debug)]
pub enum Reply {
    Places(Result<Vec<Place>, ApiError>),
    Quota(Result<QuotaStatus, ApiError>),
    Slots(Result<Vec<Slot>, ApiError>),
    Created(Result<Booking, ApiError>),
    MyBookings(Result<Vec<Booking>, ApiError>),
    Cancelled(Result<(), ApiError>),
}

#[derive(Debug)]
pub struct Response {
    pub ticket: Ticket,
    pub reply: Reply,
}

impl Request {
    /// Ask the backend and wrap the answer with this request's ticket.
    pub async fn send(self, api: &dyn ReservationApi) -> Response {
        let reply = match self.fetch {
            Fetch::Places => Reply::Places(api.places().await),
            Fetch::Quota { date } => Reply::Quota(api.quota_status(date).await),
            Fetch::Slots { place_id, date } => Reply::Slots(api.slots(place_id, date).await),
            Fetch::Create(request) => Reply::Created(api.create_booking(request).await),
            Fetch::MyBookings { from } => Reply::MyBookings(api.my_bookings(from).await),
            Fetch::Cancel { booking_id } => Reply::Cancelled(api.cancel_booking(booking_id).await),
        };
        Response {
            ticket: self.ticket,
            reply,
        }
    }
}

/// Run requests to completion, feeding answers back in and following up on
/// whatever they trigger, until the session has nothing left to ask.
pub async fn drive(session: &mut ReservationSession, api: &dyn ReservationApi, requests: Vec<Request>) {
    let mut queue = std::collections::VecDeque::from(requests);
    while let Some(request) = queue.pop_front() {
        let response = request.send(api).await;
        queue.extend(session.apply(response));
    }
}

// ── Session ──────────────────────────────────────────────

pub struct ReservationSession {
    today: NaiveDate,
    phase: Phase,
    seq: u64,
    pending: HashMap<FetchKey, u64>,

    places: Option<Vec<Place>>,
    date: Option<NaiveDate>,
    place_id: Option<Ulid>,
    quota: Option<QuotaStatus>,
    slots: Option<Vec<Slot>>,
    selected: Option<Slot>,
    reason: String,
    bookings: Vec<Booking>,
    notice: Option<Notice>,
}

impl ReservationSession {
    /// A fresh session plus the request for the place list.
    pub fn new(today: NaiveDate) -> (Self, Vec<Request>) {
        let mut session = Self {
            today,
            phase: Phase::Idle,
            seq: 0,
            pending: HashMap::new(),
            places: None,
            date: None,
            place_id: None,
            quota: None,
            slots: None,
            selected: None,
            reason: String::new(),
            bookings: Vec::new(),
            notice: None,
        };
        let request = session.issue(FetchKey::Places, Fetch::Places);
        (session, vec![request])
    }

    // ── Read-only views ──────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn place_id(&self) -> Option<Ulid> {
        self.place_id
    }

    pub fn places(&self) -> Option<&[Place]> {
        self.places.as_deref()
    }

    pub fn quota(&self) -> Option<&QuotaStatus> {
        self.quota.as_ref()
    }

    pub fn slots(&self) -> Option<&[Slot]> {
        self.slots.as_deref()
    }

    pub fn selected(&self) -> Option<&Slot> {
        self.selected.as_ref()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.bookings
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// The current Monday-to-Sunday week, without the days already gone.
    pub fn eligible_dates(&self) -> Vec<NaiveDate> {
        let monday = self.today - Days::new(self.today.weekday().num_days_from_monday() as u64);
        monday
            .iter_days()
            .take(7)
            .filter(|d| *d >= self.today)
            .collect()
    }

    fn at_ceiling(&self) -> bool {
        self.quota.as_ref().is_some_and(QuotaStatus::at_ceiling)
    }

    /// True when the selected slot may be booked: it is free and the
    /// requester still has quota left on this date.
    pub fn can_compose(&self) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|s| s.status == SlotStatus::Available)
            && !self.at_ceiling()
    }

    // ── Ticket bookkeeping ───────────────────────────────

    fn issue(&mut self, key: FetchKey, fetch: Fetch) -> Request {
        self.seq += 1;
        self.pending.insert(key, self.seq);
        Request {
            ticket: Ticket { seq: self.seq, key },
            fetch,
        }
    }

    /// Accept a response only if it answers the newest live question of its kind.
    fn accept(&mut self, ticket: Ticket) -> bool {
        if self.pending.get(&ticket.key) == Some(&ticket.seq) {
            self.pending.remove(&ticket.key);
            true
        } else {
            tracing::debug!("dropping stale response {:?} #{}", ticket.key, ticket.seq);
            false
        }
    }

    fn retire(&mut self, keys: &[FetchKey]) {
        for key in keys {
            self.pending.remove(key);
        }
    }

    fn clear_selection(&mut self) {
        self.selected = None;
        self.reason.clear();
    }

    fn slots_request(&mut self) -> Option<Request> {
        let (place_id, date) = (self.place_id?, self.date?);
        Some(self.issue(FetchKey::Slots, Fetch::Slots { place_id, date }))
    }

    fn quota_request(&mut self) -> Option<Request> {
        let date = self.date?;
        Some(self.issue(FetchKey::Quota, Fetch::Quota { date }))
    }

    fn bookings_request(&mut self) -> Request {
        let from = self.today;
        self.issue(FetchKey::MyBookings, Fetch::MyBookings { from })
    }

    fn enter_bookings_view(&mut self) -> Request {
        self.phase = Phase::ViewBookings;
        self.clear_selection();
        self.bookings_request()
    }

    // ── Transitions ──────────────────────────────────────

    /// Pick a date from the eligible window. Place and slot choices are
    /// discarded and the quota banner is re-derived for the new date.
    pub fn choose_date(&mut self, date: NaiveDate) -> Result<Vec<Request>, SessionError> {
        if self.phase == Phase::Submitting {
            return Err(SessionError::Busy);
        }
        if !self.eligible_dates().contains(&date) {
            return Err(SessionError::OutsideWindow(date));
        }
        self.retire(&[FetchKey::Quota, FetchKey::Slots]);
        self.phase = Phase::DateChosen;
        self.date = Some(date);
        self.place_id = None;
        self.quota = None;
        self.slots = None;
        self.notice = None;
        self.clear_selection();
        Ok(self.quota_request().into_iter().collect())
    }

    /// Pick a place for the chosen date; the slot list is re-derived.
    pub fn choose_place(&mut self, place_id: Ulid) -> Result<Vec<Request>, SessionError> {
        match self.phase {
            Phase::Submitting => return Err(SessionError::Busy),
            Phase::Idle => return Err(SessionError::NoDate),
            _ => {}
        }
        if self.date.is_none() {
            return Err(SessionError::NoDate);
        }
        if let Some(places) = &self.places
            && !places.iter().any(|p| p.id == place_id)
        {
            return Err(SessionError::UnknownPlace(place_id));
        }
        self.retire(&[FetchKey::Slots]);
        self.phase = Phase::PlaceChosen;
        self.place_id = Some(place_id);
        self.slots = None;
        self.notice = None;
        self.clear_selection();
        Ok(self.slots_request().into_iter().collect())
    }

    /// Select a slot from the derived list. Only a free slot under quota
    /// can go on to composing; any other slot is read-only.
    pub fn choose_slot(&mut self, time: TimeOfDay) -> Result<(), SessionError> {
        match self.phase {
            Phase::PlaceChosen | Phase::SlotChosen(_) | Phase::Composing => {}
            Phase::Submitting => return Err(SessionError::Busy),
            _ => return Err(SessionError::NoPlace),
        }
        let slot = self
            .slots
            .as_ref()
            .ok_or(SessionError::SlotsNotLoaded)?
            .iter()
            .find(|s| s.time == time)
            .cloned()
            .ok_or(SessionError::UnknownSlot(time))?;
        self.phase = Phase::SlotChosen(slot.status);
        self.selected = Some(slot);
        self.reason.clear();
        Ok(())
    }

    pub fn set_reason(&mut self, reason: &str) -> Result<(), SessionError> {
        match self.phase {
            Phase::SlotChosen(_) | Phase::Composing => {}
            Phase::Submitting => return Err(SessionError::Busy),
            _ => return Err(SessionError::NotComposing),
        }
        if !self.can_compose() {
            return Err(SessionError::NotBookable);
        }
        self.phase = Phase::Composing;
        self.reason = reason.to_string();
        Ok(())
    }

    /// Submit the composed booking. Blank or oversized reasons are refused
    /// here; everything else is left to the ledger.
    pub fn submit(&mut self) -> Result<Request, SessionError> {
        if self.phase != Phase::Composing {
            return Err(SessionError::NotComposing);
        }
        let reason = self.reason.trim();
        if reason.is_empty() {
            return Err(SessionError::EmptyReason);
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(SessionError::ReasonTooLong);
        }
        let (Some(slot), Some(date), Some(place_id)) = (&self.selected, self.date, self.place_id)
        else {
            return Err(SessionError::NotComposing);
        };
        let booking = NewBooking {
            place_id,
            date,
            time: slot.time,
            reason: reason.to_string(),
        };
        self.phase = Phase::Submitting;
        self.notice = None;
        Ok(self.issue(FetchKey::Create, Fetch::Create(booking)))
    }

    /// Show the requester's bookings from today on.
    pub fn open_bookings(&mut self) -> Result<Vec<Request>, SessionError> {
        if self.phase == Phase::Submitting {
            return Err(SessionError::Busy);
        }
        Ok(vec![self.enter_bookings_view()])
    }

    pub fn cancel(&mut self, booking_id: Ulid) -> Result<Request, SessionError> {
        if self.phase == Phase::Submitting {
            return Err(SessionError::Busy);
        }
        if !self.bookings.iter().any(|b| b.id == booking_id) {
            return Err(SessionError::UnknownBooking(booking_id));
        }
        Ok(self.issue(
            FetchKey::Cancel(booking_id),
            Fetch::Cancel { booking_id },
        ))
    }

    // ── Responses ────────────────────────────────────────

    /// Fold one backend answer into the session. Returns follow-up requests.
    pub fn apply(&mut self, response: Response) -> Vec<Request> {
        if !self.accept(response.ticket) {
            return Vec::new();
        }
        match response.reply {
            Reply::Places(result) => self.on_places(result),
            Reply::Quota(result) => self.on_quota(result),
            Reply::Slots(result) => self.on_slots(result),
            Reply::Created(result) => self.on_created(result),
            Reply::MyBookings(result) => self.on_bookings(result),
            Reply::Cancelled(result) => {
                let FetchKey::Cancel(id) = response.ticket.key else {
                    return Vec::new();
                };
                self.on_cancelled(id, result)
            }
        }
    }

    fn on_places(&mut self, result: Result<Vec<Place>, ApiError>) -> Vec<Request> {
        match result {
            Ok(places) => self.places = Some(places),
            Err(e) => self.notice = Some(Notice::failed(&e)),
        }
        Vec::new()
    }

    fn on_quota(&mut self, result: Result<QuotaStatus, ApiError>) -> Vec<Request> {
        let quota = match result {
            Ok(q) => q,
            Err(e) => {
                self.notice = Some(Notice::failed(&e));
                return Vec::new();
            }
        };
        self.quota = Some(quota);
        let browsing = matches!(
            self.phase,
            Phase::DateChosen | Phase::PlaceChosen | Phase::SlotChosen(_) | Phase::Composing
        );
        if browsing && quota.at_ceiling() {
            self.retire(&[FetchKey::Slots]);
            return vec![self.enter_bookings_view()];
        }
        Vec::new()
    }

    fn on_slots(&mut self, result: Result<Vec<Slot>, ApiError>) -> Vec<Request> {
        match result {
            Ok(slots) => {
                // A selection made against older slots is re-read from the new list.
                if let Some(selected) = &self.selected {
                    let refreshed = slots.iter().find(|s| s.time == selected.time).cloned();
                    match refreshed {
                        Some(slot) if slot.status == selected.status => self.selected = Some(slot),
                        _ => {
                            self.clear_selection();
                            self.phase = Phase::PlaceChosen;
                        }
                    }
                }
                self.slots = Some(slots);
            }
            Err(e) => {
                self.notice = Some(Notice::failed(&e));
                if matches!(&e, ApiError::Ledger(crate::ledger::LedgerError::NotFound(_))) {
                    self.place_id = None;
                    self.slots = None;
                    self.clear_selection();
                    self.phase = Phase::DateChosen;
                }
            }
        }
        Vec::new()
    }

    fn on_created(&mut self, result: Result<Booking, ApiError>) -> Vec<Request> {
        use crate::ledger::LedgerError;

        match result {
            Ok(booking) => {
                let reached_ceiling = self.quota.as_mut().is_some_and(|q| {
                    q.count += 1;
                    q.at_ceiling()
                });
                self.notice = Some(Notice::Booked(booking));
                self.clear_selection();
                if reached_ceiling {
                    return vec![self.enter_bookings_view()];
                }
                self.phase = Phase::PlaceChosen;
                self.slots_request()
                    .into_iter()
                    .chain(self.quota_request())
                    .collect()
            }
            Err(e @ ApiError::Ledger(LedgerError::Conflict { .. } | LedgerError::QuotaExceeded { .. })) => {
                // The ledger disagreed with what we showed: re-derive both.
                self.notice = Some(Notice::failed(&e));
                self.clear_selection();
                self.phase = Phase::PlaceChosen;
                self.slots_request()
                    .into_iter()
                    .chain(self.quota_request())
                    .collect()
            }
            Err(e @ ApiError::Ledger(LedgerError::PastDate(_))) => {
                // The day rolled over under us; start again from the date.
                self.notice = Some(Notice::failed(&e));
                self.clear_selection();
                self.date = None;
                self.place_id = None;
                self.quota = None;
                self.slots = None;
                self.phase = Phase::Idle;
                Vec::new()
            }
            Err(e) => {
                self.notice = Some(Notice::failed(&e));
                self.phase = Phase::Composing;
                Vec::new()
            }
        }
    }

    fn on_bookings(&mut self, result: Result<Vec<Booking>, ApiError>) -> Vec<Request> {
        match result {
            Ok(bookings) => self.bookings = bookings,
            Err(e) => self.notice = Some(Notice::failed(&e)),
        }
        Vec::new()
    }

    fn on_cancelled(&mut self, id: Ulid, result: Result<(), ApiError>) -> Vec<Request> {
        use crate::ledger::LedgerError;

        match result {
            Ok(()) => {
                self.bookings.retain(|b| b.id != id);
                self.notice = Some(Notice::Cancelled(id));
            }
            Err(e) => {
                if matches!(e, ApiError::Ledger(LedgerError::NotFound(_))) {
                    self.bookings.retain(|b| b.id != id);
                }
                self.notice = Some(Notice::failed(&e));
            }
        }
        let mut follow_up = Vec::new();
        if self.phase == Phase::ViewBookings {
            follow_up.push(self.bookings_request());
        }
        follow_up.extend(self.quota_request());
        follow_up
    }
}
