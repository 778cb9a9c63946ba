mod admission;
mod error;
mod mutations;
mod queries;
mod quota;
mod slots;
mod store;
#[cfg(test)]
mod tests;

pub use error::LedgerError;
pub use quota::QuotaPolicy;
pub use slots::{DaySlots, SlotIter, classify};
pub use store::{DaySheet, LedgerStore, SharedDaySheet};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

use crate::clock::Clock;
use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

/// Requests taken at most per group commit.
const WAL_BATCH_LIMIT: usize = 512;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalRequest {
    Append {
        event: Event,
        done: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        done: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        done: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL file. Every wakeup takes whatever is queued, buffers the
/// appends, and makes them durable with a single fsync before answering.
/// Control requests are handled in arrival order, after the appends that
/// preceded them are committed.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalRequest>) {
    let mut inbox = Vec::with_capacity(WAL_BATCH_LIMIT);
    let mut pending: Vec<PendingAppend> = Vec::new();
    while rx.recv_many(&mut inbox, WAL_BATCH_LIMIT).await > 0 {
        for request in inbox.drain(..) {
            match request {
                WalRequest::Append { event, done } => pending.push((event, done)),
                WalRequest::Compact { events, done } => {
                    commit(&mut wal, &mut pending);
                    let result = Wal::write_compact_file(wal.path(), &events)
                        .and_then(|()| wal.swap_compact_file());
                    let _ = done.send(result);
                }
                WalRequest::AppendsSinceCompact { done } => {
                    commit(&mut wal, &mut pending);
                    let _ = done.send(wal.appends_since_compact());
                }
            }
        }
        commit(&mut wal, &mut pending);
    }
}

fn commit(wal: &mut Wal, pending: &mut Vec<PendingAppend>) {
    if pending.is_empty() {
        return;
    }
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(pending.len() as f64);
    let started = Instant::now();

    let appended = pending
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so no half-written batch lingers in
    // the buffer; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    let outcome = appended.and(flushed);

    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &outcome {
        tracing::error!("WAL commit of {} events failed: {e}", pending.len());
    }
    for (_, done) in pending.drain(..) {
        let reply = match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = done.send(reply);
    }
}

/// One tenant's booking ledger: places, bookings, and the admission rules
/// that guard them. Every accepted change is in the WAL before it is visible.
pub struct Ledger {
    pub(super) store: LedgerStore,
    pub(super) wal_tx: mpsc::Sender<WalRequest>,
    pub(super) policy: QuotaPolicy,
    pub(super) clock: Arc<dyn Clock>,
    /// Mutations hold it shared while they commit; compaction holds it
    /// exclusively so its snapshot and the log swap see the same history.
    pub(super) commit_barrier: RwLock<()>,
    /// Serializes place creation and retirement.
    pub(super) place_admin: Mutex<()>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    pub fn open(wal_path: PathBuf, policy: QuotaPolicy, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let ledger = Self {
            store: LedgerStore::new(),
            wal_tx,
            policy,
            clock,
            commit_barrier: RwLock::new(()),
            place_admin: Mutex::new(()),
        };

        // Nothing else can see these sheets yet, so try_write never contends.
        // Blocking locks are off limits: tenants are opened from async code.
        for event in &events {
            match event {
                Event::PlaceCreated { .. } | Event::PlaceRetired { .. } => {
                    ledger.store.apply_place_event(event);
                }
                Event::BookingCreated(booking) => {
                    let sheet = ledger.store.sheet_or_insert(booking.place_id, booking.date);
                    let mut guard = sheet.try_write().map_err(io::Error::other)?;
                    ledger.store.apply_to_sheet(&mut guard, event);
                }
                Event::BookingCancelled { place_id, date, .. } => {
                    if let Some(sheet) = ledger.store.sheet(&(*place_id, *date)) {
                        let mut guard = sheet.try_write().map_err(io::Error::other)?;
                        ledger.store.apply_to_sheet(&mut guard, event);
                    }
                }
            }
        }

        tracing::debug!("replayed {} events from {}", events.len(), wal_path.display());
        Ok(ledger)
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Send one event to the group-commit writer and wait until it is durable.
    async fn wal_append(&self, event: &Event) -> Result<(), LedgerError> {
        let (done, rx) = oneshot::channel();
        self.wal_tx
            .send(WalRequest::Append {
                event: event.clone(),
                done,
            })
            .await
            .map_err(|_| LedgerError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::WalError(e.to_string()))
    }

    /// Log a booking event, then apply it to the sheet the caller has locked.
    pub(super) async fn persist_and_apply(
        &self,
        sheet: &mut DaySheet,
        event: &Event,
    ) -> Result<(), LedgerError> {
        self.wal_append(event).await?;
        self.store.apply_to_sheet(sheet, event);
        Ok(())
    }

    /// Log a place event, then apply it.
    pub(super) async fn persist_place_event(&self, event: &Event) -> Result<(), LedgerError> {
        self.wal_append(event).await?;
        self.store.apply_place_event(event);
        Ok(())
    }
}
