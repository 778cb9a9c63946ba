use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use tracing::info;

use crate::ledger::{Ledger, LedgerError};

/// When a tenant's ledger gets tidied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Housekeeping {
    /// Compact once this many events were appended since the last compaction.
    pub compact_threshold: u64,
    /// Past bookings older than this many days are dropped.
    pub retention_days: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub pruned: usize,
    pub compacted: bool,
}

/// Oldest date still kept for a given "today".
pub fn retention_cutoff(today: NaiveDate, retention_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(retention_days as u64))
        .unwrap_or(NaiveDate::MIN)
}

/// Compact the WAL if it has grown past the threshold.
pub async fn compact_if_due(ledger: &Ledger, threshold: u64) -> Result<bool, LedgerError> {
    let appends = ledger.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    ledger.compact_wal().await?;
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

/// One full housekeeping pass: retention pruning, then compaction if due.
/// Pruning compacts on its own when it removed anything.
pub async fn sweep(ledger: &Ledger, rules: Housekeeping) -> Result<SweepReport, LedgerError> {
    let cutoff = retention_cutoff(ledger.clock().today(), rules.retention_days);
    let pruned = ledger.prune_before(cutoff).await?;
    let compacted = pruned > 0 || compact_if_due(ledger, rules.compact_threshold).await?;
    Ok(SweepReport { pruned, compacted })
}

/// Background task for one tenant. Compaction is checked every tick;
/// retention pruning runs once per calendar day.
pub async fn run_housekeeper(ledger: Arc<Ledger>, rules: Housekeeping) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    let mut pruned_on: Option<NaiveDate> = None;
    loop {
        interval.tick().await;
        let today = ledger.clock().today();
        let outcome = if pruned_on != Some(today) {
            sweep(&ledger, rules).await.map(|_| pruned_on = Some(today))
        } else {
            compact_if_due(&ledger, rules.compact_threshold).await.map(|_| ())
        };
        if let Err(e) = outcome {
            tracing::warn!("housekeeping failed: {e}");
        }
    }
}
