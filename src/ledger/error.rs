use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{InputError, TimeOfDay};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} is in the past")]
    PastDate(NaiveDate),
    #[error("{date} {time} is already booked ({existing})")]
    Conflict {
        date: NaiveDate,
        time: TimeOfDay,
        existing: Ulid,
    },
    #[error("booking limit reached: {count} of {ceiling} on {date}")]
    QuotaExceeded {
        date: NaiveDate,
        count: u32,
        ceiling: u32,
    },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("booking {0} belongs to someone else")]
    NotOwner(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl LedgerError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidInput(_) => "invalid_input",
            LedgerError::PastDate(_) => "past_date",
            LedgerError::Conflict { .. } => "conflict",
            LedgerError::QuotaExceeded { .. } => "quota_exceeded",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::NotOwner(_) => "not_owner",
            LedgerError::AlreadyExists(_) => "already_exists",
            LedgerError::LimitExceeded(_) => "limit_exceeded",
            LedgerError::WalError(_) => "wal",
        }
    }
}

impl From<InputError> for LedgerError {
    fn from(e: InputError) -> Self {
        LedgerError::InvalidInput(e.to_string())
    }
}
