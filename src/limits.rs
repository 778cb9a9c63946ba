//! Hard input limits. Anything larger is rejected before it touches the ledger.

pub const MAX_PLACES_PER_TENANT: usize = 256;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 255;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_IDENTITY_LEN: usize = 50;

/// Slots per daily schedule (a 30-minute grid over a full day).
pub const MAX_SLOTS_PER_SCHEDULE: usize = 48;

/// Furthest ahead a booking may be placed.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 366;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 63;
