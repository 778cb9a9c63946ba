pub mod auth;
pub mod clock;
pub mod config;
pub mod directory;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod session;
pub mod sql;
pub mod tenant;
pub mod wal;
pub mod wire;
