//! Scheduled remote synchronization engine.
//!
//! Backs up a remote directory into timestamped ZIP archives and maintains a
//! remote index record, on an interval or at fixed times of day.

pub mod backup;
pub mod config;
pub mod errors;
pub mod remote;
pub mod scheduler;
pub mod status;
pub mod sync;
pub mod update;
pub mod utils;

pub use errors::{ParseError, Result, SyncError};
