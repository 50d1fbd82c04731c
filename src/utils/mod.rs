pub mod logger;

use chrono::{Local, NaiveDateTime, NaiveTime};
use std::path::Path;

use crate::errors::{Result, SyncError};

/// Timestamp layout used in archive names, e.g. `2025-03-01_18-05-09`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Formats a local time with [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(at: &NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Current local time formatted with [`TIMESTAMP_FORMAT`].
pub fn timestamp_now() -> String {
    format_timestamp(&Local::now().naive_local())
}

/// Creates `path` (and parents) if it does not exist yet.
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| {
            SyncError::Config(format!("failed to create directory {}: {}", path.display(), e))
        })?;
    } else if !path.is_dir() {
        return Err(SyncError::Config(format!(
            "{} exists but is not a directory",
            path.display()
        )));
    }
    Ok(())
}

/// Parses a strict `HH:MM` wall-clock time and returns it normalised
/// (zero-padded) so `9:05` and `09:05` compare equal.
pub fn parse_clock_time(value: &str) -> Result<String> {
    let trimmed = value.trim();
    let time = NaiveTime::parse_from_str(trimmed, "%H:%M")
        .map_err(|e| SyncError::Config(format!("invalid time '{}' (expected HH:MM): {}", value, e)))?;
    Ok(time.format("%H:%M").to_string())
}
