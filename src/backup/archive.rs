// savesync/src/backup/archive.rs
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::errors::{Result, SyncError};
use crate::utils::ensure_dir_exists;

pub const ARCHIVE_PREFIX: &str = "backup_";
pub const ARCHIVE_EXTENSION: &str = ".zip";

/// `backup_<timestamp>.zip`
pub fn archive_file_name(timestamp: &str) -> String {
    format!("{}{}{}", ARCHIVE_PREFIX, timestamp, ARCHIVE_EXTENSION)
}

fn is_archive_name(name: &str) -> bool {
    name.starts_with(ARCHIVE_PREFIX) && name.ends_with(ARCHIVE_EXTENSION)
}

/// Writes `entries` into a deflate-compressed ZIP archive named
/// `backup_<timestamp>.zip` inside `backup_dir`.
///
/// The archive is assembled in a temporary file in the same directory and
/// renamed into place only once it is complete, so a crash never leaves a
/// truncated `backup_*.zip` behind. An existing archive with the same name
/// is never overwritten.
///
/// # Returns
/// Path to the created archive file.
pub fn write_zip_archive(
    backup_dir: &Path,
    timestamp: &str,
    entries: &[(String, Vec<u8>)],
) -> Result<PathBuf> {
    ensure_dir_exists(backup_dir).map_err(|e| {
        SyncError::ArchiveWrite(format!("backup directory {} is unusable: {}", backup_dir.display(), e))
    })?;
    let archive_path = backup_dir.join(archive_file_name(timestamp));
    if archive_path.exists() {
        return Err(SyncError::ArchiveWrite(format!(
            "{} already exists",
            archive_path.display()
        )));
    }

    let write_error = |what: &str, e: &dyn std::fmt::Display| {
        SyncError::ArchiveWrite(format!("{} for {}: {}", what, archive_path.display(), e))
    };

    let staging = tempfile::Builder::new()
        .prefix(".backup_")
        .suffix(".zip.part")
        .tempfile_in(backup_dir)
        .map_err(|e| write_error("failed to create staging file", &e))?;

    let mut zip = ZipWriter::new(staging);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, data) in entries {
        zip.start_file(name.as_str(), options)
            .map_err(|e| write_error(&format!("failed to add entry '{}'", name), &e))?;
        zip.write_all(data)
            .map_err(|e| write_error(&format!("failed to write entry '{}'", name), &e))?;
    }

    let staging = zip
        .finish()
        .map_err(|e| write_error("failed to finish archive", &e))?;
    staging
        .as_file()
        .sync_all()
        .map_err(|e| write_error("failed to flush archive", &e))?;
    staging
        .persist_noclobber(&archive_path)
        .map_err(|e| write_error("failed to move archive into place", &e.error))?;

    Ok(archive_path)
}

/// Existing `backup_*.zip` archives in `backup_dir`, newest first.
///
/// A missing directory simply has no archives.
pub fn list_archives(backup_dir: &Path) -> Result<Vec<PathBuf>> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }

    let mut archives = Vec::new();
    for entry in std::fs::read_dir(backup_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_archive = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_archive_name);
        if is_archive && path.is_file() {
            archives.push(path);
        }
    }

    // The timestamp layout sorts lexically in chronological order.
    archives.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(archives)
}

/// Deletes the oldest archives so that at most `keep` remain.
///
/// A file that cannot be removed is logged and skipped.
///
/// # Returns
/// The paths that were removed.
pub fn prune_archives(backup_dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    let archives = list_archives(backup_dir)?;
    let stale = archives.into_iter().skip(keep).collect();
    Ok(remove_each(stale, |path| std::fs::remove_file(path)))
}

/// Removes every path, logging failures instead of stopping at the first.
fn remove_each<F>(paths: Vec<PathBuf>, remove: F) -> Vec<PathBuf>
where
    F: Fn(&Path) -> std::io::Result<()>,
{
    let mut removed = Vec::with_capacity(paths.len());
    for path in paths {
        match remove(&path) {
            Ok(()) => removed.push(path),
            Err(e) => warn!(archive = %path.display(), error = %e, "Failed to remove old archive"),
        }
    }
    removed
}
