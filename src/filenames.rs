//! Database file naming and classification.
//!
//! One directory, fixed name shapes:
//!
//! - `CURRENT` — one line naming the active manifest.
//! - `MANIFEST-<n>` — version-edit log.
//! - `<n>.log` — write-ahead log.
//! - `<n>.sst` — sorted table.
//! - `IDENTITY`, `LOCK` — database id and advisory lock.
//! - `archive/` — retained obsolete WALs.
//! - `*.tmp`, `*.sst.tmp` — in-flight writes, swept on open.

use std::path::{Path, PathBuf};

/// Kinds of files found in a database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileType {
    /// `<n>.log`
    WalFile(u64),
    /// `<n>.sst`
    TableFile(u64),
    /// `MANIFEST-<n>`
    ManifestFile(u64),
    /// `CURRENT`
    Current,
    /// `IDENTITY`
    Identity,
    /// `LOCK`
    Lock,
    /// `*.tmp`
    Temp,
}

pub(crate) fn current_file_path(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

pub(crate) fn identity_file_path(dir: &Path) -> PathBuf {
    dir.join("IDENTITY")
}

pub(crate) fn lock_file_path(dir: &Path) -> PathBuf {
    dir.join("LOCK")
}

pub(crate) fn manifest_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{number:06}"))
}

pub(crate) fn log_file_path(wal_dir: &Path, number: u64) -> PathBuf {
    wal_dir.join(format!("{number:06}.log"))
}

pub(crate) fn table_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.sst"))
}

pub(crate) fn archive_dir_path(wal_dir: &Path) -> PathBuf {
    wal_dir.join("archive")
}

/// Classify a directory entry by name.
pub(crate) fn parse_file_name(name: &str) -> Option<FileType> {
    match name {
        "CURRENT" => return Some(FileType::Current),
        "IDENTITY" => return Some(FileType::Identity),
        "LOCK" => return Some(FileType::Lock),
        _ => {}
    }
    if name.ends_with(".tmp") {
        return Some(FileType::Temp);
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return rest.parse::<u64>().ok().map(FileType::ManifestFile);
    }
    if let Some(stem) = name.strip_suffix(".log") {
        return stem.parse::<u64>().ok().map(FileType::WalFile);
    }
    if let Some(stem) = name.strip_suffix(".sst") {
        return stem.parse::<u64>().ok().map(FileType::TableFile);
    }
    None
}
