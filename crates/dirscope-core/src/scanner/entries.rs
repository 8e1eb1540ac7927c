/// Entry scanner — lists one directory's immediate children.
///
/// No threads of its own; the loader and aggregator call into it from their
/// workers. Symbolic links are never followed. A failure on one entry skips
/// that entry; a failure to open the directory is returned as a
/// [`ScanError`], distinct from an empty listing.
use crate::error::ScanError;
use crate::model::DirEntry;
use chrono::{DateTime, Local};
use compact_str::CompactString;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::trace;

/// Lazy iterator over a directory's children.
///
/// Each call to `next` performs the per-entry stat calls, so a caller that
/// checks a cancel flag between calls never does filesystem work for an
/// entry after cancellation.
pub struct EntryIter {
    read_dir: fs::ReadDir,
}

impl Iterator for EntryIter {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        loop {
            match self.read_dir.next()? {
                Ok(raw) => {
                    if let Some(entry) = build_entry(&raw) {
                        return Some(entry);
                    }
                }
                Err(err) => trace!("skipping unreadable entry: {err}"),
            }
        }
    }
}

/// Open `dir` for listing.
pub fn scan_entries(dir: &Path) -> Result<EntryIter, ScanError> {
    Ok(EntryIter {
        read_dir: open_dir(dir)?,
    })
}

/// Synchronous full listing of `dir`, in filesystem order.
pub fn list_entries(dir: &Path) -> Result<Vec<DirEntry>, ScanError> {
    Ok(scan_entries(dir)?.collect())
}

/// `fs::read_dir` with the error classified and a file target reported as
/// [`ScanError::NotADirectory`].
pub(crate) fn open_dir(dir: &Path) -> Result<fs::ReadDir, ScanError> {
    fs::read_dir(dir).map_err(|err| {
        let is_file = fs::symlink_metadata(dir).is_ok_and(|m| !m.is_dir());
        if is_file {
            ScanError::NotADirectory {
                path: dir.to_path_buf(),
            }
        } else {
            ScanError::io(dir, err)
        }
    })
}

/// Cheap check: does `dir` contain at least one entry?
///
/// Unreadable directories report `false`.
pub fn has_children(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut it| it.next().is_some())
}

fn build_entry(raw: &fs::DirEntry) -> Option<DirEntry> {
    // `DirEntry::file_type` does not traverse symlinks.
    let file_type = match raw.file_type() {
        Ok(ft) => ft,
        Err(err) => {
            trace!("skipping {}: {err}", raw.path().display());
            return None;
        }
    };
    let is_dir = file_type.is_dir();
    let path = raw.path();

    // A failed stat still yields the entry, just without size or timestamp.
    let (size, created) = match raw.metadata() {
        Ok(meta) => (if is_dir { 0 } else { meta.len() }, meta.created().ok()),
        Err(_) => (0, None),
    };

    Some(DirEntry {
        name: CompactString::new(raw.file_name().to_string_lossy()),
        is_dir,
        size,
        created,
        has_children: is_dir && has_children(&path),
        path,
    })
}

/// Properties of a single path, for a details panel.
#[derive(Debug, Clone, Serialize)]
pub struct FileProperties {
    pub path: PathBuf,
    pub size: u64,
    pub created: Option<DateTime<Local>>,
    pub modified: Option<DateTime<Local>>,
    pub accessed: Option<DateTime<Local>>,
    /// `rwxr-xr-x` on Unix, `read-only` / `read-write` elsewhere.
    pub permissions: String,
    pub readonly: bool,
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
}

/// Stat one path without following a final symlink.
///
/// Returns [`ScanError::NotFound`] when nothing exists at `path`.
pub fn stat_one(path: &Path) -> Result<FileProperties, ScanError> {
    let meta = fs::symlink_metadata(path).map_err(|err| ScanError::io(path, err))?;
    let local = |t: std::io::Result<SystemTime>| t.ok().map(DateTime::<Local>::from);
    let file_type = meta.file_type();

    Ok(FileProperties {
        path: path.to_path_buf(),
        size: meta.len(),
        created: local(meta.created()),
        modified: local(meta.modified()),
        accessed: local(meta.accessed()),
        permissions: permission_string(&meta),
        readonly: meta.permissions().readonly(),
        is_dir: file_type.is_dir(),
        is_file: file_type.is_file(),
        is_symlink: file_type.is_symlink(),
    })
}

#[cfg(unix)]
fn permission_string(meta: &fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;

    let mode = meta.permissions().mode();
    let flags = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    flags
        .iter()
        .map(|&(bit, ch)| if mode & bit != 0 { ch } else { '-' })
        .collect()
}

#[cfg(not(unix))]
fn permission_string(meta: &fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "read-only".to_string()
    } else {
        "read-write".to_string()
    }
}
