//! Recursive sync-folder scanning shared by the file-backed variants.

use meld_types::IsoTimestamp;
use std::fs;
use std::io;
use std::path::Path;

/// One regular file found under the sync folder.
#[derive(Debug, Clone)]
pub(crate) struct ScannedFile {
    /// Path relative to the scan root, forward-slash separated.
    pub rel_path: String,
    /// Last-modified time, already converted to the wire timestamp format.
    pub mtime: IsoTimestamp,
}

/// Walks `root` recursively and returns every regular file below it.
///
/// Relative paths are joined with `/` regardless of the platform separator
/// so they can go on the wire as-is. Entries that cannot be stat'ed are
/// skipped. The caller applies any domain filtering (dot files, reserved
/// names).
pub(crate) fn scan_files(root: &Path) -> io::Result<Vec<ScannedFile>> {
    let mut found = Vec::new();
    walk(root, String::new(), &mut found)?;
    found.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(found)
}

fn walk(dir: &Path, prefix: String, found: &mut Vec<ScannedFile>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            // Non-UTF-8 names cannot be represented on the wire.
            Err(_) => continue,
        };
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            walk(&entry.path(), rel, found)?;
        } else if file_type.is_file() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let mtime = metadata
                .modified()
                .map(IsoTimestamp::from_system_time)
                .unwrap_or_else(|_| IsoTimestamp::now());
            found.push(ScannedFile {
                rel_path: rel,
                mtime,
            });
        }
    }
    Ok(())
}
