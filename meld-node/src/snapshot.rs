//! Atomic CRDT snapshots.
//!
//! The snapshot on disk is always either the previous valid one or the new
//! one: writes go to a sibling temp file, are fsynced, and renamed over the
//! target. Reads are best-effort — the caller falls back to an empty state
//! on any failure.

use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Writes the encoded state atomically to `path`, creating parent
/// directories as needed.
pub fn save(path: &Path, state: &Value) -> io::Result<()> {
    let encoded = serde_json::to_vec_pretty(state)?;

    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("snapshot path has no parent directory"))?;
    fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::other("snapshot path has no file name"))?;
    let tmp = parent.join(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(&encoded)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

/// Reads a snapshot back. `Ok(None)` when no snapshot exists yet; decode
/// failures are errors the caller downgrades to an empty start.
pub fn load(path: &Path) -> io::Result<Option<Value>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let value = serde_json::from_slice(&raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = serde_json::json!({"counters": {"a": 3}, "last_file_count": 1});

        save(&path, &state).unwrap();
        assert_eq!(load(&path).unwrap(), Some(state));
    }

    #[test]
    fn load_of_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("absent.json")).unwrap(), None);
    }

    #[test]
    fn corrupt_snapshot_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{truncated").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn overwrite_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        save(&path, &serde_json::json!({"elements": ["old"]})).unwrap();
        save(&path, &serde_json::json!({"elements": ["new"]})).unwrap();

        assert_eq!(
            load(&path).unwrap(),
            Some(serde_json::json!({"elements": ["new"]}))
        );
        // No temp file left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/state.json");
        save(&path, &serde_json::json!({})).unwrap();
        assert!(path.is_file());
    }
}
