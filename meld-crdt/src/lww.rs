//! Last-Writer-Wins file synchroniser.
//!
//! Reflects a directory tree into a CRDT map of
//! `relative path -> (timestamp, deleted?)` and applies merged remote state
//! back to disk. Content travels base64-encoded inside the wire state; a
//! `null` payload is a tombstone meaning "this path was deleted at that
//! timestamp". Timestamps are the fixed-width ISO strings from
//! [`IsoTimestamp`], compared lexicographically; a strictly greater remote
//! timestamp wins, equal timestamps are left as no change.
//!
//! The timestamp map (including tombstones) is persisted to
//! `.lww_state.json` inside the sync folder so a restart cannot resurrect
//! deleted files.

use crate::scan::scan_files;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use meld_types::IsoTimestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reserved persistence file inside the sync folder; never part of the
/// replicated domain.
pub const STATE_FILE_NAME: &str = ".lww_state.json";

const READ_RETRIES: u32 = 3;
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// The wire state: every known path with its timestamp and either base64
/// content or `null` for a tombstone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LwwState(pub BTreeMap<String, (IsoTimestamp, Option<String>)>);

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileMeta {
    ts: IsoTimestamp,
    deleted: bool,
}

/// The in-memory side of the synchroniser: path -> newest known write or
/// deletion. File content stays on disk; it is only read when encoding for
/// gossip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LwwFileSync {
    entries: BTreeMap<String, FileMeta>,
}

impl LwwFileSync {
    /// Creates an empty synchroniser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the in-memory map from a decoded snapshot. A `null` payload
    /// becomes a tombstone; content is not written back to disk here.
    #[must_use]
    pub fn from_state(state: &LwwState) -> Self {
        let entries = state
            .0
            .iter()
            .map(|(path, (ts, payload))| {
                (
                    path.clone(),
                    FileMeta {
                        ts: ts.clone(),
                        deleted: payload.is_none(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Paths currently considered present.
    pub fn active_paths(&self) -> impl Iterator<Item = &String> {
        self.entries
            .iter()
            .filter(|(_, meta)| !meta.deleted)
            .map(|(path, _)| path)
    }

    /// Returns true if `rel_path` is present (known and not tombstoned).
    #[must_use]
    pub fn contains(&self, rel_path: &str) -> bool {
        self.entries.get(rel_path).is_some_and(|meta| !meta.deleted)
    }

    /// Returns true if `rel_path` is tombstoned.
    #[must_use]
    pub fn is_tombstone(&self, rel_path: &str) -> bool {
        self.entries.get(rel_path).is_some_and(|meta| meta.deleted)
    }

    /// The newest known timestamp for `rel_path`.
    #[must_use]
    pub fn timestamp(&self, rel_path: &str) -> Option<&IsoTimestamp> {
        self.entries.get(rel_path).map(|meta| &meta.ts)
    }

    /// Reflects the on-disk folder into the map.
    ///
    /// On the first scan of an empty map the persisted timestamp map is
    /// loaded (tombstones included) before the disk is consulted. Files
    /// with a strictly newer mtime advance their entry; known paths missing
    /// from disk become tombstones stamped now. Existing tombstones keep
    /// their timestamp so they cannot outbid a later remote re-add forever.
    pub fn scan(&mut self, folder: &Path) -> bool {
        if let Err(e) = fs::create_dir_all(folder) {
            error!("cannot create sync folder {}: {e}", folder.display());
            return false;
        }
        let current = match self.files_on_disk(folder) {
            Ok(current) => current,
            Err(e) => {
                error!("scan of {} failed: {e}", folder.display());
                return false;
            }
        };

        let mut changed = false;
        if self.entries.is_empty() {
            changed |= self.load_persisted(folder, &current);
        }

        if self.entries.is_empty() {
            // First ever scan: seed from disk, no tombstones.
            for (path, mtime) in &current {
                self.entries.insert(
                    path.clone(),
                    FileMeta {
                        ts: mtime.clone(),
                        deleted: false,
                    },
                );
                changed = true;
            }
        } else {
            for (path, mtime) in &current {
                match self.entries.get_mut(path) {
                    None => {
                        self.entries.insert(
                            path.clone(),
                            FileMeta {
                                ts: mtime.clone(),
                                deleted: false,
                            },
                        );
                        changed = true;
                    }
                    Some(meta) if meta.ts < *mtime => {
                        meta.ts = mtime.clone();
                        meta.deleted = false;
                        changed = true;
                    }
                    Some(_) => {}
                }
            }

            // Unexplained disappearances become deletions the next gossip
            // round will carry.
            let now = IsoTimestamp::now();
            for (path, meta) in &mut self.entries {
                if !meta.deleted && !current.contains_key(path) {
                    debug!("file {path} vanished, recording tombstone");
                    meta.ts = now.clone();
                    meta.deleted = true;
                    changed = true;
                }
            }
        }

        if changed {
            self.persist(folder);
            info!(
                "scan complete: {} on disk, {} active, {} tombstones",
                current.len(),
                self.active_paths().count(),
                self.entries.len() - self.active_paths().count()
            );
        }
        changed
    }

    /// Encodes the full state for gossip, reading file content from disk.
    ///
    /// Transient read failures are retried; a path that still cannot be
    /// read is sent with `null` content, which a peer only adopts when its
    /// own timestamp is strictly older.
    #[must_use]
    pub fn encode(&self, folder: &Path) -> LwwState {
        let mut state = BTreeMap::new();
        for (path, meta) in &self.entries {
            let payload = if meta.deleted {
                None
            } else {
                match read_with_retry(&folder.join(path)) {
                    Ok(bytes) => Some(BASE64.encode(bytes)),
                    Err(e) => {
                        warn!("could not read {path}, emitting null content: {e}");
                        None
                    }
                }
            };
            state.insert(path.clone(), (meta.ts.clone(), payload));
        }
        LwwState(state)
    }

    /// Merges a remote state, applying adopted writes and deletions to
    /// disk. A key only advances when the remote timestamp is strictly
    /// greater; a failed disk operation leaves the key untouched so the
    /// next merge retries it.
    pub fn merge(&mut self, remote: &LwwState, folder: &Path) -> bool {
        let mut changed = false;
        for (path, (ts, payload)) in &remote.0 {
            if !in_domain(path) {
                debug!("ignoring out-of-domain path {path:?} in remote state");
                continue;
            }
            if let Some(meta) = self.entries.get(path) {
                if *ts <= meta.ts {
                    continue;
                }
            }

            let target = folder.join(path);
            match payload {
                Some(encoded) => {
                    let bytes = match BASE64.decode(encoded) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!("undecodable content for {path} in remote state: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = atomic_write(&target, &bytes) {
                        error!("failed to write {}: {e}", target.display());
                        continue;
                    }
                    // Stamp the file with the CRDT timestamp so the next
                    // scan does not mistake the adopted write for a newer
                    // local edit.
                    if let Some(mtime) = ts.to_system_time() {
                        if let Err(e) = set_mtime(&target, mtime) {
                            debug!("could not set mtime on {}: {e}", target.display());
                        }
                    }
                    debug!("adopted remote write of {path} @ {ts}");
                }
                None => {
                    if target.is_file() {
                        if let Err(e) = fs::remove_file(&target) {
                            error!("failed to remove {}: {e}", target.display());
                            continue;
                        }
                    }
                    debug!("adopted remote deletion of {path} @ {ts}");
                }
            }
            self.entries.insert(
                path.clone(),
                FileMeta {
                    ts: ts.clone(),
                    deleted: payload.is_none(),
                },
            );
            changed = true;
        }

        if changed {
            self.persist(folder);
        }
        changed
    }

    /// Records a host-triggered deletion: tombstone now, file removed from
    /// disk. Pre-empts the scanner so the deletion is gossiped on the next
    /// sync round.
    pub fn delete_local(&mut self, rel_path: &str, folder: &Path) -> bool {
        if !in_domain(rel_path) {
            debug!("rejected delete of out-of-domain path {rel_path:?}");
            return false;
        }
        let target = folder.join(rel_path);
        if target.is_file() {
            if let Err(e) = fs::remove_file(&target) {
                error!("failed to remove {}: {e}", target.display());
            }
        }
        self.entries.insert(
            rel_path.to_string(),
            FileMeta {
                ts: IsoTimestamp::now(),
                deleted: true,
            },
        );
        self.persist(folder);
        true
    }

    /// One-line operator summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let active = self.active_paths().count();
        format!(
            "LWW file sync: {active} files, {} tombstones",
            self.entries.len() - active
        )
    }

    fn files_on_disk(&self, folder: &Path) -> io::Result<BTreeMap<String, IsoTimestamp>> {
        Ok(scan_files(folder)?
            .into_iter()
            .filter(|file| in_domain(&file.rel_path))
            .map(|file| (file.rel_path, file.mtime))
            .collect())
    }

    /// Loads `.lww_state.json` written by a previous run. A recorded path
    /// that is missing from disk is restored as a tombstone at its recorded
    /// timestamp; that is how deletions survive restarts.
    fn load_persisted(&mut self, folder: &Path, current: &BTreeMap<String, IsoTimestamp>) -> bool {
        let path = folder.join(STATE_FILE_NAME);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
            Err(e) => {
                error!("cannot read {}: {e}", path.display());
                return false;
            }
        };
        let timestamps: BTreeMap<String, IsoTimestamp> = match serde_json::from_slice(&raw) {
            Ok(timestamps) => timestamps,
            Err(e) => {
                error!("corrupt state file {}, ignoring it: {e}", path.display());
                return false;
            }
        };

        let mut loaded = false;
        for (rel_path, ts) in timestamps {
            if !in_domain(&rel_path) {
                continue;
            }
            let deleted = !current.contains_key(&rel_path);
            self.entries.insert(rel_path, FileMeta { ts, deleted });
            loaded = true;
        }
        if loaded {
            info!("restored {} paths from {}", self.entries.len(), path.display());
        }
        loaded
    }

    /// Persists the timestamp map (tombstones included, content excluded)
    /// atomically next to the files it describes.
    fn persist(&self, folder: &Path) {
        let timestamps: BTreeMap<&String, &IsoTimestamp> = self
            .entries
            .iter()
            .map(|(path, meta)| (path, &meta.ts))
            .collect();
        let encoded = match serde_json::to_vec_pretty(&timestamps) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("cannot encode timestamp map: {e}");
                return;
            }
        };
        let path = folder.join(STATE_FILE_NAME);
        if let Err(e) = atomic_write(&path, &encoded) {
            error!("failed to persist {}: {e}", path.display());
        }
    }
}

/// Whether a relative path belongs to the replicated domain.
///
/// Forward-slash relative paths only; every component must be non-empty,
/// not `.`/`..`, not dot-prefixed (which also covers the reserved state
/// file and temp files), and not a `.swp` leftover.
fn in_domain(rel_path: &str) -> bool {
    !rel_path.is_empty()
        && rel_path.split('/').all(|component| {
            !component.is_empty() && !component.starts_with('.') && !component.ends_with(".swp")
        })
}

/// Writes `bytes` atomically: dot-prefixed temp file in the same directory,
/// fsync, rename over the target. The temp name keeps the file out of the
/// scan domain while incomplete.
fn atomic_write(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::other("target has no parent directory"))?;
    fs::create_dir_all(parent)?;
    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::other("target has no file name"))?;
    let tmp = parent.join(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&tmp)?;
    io::Write::write_all(&mut file, bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, target).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

fn set_mtime(path: &Path, mtime: std::time::SystemTime) -> io::Result<()> {
    fs::File::options().write(true).open(path)?.set_modified(mtime)
}

fn read_with_retry(path: &Path) -> io::Result<Vec<u8>> {
    let mut attempt = 0;
    loop {
        match fs::read(path) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                attempt += 1;
                if attempt >= READ_RETRIES {
                    return Err(e);
                }
                std::thread::sleep(READ_RETRY_BACKOFF);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write(folder: &Path, rel: &str, content: &[u8]) {
        let path = folder.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn domain_excludes_dot_and_swap_files() {
        assert!(in_domain("notes.txt"));
        assert!(in_domain("sub/dir/notes.txt"));
        assert!(!in_domain(".hidden"));
        assert!(!in_domain("sub/.hidden"));
        assert!(!in_domain("notes.swp"));
        assert!(!in_domain(".lww_state.json"));
        assert!(!in_domain(""));
        assert!(!in_domain("../escape"));
        assert!(!in_domain("/absolute"));
        assert!(!in_domain("a//b"));
    }

    #[test]
    fn first_scan_seeds_from_disk_without_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"a");
        write(dir.path(), "sub/b.txt", b"b");

        let mut lww = LwwFileSync::new();
        assert!(lww.scan(dir.path()));
        assert!(lww.contains("a.txt"));
        assert!(lww.contains("sub/b.txt"));
        assert_eq!(lww.active_paths().count(), 2);
        assert!(dir.path().join(STATE_FILE_NAME).is_file());
    }

    #[test]
    fn scan_ignores_reserved_and_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".hidden", b"x");
        write(dir.path(), "edit.swp", b"x");
        write(dir.path(), "real.txt", b"x");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());
        assert_eq!(lww.active_paths().count(), 1);
        assert!(lww.contains("real.txt"));
        // The state file it wrote is not picked up by a second scan.
        assert!(!lww.scan(dir.path()));
    }

    #[test]
    fn vanished_file_becomes_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc", b"v1");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());
        let first_ts = lww.timestamp("doc").unwrap().clone();

        fs::remove_file(dir.path().join("doc")).unwrap();
        assert!(lww.scan(dir.path()));
        assert!(lww.is_tombstone("doc"));
        assert!(*lww.timestamp("doc").unwrap() > first_ts);
    }

    #[test]
    fn tombstone_timestamp_is_not_restamped_by_later_scans() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc", b"v1");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());
        fs::remove_file(dir.path().join("doc")).unwrap();
        lww.scan(dir.path());
        let tomb_ts = lww.timestamp("doc").unwrap().clone();

        assert!(!lww.scan(dir.path()));
        assert_eq!(*lww.timestamp("doc").unwrap(), tomb_ts);
    }

    #[test]
    fn modified_file_advances_its_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc", b"v1");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());
        let first_ts = lww.timestamp("doc").unwrap().clone();

        std::thread::sleep(Duration::from_millis(5));
        write(dir.path(), "doc", b"v2");
        assert!(lww.scan(dir.path()));
        assert!(*lww.timestamp("doc").unwrap() > first_ts);
    }

    #[test]
    fn tombstones_survive_restart_via_state_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc", b"v1");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());
        fs::remove_file(dir.path().join("doc")).unwrap();
        lww.scan(dir.path());
        let tomb_ts = lww.timestamp("doc").unwrap().clone();

        // Fresh instance, same folder: the tombstone is restored, the file
        // does not come back.
        let mut restarted = LwwFileSync::new();
        restarted.scan(dir.path());
        assert!(restarted.is_tombstone("doc"));
        assert_eq!(*restarted.timestamp("doc").unwrap(), tomb_ts);
        assert!(!dir.path().join("doc").exists());
    }

    #[test]
    fn encode_carries_content_and_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc", b"hello");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());
        lww.delete_local("gone", dir.path());

        let state = lww.encode(dir.path());
        let (_, payload) = &state.0["doc"];
        assert_eq!(payload.as_deref(), Some(BASE64.encode(b"hello").as_str()));
        let (_, tomb) = &state.0["gone"];
        assert!(tomb.is_none());
    }

    #[test]
    fn merge_writes_newer_remote_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut lww = LwwFileSync::new();

        let ts = IsoTimestamp::now();
        let mut remote = BTreeMap::new();
        remote.insert(
            "sub/new.txt".to_string(),
            (ts.clone(), Some(BASE64.encode(b"payload"))),
        );
        assert!(lww.merge(&LwwState(remote), dir.path()));

        assert_eq!(fs::read(dir.path().join("sub/new.txt")).unwrap(), b"payload");
        assert_eq!(lww.timestamp("sub/new.txt"), Some(&ts));
    }

    #[test]
    fn merge_ignores_older_and_equal_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc", b"local");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());
        let local_ts = lww.timestamp("doc").unwrap().clone();

        let older = IsoTimestamp::parse("2000-01-01T00:00:00Z").unwrap();
        let mut remote = BTreeMap::new();
        remote.insert("doc".to_string(), (older, Some(BASE64.encode(b"stale"))));
        assert!(!lww.merge(&LwwState(remote), dir.path()));
        assert_eq!(fs::read(dir.path().join("doc")).unwrap(), b"local");

        let mut equal = BTreeMap::new();
        equal.insert(
            "doc".to_string(),
            (local_ts, Some(BASE64.encode(b"same-instant"))),
        );
        assert!(!lww.merge(&LwwState(equal), dir.path()));
        assert_eq!(fs::read(dir.path().join("doc")).unwrap(), b"local");
    }

    #[test]
    fn merge_tombstone_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc", b"v1");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());

        std::thread::sleep(Duration::from_millis(5));
        let mut remote = BTreeMap::new();
        remote.insert("doc".to_string(), (IsoTimestamp::now(), None));
        assert!(lww.merge(&LwwState(remote), dir.path()));

        assert!(!dir.path().join("doc").exists());
        assert!(lww.is_tombstone("doc"));
    }

    #[test]
    fn merge_is_idempotent_per_datagram() {
        let dir = tempfile::tempdir().unwrap();
        let mut lww = LwwFileSync::new();

        let mut remote = BTreeMap::new();
        remote.insert(
            "doc".to_string(),
            (IsoTimestamp::now(), Some(BASE64.encode(b"payload"))),
        );
        let state = LwwState(remote);
        assert!(lww.merge(&state, dir.path()));
        assert!(!lww.merge(&state, dir.path()));
    }

    #[test]
    fn scan_after_merge_does_not_restamp_adopted_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut lww = LwwFileSync::new();

        let ts = IsoTimestamp::now();
        let mut remote = BTreeMap::new();
        remote.insert("doc".to_string(), (ts.clone(), Some(BASE64.encode(b"payload"))));
        lww.merge(&LwwState(remote), dir.path());

        // The adopted file carries the CRDT timestamp as its mtime, so the
        // scanner sees nothing new.
        assert!(!lww.scan(dir.path()));
        assert_eq!(lww.timestamp("doc"), Some(&ts));
    }

    #[test]
    fn merge_skips_out_of_domain_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut lww = LwwFileSync::new();

        let mut remote = BTreeMap::new();
        remote.insert(
            "../escape.txt".to_string(),
            (IsoTimestamp::now(), Some(BASE64.encode(b"nope"))),
        );
        remote.insert(
            ".lww_state.json".to_string(),
            (IsoTimestamp::now(), Some(BASE64.encode(b"nope"))),
        );
        assert!(!lww.merge(&LwwState(remote), dir.path()));
        assert!(lww.entries.is_empty());
    }

    #[test]
    fn delete_local_tombstones_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc", b"v1");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());
        assert!(lww.delete_local("doc", dir.path()));

        assert!(!dir.path().join("doc").exists());
        assert!(lww.is_tombstone("doc"));
    }

    #[test]
    fn snapshot_roundtrip_through_wire_state() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc", b"v1");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());
        lww.delete_local("other", dir.path());

        let encoded = serde_json::to_value(lww.encode(dir.path())).unwrap();
        let decoded: LwwState = serde_json::from_value(encoded).unwrap();
        let restored = LwwFileSync::from_state(&decoded);

        assert_eq!(restored, lww);
    }

    #[test]
    fn wire_format_is_path_to_pair_map() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc", b"hi");

        let mut lww = LwwFileSync::new();
        lww.scan(dir.path());
        let value = serde_json::to_value(lww.encode(dir.path())).unwrap();

        let pair = value["doc"].as_array().unwrap();
        assert_eq!(pair.len(), 2);
        assert!(pair[0].is_string());
        assert_eq!(pair[1].as_str().unwrap(), BASE64.encode(b"hi"));
    }
}
