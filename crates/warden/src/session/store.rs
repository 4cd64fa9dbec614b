// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Disk session store: one JSON record per principal with atomic writes.
//!
//! Reads never fail (any problem is a cache miss) and writes are
//! best-effort, so the shared file can cost an extra sign-in at worst.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

use crate::session::{sanitize, SessionRecord};

const SESSION_PREFIX: &str = "warden-session-";
const SESSION_SUFFIX: &str = ".json";

/// Per-principal session records under a shared directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic record path for a principal.
    pub fn path_for(&self, principal: &str) -> PathBuf {
        self.dir.join(format!("{SESSION_PREFIX}{}{SESSION_SUFFIX}", sanitize(principal)))
    }

    /// Load the record for `principal`, or `None` on any read/parse problem.
    pub fn load(&self, principal: &str) -> Option<SessionRecord> {
        read_record(&self.path_for(principal))
    }

    /// Persist a record. Failures are logged and swallowed.
    pub fn save(&self, principal: &str, record: &SessionRecord) {
        let path = self.path_for(principal);
        if let Err(e) = write_atomic(&path, record) {
            warn!(path = %path.display(), "failed to persist session: {e}");
            return;
        }
        debug!(path = %path.display(), "persisted session");
    }

    /// Remove the record for one principal. Returns whether a file was removed.
    pub fn remove(&self, principal: &str) -> bool {
        std::fs::remove_file(self.path_for(principal)).is_ok()
    }

    /// All session records currently on disk, keyed by sanitized principal.
    ///
    /// Corrupt files are listed with `None`.
    pub fn list(&self) -> Vec<(String, Option<SessionRecord>)> {
        let mut out: Vec<_> = self
            .session_files()
            .into_iter()
            .map(|(key, path)| (key, read_record(&path)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Delete every session record (lock markers are left alone).
    pub fn clear(&self) -> usize {
        self.session_files()
            .into_iter()
            .filter(|(_, path)| std::fs::remove_file(path).is_ok())
            .count()
    }

    fn session_files(&self) -> Vec<(String, PathBuf)> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dir.display(), "cannot list state dir: {e}");
                return vec![];
            }
        };
        entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = name.strip_prefix(SESSION_PREFIX)?.strip_suffix(SESSION_SUFFIX)?;
                Some((key.to_owned(), entry.path()))
            })
            .collect()
    }
}

fn read_record(path: &Path) -> Option<SessionRecord> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) => {
            debug!(path = %path.display(), "no cached session: {e}");
            return None;
        }
    };
    let record: SessionRecord = match serde_json::from_str(&data) {
        Ok(r) => r,
        Err(e) => {
            warn!(path = %path.display(), "ignoring unreadable session: {e}");
            return None;
        }
    };
    if !record.is_complete() {
        warn!(path = %path.display(), "ignoring incomplete session");
        return None;
    }
    Some(record)
}

/// Write tmp + rename. The temp name carries PID and a counter so concurrent
/// writers never share a partially written file.
fn write_atomic(path: &Path, record: &SessionRecord) -> anyhow::Result<()> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(record)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
