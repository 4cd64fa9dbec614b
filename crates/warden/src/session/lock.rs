// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-process sign-in lock.
//!
//! Ownership is the existence of a marker file created with `create_new`.
//! The file body (owner id, pid, timestamp) is diagnostic only; age comes
//! from the file mtime. Markers older than the TTL are presumed abandoned
//! and removed by whichever waiter notices first, and no waiter blocks for
//! longer than one TTL before breaking the lock itself.

use std::convert::Infallible;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::{epoch_ms, sanitize};

/// Default age after which a marker is considered stale.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Default sleep between re-checks while another process holds the lock.
pub const DEFAULT_LOCK_SLICE: Duration = Duration::from_millis(250);

/// Diagnostic payload written into the marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub owner: String,
    pub pid: u32,
    pub created_at_ms: u64,
}

/// Result of waiting for the lock.
#[derive(Debug)]
pub enum Acquired<T> {
    /// The caller owns the marker until the guard is released or dropped.
    Held(LockGuard),
    /// The shortcut check produced a value while waiting; no lock was taken.
    Shortcut(T),
}

/// Named, TTL-bounded mutual exclusion shared by every process using `dir`.
#[derive(Debug, Clone)]
pub struct ProcessLock {
    dir: PathBuf,
    ttl: Duration,
    slice: Duration,
}

impl ProcessLock {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, slice: Duration) -> Self {
        Self { dir: dir.into(), ttl, slice }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deterministic marker path for a principal.
    pub fn path_for(&self, principal: &str) -> PathBuf {
        self.dir.join(format!("warden-signin-{}.lock", sanitize(principal)))
    }

    /// Block until the lock for `principal` is held.
    pub async fn acquire(&self, principal: &str) -> LockGuard {
        match self.acquire_or(principal, || None::<Infallible>).await {
            Acquired::Held(guard) => guard,
            Acquired::Shortcut(never) => match never {},
        }
    }

    /// Block until the lock is held, or until `shortcut` yields a value.
    ///
    /// `shortcut` runs after every wait slice, never before the first
    /// creation attempt.
    pub async fn acquire_or<T>(
        &self,
        principal: &str,
        mut shortcut: impl FnMut() -> Option<T>,
    ) -> Acquired<T> {
        let path = self.path_for(principal);
        let start = Instant::now();

        loop {
            match try_create(&path) {
                Ok(guard) => {
                    debug!(principal, waited_ms = start.elapsed().as_millis() as u64, "lock acquired");
                    return Acquired::Held(guard);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if marker_age(&path).is_some_and(|age| age > self.ttl) {
                        if let Some(age) = reclaim_stale(&path, self.ttl) {
                            warn!(
                                principal,
                                age_ms = age.as_millis() as u64,
                                "removed stale sign-in lock"
                            );
                            continue;
                        }
                    }
                }
                Err(e) => {
                    debug!(path = %path.display(), "lock create failed: {e}");
                }
            }

            tokio::time::sleep(self.slice).await;

            if let Some(value) = shortcut() {
                debug!(principal, "lock wait short-circuited");
                return Acquired::Shortcut(value);
            }

            if start.elapsed() > self.ttl {
                warn!(principal, "lock wait budget exhausted, breaking lock");
                let _ = fs::remove_file(&path);
                return match try_create(&path) {
                    Ok(guard) => Acquired::Held(guard),
                    Err(e) => {
                        warn!(principal, "proceeding without lock: {e}");
                        Acquired::Held(LockGuard::unheld(path))
                    }
                };
            }
        }
    }

    /// Read the current marker for a principal, if any.
    pub fn inspect(&self, principal: &str) -> Option<LockMarker> {
        let data = fs::read_to_string(self.path_for(principal)).ok()?;
        serde_json::from_str(&data).ok()
    }
}

/// Exclusive ownership of a marker; releasing (or dropping) removes it.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    owner: String,
    held: bool,
}

impl LockGuard {
    fn unheld(path: PathBuf) -> Self {
        Self { path, owner: String::new(), held: false }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.held {
            if let Err(e) = fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), "lock already gone: {e}");
            }
            self.held = false;
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn try_create(path: &Path) -> io::Result<LockGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let marker = LockMarker {
        owner: uuid::Uuid::new_v4().to_string(),
        pid: std::process::id(),
        created_at_ms: epoch_ms(),
    };
    // The marker exists now, so we own it even if the body cannot be written.
    if let Ok(body) = serde_json::to_vec(&marker) {
        let _ = file.write_all(&body);
    }
    Ok(LockGuard { path: path.to_path_buf(), owner: marker.owner, held: true })
}

/// Remove a marker older than `ttl`, returning its age.
///
/// The marker is first renamed to a unique name and its age re-read there,
/// so a fresh marker created after our check is never deleted. A fresh
/// marker moved aside by mistake is linked back into place.
fn reclaim_stale(path: &Path, ttl: Duration) -> Option<Duration> {
    let name = path.file_name()?.to_string_lossy();
    let aside = path.with_file_name(format!("{name}.{}.stale", uuid::Uuid::new_v4()));
    fs::rename(path, &aside).ok()?;

    let reclaimed = marker_age(&aside).filter(|age| *age > ttl);
    if reclaimed.is_none() {
        if let Err(e) = fs::hard_link(&aside, path) {
            warn!(path = %path.display(), "could not restore live sign-in lock: {e}");
        }
    }
    let _ = fs::remove_file(&aside);
    reclaimed
}

fn marker_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
