// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session records: the persisted credential state for one principal.
//!
//! A record is either complete or treated as absent. The [`store`] module
//! persists records per principal; the [`lock`] module serializes sign-in
//! across processes sharing the same state directory.

pub mod lock;
pub mod store;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Persisted credentials for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Authenticated entity; set on sign-in and never changed by a refresh.
    pub subject_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry of `access_token` as epoch seconds.
    pub access_expiry: u64,
}

impl SessionRecord {
    /// All fields populated. Anything else on disk is a cache miss.
    pub fn is_complete(&self) -> bool {
        !self.subject_id.is_empty()
            && !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && self.access_expiry > 0
    }

    /// Seconds until expiry (negative once expired).
    pub fn remaining_secs(&self, now: u64) -> i64 {
        self.access_expiry as i64 - now as i64
    }

    /// True when `access_expiry - now > skew`.
    pub fn is_fresh(&self, now: u64, skew: Duration) -> bool {
        self.remaining_secs(now) > skew.as_secs() as i64
    }

    pub fn session(&self) -> Session {
        Session { subject_id: self.subject_id.clone(), token: self.access_token.clone() }
    }
}

/// What callers get back: who they are and the bearer token to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub subject_id: String,
    pub token: String,
}

/// Lifecycle of a principal's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NoCredential,
    ValidCached,
    /// Present but within the skew threshold of expiry.
    Expiring,
    Refreshing,
    SignedIn,
}

impl SessionState {
    /// Classify a cached record (or its absence).
    pub fn of(record: Option<&SessionRecord>, now: u64, skew: Duration) -> Self {
        match record {
            None => Self::NoCredential,
            Some(r) if r.is_fresh(now, skew) => Self::ValidCached,
            Some(_) => Self::Expiring,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::ValidCached => "valid_cached",
            Self::Expiring => "expiring",
            Self::Refreshing => "refreshing",
            Self::SignedIn => "signed_in",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a principal to a filename-safe key: anything outside
/// `[A-Za-z0-9_.@-]` becomes `_`.
pub fn sanitize(principal: &str) -> String {
    principal
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-') { c } else { '_' })
        .collect()
}

/// Return current epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
