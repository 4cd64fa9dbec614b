// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session acquisition: cache, then refresh, then sign-in under the lock.
//!
//! State per principal:
//!
//! ```text
//! NoCredential ──────────────────────────────┐
//! ValidCached ── return as-is                │
//! Expiring ──> Refreshing ──ok──> return     │
//!                   └──err──> sign-in <──────┘ (under ProcessLock) ──> SignedIn
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::credential::endpoint::{self, AuthEndpoints};
use crate::credential::{CredentialKind, Principal};
use crate::error::{Error, Failure};
use crate::memo::Memoizer;
use crate::retry::RetryPolicy;
use crate::session::lock::{Acquired, ProcessLock};
use crate::session::store::SessionStore;
use crate::session::{epoch_secs, Session, SessionRecord, SessionState};

/// Subject id reported for bearer overrides.
pub const OVERRIDE_SUBJECT: &str = "override";

/// Nominal lifetime of a bearer override.
pub const OVERRIDE_LIFETIME: Duration = Duration::from_secs(3600);

type MemoKey = (String, CredentialKind);

/// Produces usable sessions for principals, sharing work across concurrent
/// callers in this process and across processes on the host.
pub struct Authenticator {
    endpoints: AuthEndpoints,
    store: SessionStore,
    lock: ProcessLock,
    http: reqwest::Client,
    memo: Memoizer<MemoKey, Result<SessionRecord, Error>>,
    skew: Duration,
    timeout: Duration,
    sign_in_policy: RetryPolicy,
    refresh_policy: RetryPolicy,
}

impl Authenticator {
    pub fn new(auth_url: &str, settings: &Settings) -> Arc<Self> {
        Arc::new(Self {
            endpoints: AuthEndpoints::new(auth_url),
            store: SessionStore::new(&settings.state_dir),
            lock: ProcessLock::new(&settings.lock_dir, settings.lock_ttl, settings.lock_slice),
            http: reqwest::Client::builder()
                .timeout(settings.http_timeout)
                .build()
                .unwrap_or_default(),
            memo: Memoizer::new(),
            skew: settings.refresh_skew,
            timeout: settings.http_timeout,
            sign_in_policy: settings.sign_in,
            refresh_policy: settings.refresh,
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    /// Get a usable session for `principal`.
    pub async fn session(self: &Arc<Self>, principal: &Principal) -> Result<Session, Error> {
        self.record(principal).await.map(|record| record.session())
    }

    /// Like [`session`](Self::session) but returns the full record. Bearer
    /// overrides go through the memo under their own key and are never saved.
    pub async fn record(self: &Arc<Self>, principal: &Principal) -> Result<SessionRecord, Error> {
        let key = (principal.identity.clone(), principal.kind());
        let flow = match &principal.bearer {
            Some(token) => {
                let record = override_record(token);
                self.memo.run(key, move || async move { Ok(record) }).await
            }
            None => {
                let this = Arc::clone(self);
                let principal = principal.clone();
                self.memo.run(key, move || async move { this.acquire(&principal).await }).await
            }
        };
        flow.unwrap_or_else(|| {
            Err(Error::Fatal {
                operation: self.sign_in_policy.operation,
                endpoint: self.endpoints.base().to_owned(),
                failure: Failure::Transport("session acquisition aborted".to_owned()),
            })
        })
    }

    async fn acquire(&self, principal: &Principal) -> Result<SessionRecord, Error> {
        let identity = principal.identity.as_str();
        let cached = self.store.load(identity);
        let state = SessionState::of(cached.as_ref(), epoch_secs(), self.skew);
        debug!(principal = identity, state = %state, "acquiring session");

        if let Some(record) = cached {
            if state == SessionState::ValidCached {
                return Ok(record);
            }
            match self.refresh(identity, record).await {
                Ok(record) => return Ok(record),
                Err(e) => warn!(principal = identity, err = %e, "refresh failed, signing in"),
            }
        }

        self.sign_in(principal).await
    }

    async fn refresh(&self, identity: &str, record: SessionRecord) -> Result<SessionRecord, Error> {
        debug!(principal = identity, state = %SessionState::Refreshing, "refreshing session");
        let refreshed = endpoint::refresh(
            &self.http,
            &self.endpoints,
            &record.refresh_token,
            &self.refresh_policy,
            self.timeout,
        )
        .await?;
        let record = refreshed.apply(record);
        self.store.save(identity, &record);
        info!(principal = identity, expires_in = record.remaining_secs(epoch_secs()), "session refreshed");
        Ok(record)
    }

    async fn sign_in(&self, principal: &Principal) -> Result<SessionRecord, Error> {
        let identity = principal.identity.as_str();
        let store = &self.store;
        let skew = self.skew;
        let fresh = || store.load(identity).filter(|r| r.is_fresh(epoch_secs(), skew));

        let guard = match self.lock.acquire_or(identity, fresh).await {
            Acquired::Shortcut(record) => {
                debug!(principal = identity, "using session written by lock holder");
                return Ok(record);
            }
            Acquired::Held(guard) => guard,
        };

        // The previous holder may have finished between our last check and
        // the lock becoming free.
        if let Some(record) = fresh() {
            debug!(principal = identity, "session appeared while acquiring lock");
            guard.release();
            return Ok(record);
        }

        let result = endpoint::sign_in(
            &self.http,
            &self.endpoints,
            principal,
            &self.sign_in_policy,
            self.timeout,
        )
        .await;
        if let Ok(record) = &result {
            self.store.save(identity, record);
            info!(
                principal = identity,
                state = %SessionState::SignedIn,
                expires_in = record.remaining_secs(epoch_secs()),
                "signed in"
            );
        }
        guard.release();
        result
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("auth_url", &self.endpoints.base())
            .field("state_dir", &self.store.dir())
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

/// Synthetic record for an out-of-band bearer token. Never persisted.
pub fn override_record(token: &str) -> SessionRecord {
    SessionRecord {
        subject_id: OVERRIDE_SUBJECT.to_owned(),
        access_token: token.to_owned(),
        refresh_token: String::new(),
        access_expiry: epoch_secs() + OVERRIDE_LIFETIME.as_secs(),
    }
}

#[cfg(test)]
#[path = "acquirer_tests.rs"]
mod tests;
