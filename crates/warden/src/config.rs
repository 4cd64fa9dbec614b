// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::credential::PrincipalsFile;
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::session::lock::{DEFAULT_LOCK_SLICE, DEFAULT_LOCK_TTL};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_millis(6_000);

/// Tokens closer than this to expiry are refreshed before use.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(30);

const AUTH_URL_FALLBACKS: &[&str] = &["NHOST_AUTH_URL"];
const GRAPHQL_URL_FALLBACKS: &[&str] = &["NHOST_GRAPHQL_URL", "HASURA_GRAPHQL_ENDPOINT"];

/// Shared flags for every `warden` subcommand.
#[derive(Debug, Clone, Args)]
pub struct WardenConfig {
    /// Auth service base URL (falls back to NHOST_AUTH_URL).
    #[arg(long, env = "WARDEN_AUTH_URL")]
    pub auth_url: Option<String>,

    /// GraphQL endpoint (falls back to NHOST_GRAPHQL_URL, HASURA_GRAPHQL_ENDPOINT).
    #[arg(long, env = "WARDEN_GRAPHQL_URL")]
    pub graphql_url: Option<String>,

    /// Path to the principals JSON file.
    #[arg(long, env = "WARDEN_PRINCIPALS")]
    pub principals: Option<PathBuf>,

    /// Directory holding persisted session records (default: OS temp dir).
    #[arg(long, env = "WARDEN_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Directory holding sign-in lock markers (default: the state dir).
    #[arg(long, env = "WARDEN_LOCK_DIR")]
    pub lock_dir: Option<PathBuf>,

    /// Per-request HTTP timeout in ms.
    #[arg(long, env = "WARDEN_HTTP_TIMEOUT_MS", default_value = "6000")]
    pub http_timeout_ms: u64,

    /// Refresh tokens this close to expiry, in seconds.
    #[arg(long, env = "WARDEN_REFRESH_SKEW_SECS", default_value = "30")]
    pub refresh_skew_secs: u64,

    /// Age after which a sign-in lock is considered abandoned, in ms.
    #[arg(long, env = "WARDEN_LOCK_TTL_MS", default_value = "30000")]
    pub lock_ttl_ms: u64,

    /// Sleep between lock re-checks, in ms.
    #[arg(long, env = "WARDEN_LOCK_SLICE_MS", default_value = "250")]
    pub lock_slice_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "WARDEN_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WARDEN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl WardenConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> Result<(), Error> {
        if self.http_timeout_ms == 0 {
            return Err(Error::Config("--http-timeout-ms must be positive".into()));
        }
        if self.lock_slice_ms == 0 {
            return Err(Error::Config("--lock-slice-ms must be positive".into()));
        }
        if self.lock_slice_ms > self.lock_ttl_ms {
            return Err(Error::Config("--lock-slice-ms must not exceed --lock-ttl-ms".into()));
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            return Err(Error::Config(format!("invalid log format: {}", self.log_format)));
        }
        Ok(())
    }

    pub fn auth_url(&self) -> Result<String, Error> {
        resolve_url(self.auth_url.as_deref(), AUTH_URL_FALLBACKS)
            .ok_or_else(|| Error::Config("auth URL not set (--auth-url or WARDEN_AUTH_URL)".into()))
    }

    pub fn graphql_url(&self) -> Result<String, Error> {
        resolve_url(self.graphql_url.as_deref(), GRAPHQL_URL_FALLBACKS).ok_or_else(|| {
            Error::Config("GraphQL URL not set (--graphql-url or WARDEN_GRAPHQL_URL)".into())
        })
    }

    pub fn load_principals(&self) -> Result<PrincipalsFile, Error> {
        let path = self
            .principals
            .as_deref()
            .ok_or_else(|| Error::Config("principals file not set (--principals)".into()))?;
        PrincipalsFile::load(path)
    }

    /// Runtime settings derived from the flags.
    pub fn settings(&self) -> Settings {
        let state_dir = self.state_dir.clone().unwrap_or_else(std::env::temp_dir);
        let lock_dir = self.lock_dir.clone().unwrap_or_else(|| state_dir.clone());
        Settings {
            state_dir,
            lock_dir,
            http_timeout: Duration::from_millis(self.http_timeout_ms),
            refresh_skew: Duration::from_secs(self.refresh_skew_secs),
            lock_ttl: Duration::from_millis(self.lock_ttl_ms),
            lock_slice: Duration::from_millis(self.lock_slice_ms),
            ..Settings::default()
        }
    }
}

/// First non-empty candidate among the explicit value and the fallback env
/// vars, with trailing slashes removed.
fn resolve_url(explicit: Option<&str>, fallbacks: &[&str]) -> Option<String> {
    explicit
        .map(str::to_owned)
        .into_iter()
        .chain(fallbacks.iter().filter_map(|var| std::env::var(var).ok()))
        .map(|url| url.trim().trim_end_matches('/').to_owned())
        .find(|url| !url.is_empty())
}

/// Runtime knobs for the session manager.
#[derive(Debug, Clone)]
pub struct Settings {
    pub state_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub http_timeout: Duration,
    pub refresh_skew: Duration,
    pub lock_ttl: Duration,
    pub lock_slice: Duration,
    pub sign_in: RetryPolicy,
    pub refresh: RetryPolicy,
    pub graphql: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        let dir = std::env::temp_dir();
        Self {
            state_dir: dir.clone(),
            lock_dir: dir,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            refresh_skew: DEFAULT_REFRESH_SKEW,
            lock_ttl: DEFAULT_LOCK_TTL,
            lock_slice: DEFAULT_LOCK_SLICE,
            sign_in: RetryPolicy::SIGN_IN,
            refresh: RetryPolicy::REFRESH,
            graphql: RetryPolicy::GRAPHQL,
        }
    }
}

impl Settings {
    /// Default settings with state and locks under `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self { state_dir: dir.clone(), lock_dir: dir, ..Self::default() }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
