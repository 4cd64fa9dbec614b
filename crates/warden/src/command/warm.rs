// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `warden warm`: acquire a session for every principal before workers
//! start, so they find a warm cache instead of racing to sign in.
//!
//! Best-effort: failures are logged and reported but never fail the command.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Settings, WardenConfig};
use crate::credential::acquirer::Authenticator;
use crate::credential::Principal;
use crate::error::Error;

#[derive(Debug, clap::Args)]
pub struct WarmArgs {
    /// Deadline for each principal, in ms.
    #[arg(long, default_value = "30000")]
    pub timeout_ms: u64,

    /// Pause between principals, in ms.
    #[arg(long, default_value = "400")]
    pub stagger_ms: u64,
}

/// Result for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmEntry {
    pub principal: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WarmEntry {
    fn failed(principal: &str, error: impl ToString) -> Self {
        Self {
            principal: principal.to_owned(),
            ok: false,
            subject_id: None,
            error: Some(error.to_string()),
        }
    }
}

pub async fn run(
    config: &WardenConfig,
    settings: &Settings,
    args: &WarmArgs,
) -> anyhow::Result<()> {
    let file = config.load_principals()?;
    let authenticator = Authenticator::new(&config.auth_url()?, settings);

    let mut entries = Vec::with_capacity(file.principals.len());
    let mut principals = Vec::with_capacity(file.principals.len());
    for entry in &file.principals {
        match entry.resolve() {
            Ok(principal) => principals.push(principal),
            Err(e) => {
                warn!(principal = %entry.name, err = %e, "skipping principal");
                entries.push(WarmEntry::failed(&entry.name, e));
            }
        }
    }

    let timeout = Duration::from_millis(args.timeout_ms);
    let stagger = Duration::from_millis(args.stagger_ms);
    entries.extend(warm(&authenticator, &principals, timeout, stagger).await);
    super::print_json(&serde_json::json!({ "principals": entries }))
}

/// Acquire sessions one principal at a time, each under `timeout`, pausing
/// `stagger` between principals.
pub async fn warm(
    authenticator: &Arc<Authenticator>,
    principals: &[Principal],
    timeout: Duration,
    stagger: Duration,
) -> Vec<WarmEntry> {
    let mut entries = Vec::with_capacity(principals.len());
    for (i, principal) in principals.iter().enumerate() {
        if i > 0 && !stagger.is_zero() {
            tokio::time::sleep(stagger).await;
        }

        let name = principal.name.as_str();
        let entry = match tokio::time::timeout(timeout, authenticator.session(principal)).await {
            Ok(Ok(session)) => {
                info!(principal = name, subject = %session.subject_id, "session warm");
                WarmEntry {
                    principal: name.to_owned(),
                    ok: true,
                    subject_id: Some(session.subject_id),
                    error: None,
                }
            }
            Ok(Err(e)) => {
                warn!(principal = name, err = %e, "warm-up failed");
                WarmEntry::failed(name, e)
            }
            Err(_) => {
                let e = Error::Timeout { label: format!("warm-up for {name}"), after: timeout };
                warn!(principal = name, err = %e, "warm-up failed");
                WarmEntry::failed(name, e)
            }
        };
        entries.push(entry);
    }
    entries
}

#[cfg(test)]
#[path = "warm_tests.rs"]
mod tests;
