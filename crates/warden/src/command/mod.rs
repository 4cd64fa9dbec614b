// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands: `token`, `query`, `warm`, `status`, `clean`.
//!
//! Every command writes one JSON document to stdout; logs go to stderr.

pub mod query;
pub mod warm;

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use crate::config::WardenConfig;
use crate::credential::acquirer::Authenticator;
use crate::session::store::SessionStore;
use crate::session::{epoch_secs, SessionState};

/// Credential session manager for concurrent test workers.
#[derive(Debug, Parser)]
#[command(name = "warden", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub config: WardenConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print a usable session for a principal.
    Token(TokenArgs),
    /// Execute a GraphQL request and print the result.
    Query(query::QueryArgs),
    /// Acquire sessions for every principal ahead of a run.
    Warm(warm::WarmArgs),
    /// List persisted session records.
    Status,
    /// Remove persisted session records (lock markers are kept).
    Clean,
}

#[derive(Debug, clap::Args)]
pub struct TokenArgs {
    /// Principal name from the principals file.
    #[arg(long)]
    pub principal: String,
}

/// Run the selected subcommand.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = &cli.config;
    let settings = config.settings();
    match &cli.command {
        Command::Token(args) => {
            let principal = config.load_principals()?.resolve(&args.principal)?;
            // Bearer overrides never reach the auth service.
            let auth_url = match principal.bearer {
                Some(_) => config.auth_url().unwrap_or_default(),
                None => config.auth_url()?,
            };
            let session = Authenticator::new(&auth_url, &settings).session(&principal).await?;
            print_json(&serde_json::to_value(session)?)
        }
        Command::Query(args) => query::run(config, &settings, args).await,
        Command::Warm(args) => warm::run(config, &settings, args).await,
        Command::Status => {
            print_json(&status(&SessionStore::new(&settings.state_dir), settings.refresh_skew))
        }
        Command::Clean => print_json(&clean(&SessionStore::new(&settings.state_dir))),
    }
}

/// Describe every persisted record relative to now.
pub fn status(store: &SessionStore, skew: Duration) -> Value {
    let now = epoch_secs();
    let sessions: Vec<Value> = store
        .list()
        .into_iter()
        .map(|(key, record)| match record {
            Some(record) => json!({
                "key": key,
                "subject_id": record.subject_id,
                "expires_in": record.remaining_secs(now),
                "state": SessionState::of(Some(&record), now, skew),
            }),
            None => json!({ "key": key, "state": "unreadable" }),
        })
        .collect();
    json!({ "state_dir": store.dir(), "sessions": sessions })
}

pub fn clean(store: &SessionStore) -> Value {
    json!({ "state_dir": store.dir(), "removed": store.clear() })
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
