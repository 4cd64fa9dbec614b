// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `warden query`: run one GraphQL request as a principal, a raw bearer,
//! anonymously, or with the admin secret.

use std::time::Duration;

use clap::ArgGroup;
use serde_json::Value;

use crate::config::{Settings, WardenConfig};
use crate::credential::acquirer::Authenticator;
use crate::error::Error;
use crate::graphql::{Auth, GraphqlClient};

#[derive(Debug, clap::Args)]
#[command(group(
    ArgGroup::new("auth")
        .required(true)
        .args(["principal", "bearer", "anonymous", "admin_secret"])
))]
pub struct QueryArgs {
    /// GraphQL document.
    pub query: String,

    /// Principal name from the principals file.
    #[arg(long)]
    pub principal: Option<String>,

    /// Send this bearer token as-is.
    #[arg(long)]
    pub bearer: Option<String>,

    /// Send no credentials.
    #[arg(long)]
    pub anonymous: bool,

    /// Send `x-hasura-admin-secret`.
    #[arg(long)]
    pub admin_secret: Option<String>,

    /// Variables as JSON.
    #[arg(long, default_value = "{}")]
    pub variables: String,

    /// Print the full `{data, errors}` envelope from a single attempt.
    #[arg(long)]
    pub raw: bool,

    /// Per-request timeout override in ms.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl QueryArgs {
    pub fn auth(&self, config: &WardenConfig) -> Result<Auth, Error> {
        if let Some(name) = &self.principal {
            return Ok(Auth::Principal(config.load_principals()?.resolve(name)?));
        }
        if let Some(token) = &self.bearer {
            return Ok(Auth::Bearer(token.clone()));
        }
        if let Some(secret) = &self.admin_secret {
            return Ok(Auth::AdminSecret(secret.clone()));
        }
        Ok(Auth::Anonymous)
    }

    pub fn variables(&self) -> Result<Value, Error> {
        serde_json::from_str(&self.variables)
            .map_err(|e| Error::Config(format!("--variables is not valid JSON: {e}")))
    }
}

pub async fn run(
    config: &WardenConfig,
    settings: &Settings,
    args: &QueryArgs,
) -> anyhow::Result<()> {
    let auth = args.auth(config)?;
    let variables = args.variables()?;
    let authenticator = match &auth {
        Auth::Principal(_) => Some(Authenticator::new(&config.auth_url()?, settings)),
        _ => None,
    };
    let client = GraphqlClient::new(&config.graphql_url()?, settings, authenticator)?;

    let output = if args.raw {
        serde_json::to_value(client.execute_raw(&args.query, variables, &auth).await?)?
    } else {
        let timeout = args.timeout_ms.map(Duration::from_millis).unwrap_or(settings.http_timeout);
        client.execute_with_timeout(&args.query, variables, &auth, timeout).await?
    };
    super::print_json(&output)
}
