// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential acquisition for named principals.
//!
//! Principals come from a JSON principals file (`--principals <path>`):
//!
//! ```json
//! {"principals": [{"name": "a", "identity": "a@test", "secret_env": "PASSWORD_A"}]}
//! ```
//!
//! A principal with a `bearer` set never signs in; the token is used as-is.

pub mod acquirer;
pub mod endpoint;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Top-level principals file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrincipalsFile {
    #[serde(default)]
    pub principals: Vec<PrincipalConfig>,
}

/// One principal as written in the principals file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalConfig {
    /// Short name used on the command line.
    pub name: String,
    /// Login identity (e.g. email). Keys the cache, lock and memo entries.
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Env var holding the secret, used when `secret` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,
    /// Out-of-band bearer token; bypasses sign-in entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer: Option<String>,
}

impl PrincipalsFile {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
    }

    /// Resolve a principal by name.
    pub fn resolve(&self, name: &str) -> Result<Principal, Error> {
        let config = self
            .principals
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::Config(format!("unknown principal: {name}")))?;
        config.resolve()
    }

    /// Resolve every principal, in file order.
    pub fn all(&self) -> Result<Vec<Principal>, Error> {
        self.principals.iter().map(PrincipalConfig::resolve).collect()
    }
}

impl PrincipalConfig {
    pub fn resolve(&self) -> Result<Principal, Error> {
        let bearer = self.bearer.clone().filter(|b| !b.trim().is_empty());
        let secret = match (&self.secret, &self.secret_env) {
            (Some(secret), _) => secret.clone(),
            (None, Some(var)) => std::env::var(var).unwrap_or_default(),
            (None, None) => String::new(),
        };
        if secret.is_empty() && bearer.is_none() {
            return Err(Error::Config(format!("principal {} has no secret or bearer", self.name)));
        }
        Ok(Principal { name: self.name.clone(), identity: self.identity.clone(), secret, bearer })
    }
}

/// How a session for a principal is obtained. Part of the memo key, so a
/// bearer request never joins a password flow for the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    Password,
    Bearer,
}

/// A resolved principal ready for acquisition.
#[derive(Clone)]
pub struct Principal {
    pub name: String,
    pub identity: String,
    secret: String,
    pub bearer: Option<String>,
}

impl Principal {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        let identity = identity.into();
        Self { name: identity.clone(), identity, secret: secret.into(), bearer: None }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn kind(&self) -> CredentialKind {
        if self.bearer.is_some() {
            CredentialKind::Bearer
        } else {
            CredentialKind::Password
        }
    }
}

impl std::fmt::Debug for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Principal")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
