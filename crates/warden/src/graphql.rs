// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated GraphQL execution with retries.
//!
//! Transport and HTTP status failures follow the retry engine's rules. A 2xx
//! envelope carrying `errors` is retried only when the joined messages match
//! the transient vocabulary, and at most `max_app_retries` times.

use std::sync::Arc;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::Settings;
use crate::credential::acquirer::Authenticator;
use crate::credential::Principal;
use crate::error::{snippet, Error, Failure};
use crate::retry::{self, Outcome, RetryPolicy};

/// Application error messages worth retrying (case-insensitive).
pub const TRANSIENT_PATTERN: &str =
    r"timeout|rate limit|temporary failure|ECONNRESET|connection reset";

pub const ADMIN_SECRET_HEADER: &str = "x-hasura-admin-secret";

/// Longest body excerpt quoted in a synthetic invalid-JSON error.
const INVALID_JSON_SNIPPET: usize = 200;

/// Who a request is sent as.
#[derive(Debug, Clone)]
pub enum Auth {
    /// Acquire (or reuse) a session for this principal.
    Principal(Principal),
    /// Send this token as-is.
    Bearer(String),
    Anonymous,
    AdminSecret(String),
}

/// Raw `{data, errors}` envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), rest: serde_json::Map::new() }
    }
}

impl GraphqlResponse {
    /// Error messages joined with ` | `, or `None` when there are none.
    pub fn error_message(&self) -> Option<String> {
        let errors = self.errors.as_deref().filter(|e| !e.is_empty())?;
        Some(errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join(" | "))
    }
}

/// Resolved credential attached to each attempt.
enum Credential {
    None,
    Bearer(String),
    AdminSecret(String),
}

pub struct GraphqlClient {
    url: String,
    http: reqwest::Client,
    authenticator: Option<Arc<Authenticator>>,
    policy: RetryPolicy,
    timeout: Duration,
    transient: Regex,
}

impl GraphqlClient {
    /// `authenticator` is only needed for [`Auth::Principal`] requests.
    pub fn new(
        url: &str,
        settings: &Settings,
        authenticator: Option<Arc<Authenticator>>,
    ) -> Result<Self, Error> {
        let transient = RegexBuilder::new(TRANSIENT_PATTERN)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Config(format!("transient pattern: {e}")))?;
        Ok(Self {
            url: url.trim_end_matches('/').to_owned(),
            http: reqwest::Client::builder()
                .timeout(settings.http_timeout)
                .build()
                .unwrap_or_default(),
            authenticator,
            policy: settings.graphql,
            timeout: settings.http_timeout,
            transient,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Execute and return only `data`. Error lists fail the call with the
    /// joined messages.
    pub async fn execute(
        &self,
        query: &str,
        variables: Value,
        auth: &Auth,
    ) -> Result<Value, Error> {
        self.execute_with_timeout(query, variables, auth, self.timeout).await
    }

    pub async fn execute_with_timeout(
        &self,
        query: &str,
        variables: Value,
        auth: &Auth,
        timeout: Duration,
    ) -> Result<Value, Error> {
        let credential = self.credential(auth).await?;
        let body = serde_json::json!({ "query": query, "variables": variables });

        let result = retry::execute(&self.policy, &self.url, |attempt| {
            let request = self.request(&credential, &body, timeout);
            async move {
                let outcome = retry::send(request).await.and_then(|text| self.classify(&text));
                if let Outcome::RetryApplication(failure) = &outcome {
                    debug!(attempt, err = %failure, "transient GraphQL error");
                }
                outcome
            }
        })
        .await;

        result.map_err(|e| match e {
            Error::Fatal { failure: Failure::Application(message), .. } => Error::Graphql(message),
            other => other,
        })
    }

    /// Single attempt returning the full envelope, errors unclassified.
    pub async fn execute_raw(
        &self,
        query: &str,
        variables: Value,
        auth: &Auth,
    ) -> Result<GraphqlResponse, Error> {
        let credential = self.credential(auth).await?;
        let body = serde_json::json!({ "query": query, "variables": variables });
        let response = self
            .request(&credential, &body, self.timeout)
            .send()
            .await
            .map_err(|e| self.fatal(retry::transport_failure(&e)))?;
        let text = response.text().await.map_err(|e| self.fatal(retry::transport_failure(&e)))?;
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| GraphqlResponse {
            data: None,
            errors: Some(vec![GraphqlError::new(format!(
                "Invalid JSON from server: {}",
                snippet(&text, INVALID_JSON_SNIPPET)
            ))]),
        }))
    }

    async fn credential(&self, auth: &Auth) -> Result<Credential, Error> {
        Ok(match auth {
            Auth::Principal(principal) => {
                let authenticator = self.authenticator.as_ref().ok_or_else(|| {
                    Error::Config("principal requests need an auth service".into())
                })?;
                Credential::Bearer(authenticator.session(principal).await?.token)
            }
            Auth::Bearer(token) => Credential::Bearer(token.clone()),
            Auth::Anonymous => Credential::None,
            Auth::AdminSecret(secret) => Credential::AdminSecret(secret.clone()),
        })
    }

    fn request(
        &self,
        credential: &Credential,
        body: &Value,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let request = self.http.post(&self.url).json(body).timeout(timeout);
        match credential {
            Credential::None => request,
            Credential::Bearer(token) => request.bearer_auth(token),
            Credential::AdminSecret(secret) => request.header(ADMIN_SECRET_HEADER, secret),
        }
    }

    /// Classify a 2xx body.
    fn classify(&self, text: &str) -> Outcome<Value> {
        let envelope: GraphqlResponse = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(_) => {
                return Outcome::transient(Failure::Decode(format!(
                    "Invalid JSON from server: {}",
                    snippet(text, INVALID_JSON_SNIPPET)
                )));
            }
        };
        match envelope.error_message() {
            Some(message) if self.transient.is_match(&message) => {
                Outcome::RetryApplication(Failure::Application(message))
            }
            Some(message) => Outcome::Fatal(Failure::Application(message)),
            None => Outcome::Success(envelope.data.unwrap_or(Value::Null)),
        }
    }

    fn fatal(&self, failure: Failure) -> Error {
        Error::Fatal { operation: self.policy.operation, endpoint: self.url.clone(), failure }
    }
}

impl std::fmt::Debug for GraphqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlClient")
            .field("url", &self.url)
            .field("policy", &self.policy.operation)
            .field("authenticated", &self.authenticator.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "graphql_tests.rs"]
mod tests;
