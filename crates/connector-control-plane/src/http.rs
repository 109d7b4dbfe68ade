// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP accessor for the connector control plane.
//!
//! Every call is an authenticated `GET` carrying the `token` query parameter.
//! Responses are JSON documents whose payload lives under the `result` key;
//! this module strips that envelope and classifies HTTP failures so callers
//! only deal with [`ClientError`].

use std::fmt;

use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::job::{InternalSettings, JobConfigError, RemoteJobConfig};

/// Returns the most recent connector version published by the control plane.
pub const LATEST_VERSION_ENDPOINT: &str = "/connector/version/latest";
/// Resolves the tenant (account) id owning the token.
pub const ACCOUNT_ID_ENDPOINT: &str = "/user/account/id";
/// Returns the job (analyze group) configuration.
pub const ANALYZE_ENDPOINT: &str = "/analyse/get";
/// Returns object-storage settings managed by the control plane itself.
pub const INTERNAL_SETTINGS_ENDPOINT: &str = "/connector/internal/settings";

const TOKEN_PARAM: &str = "token";
const RESULT_KEY: &str = "result";

/// Error taxonomy for control-plane calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The token was rejected.
    #[error("unauthorized - control plane rejected the token")]
    Unauthorized,
    /// Redirects and 4xx responses other than 401.
    #[error("request rejected by control plane: status {0}")]
    Client(u16),
    /// 5xx responses; the next scheduled call may succeed.
    #[error("transient control plane error: status {0}")]
    Retryable(u16),
    /// DNS, TLS, socket or body read failures.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The body was not valid JSON.
    #[error("failed to decode control plane response: {0}")]
    Decode(#[from] serde_json::Error),
    /// The JSON document had no `result` member.
    #[error("control plane response has no `result` member")]
    MissingResult,
    /// The `result` member did not have the expected shape.
    #[error("unexpected control plane payload: {0}")]
    UnexpectedPayload(String),
    /// The job record was absent or malformed.
    #[error("invalid job record: {0}")]
    InvalidJob(#[from] JobConfigError),
    /// Host and scheme do not form a valid URL.
    #[error("invalid control plane url: {0}")]
    InvalidBaseUrl(String),
}

/// Thin authenticated client for the control plane.
///
/// Cheap to clone; the underlying `reqwest::Client` shares its connection pool.
#[derive(Clone)]
pub struct ControlPlaneClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for ControlPlaneClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlaneClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

impl ControlPlaneClient {
    /// Builds a client for `host` (`name[:port]`), using https when `https` is set.
    pub fn new(host: &str, token: impl Into<String>, https: bool) -> Result<Self, ClientError> {
        let scheme = if https { "https" } else { "http" };
        let raw = format!("{scheme}://{}", host.trim().trim_end_matches('/'));
        let base_url = Url::parse(&raw).map_err(|_| ClientError::InvalidBaseUrl(raw.clone()))?;
        if base_url.cannot_be_a_base() || base_url.host_str().is_none() {
            return Err(ClientError::InvalidBaseUrl(raw));
        }
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    /// Returns the scheme + host the client targets.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Issues an authenticated `GET` and returns the `result` member of the response.
    pub async fn call(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, ClientError> {
        let mut url = self.base_url.clone();
        url.set_path(path);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(TOKEN_PARAM, &self.token);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }

        debug!(path = %path, params = ?params, "control-plane HTTP request");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(path = %path, status = %status, body = %body, "control-plane HTTP response");
            return Err(classify_status(status));
        }

        let bytes = response.bytes().await?;
        let mut document: Value = serde_json::from_slice(&bytes)?;
        debug!(path = %path, status = %status, "control-plane HTTP response");
        match document.get_mut(RESULT_KEY) {
            Some(result) => Ok(result.take()),
            None => Err(ClientError::MissingResult),
        }
    }

    /// Latest published connector version.
    pub async fn latest_version(&self) -> Result<String, ClientError> {
        let result = self.call(LATEST_VERSION_ENDPOINT, &[]).await?;
        scalar_to_string(&result)
            .ok_or_else(|| ClientError::UnexpectedPayload(format!("version: {result}")))
    }

    /// Tenant id owning the token. The control plane answers with either a string or a number.
    pub async fn account_id(&self) -> Result<String, ClientError> {
        let result = self.call(ACCOUNT_ID_ENDPOINT, &[]).await?;
        scalar_to_string(&result)
            .ok_or_else(|| ClientError::UnexpectedPayload(format!("account id: {result}")))
    }

    /// Fetches and parses the job configuration for `analyze_id`.
    pub async fn job_config(&self, analyze_id: &str) -> Result<RemoteJobConfig, ClientError> {
        let result = self.call(ANALYZE_ENDPOINT, &[("id", analyze_id)]).await?;
        debug!(analyze_id = %analyze_id, job = %result, "fetched job record");
        Ok(RemoteJobConfig::from_value(&result)?)
    }

    /// Object-storage settings for the `INTERNAL` source kind.
    pub async fn internal_settings(&self) -> Result<InternalSettings, ClientError> {
        let result = self.call(INTERNAL_SETTINGS_ENDPOINT, &[]).await?;
        Ok(serde_json::from_value(result)?)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Maps non-success HTTP statuses onto [`ClientError`].
fn classify_status(status: StatusCode) -> ClientError {
    if status == StatusCode::UNAUTHORIZED {
        return ClientError::Unauthorized;
    }
    if status.is_server_error() {
        return ClientError::Retryable(status.as_u16());
    }
    ClientError::Client(status.as_u16())
}
