// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Networked secret backend speaking the Vault KV v2 HTTP API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | read | `GET /v1/{mount}/data/{path}` |
//! | write | `POST /v1/{mount}/data/{path}` with `{"data": {...}}` |
//! | list | `LIST /v1/{mount}/metadata/{prefix}` |
//! | delete | `DELETE /v1/{mount}/metadata/{path}` (all versions) |
//! | health | `GET /v1/sys/health` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;

use super::{SecretBackend, SecretBackendError, SecretMap};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Clone)]
pub struct VaultSecretBackend {
    base_url: String,
    token: String,
    mount: String,
    http: Client,
}

impl std::fmt::Debug for VaultSecretBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSecretBackend")
            .field("base_url", &self.base_url)
            .field("mount", &self.mount)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl VaultSecretBackend {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        mount: impl Into<String>,
    ) -> Result<Self, SecretBackendError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                SecretBackendError::Unavailable(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            mount: mount.into().trim_matches('/').to_string(),
            http,
        })
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.base_url,
            self.mount,
            path.trim_matches('/')
        )
    }

    fn metadata_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}/metadata/{}",
            self.base_url,
            self.mount,
            path.trim_matches('/')
        )
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<Response, SecretBackendError> {
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(TOKEN_HEADER, &self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request
            .send()
            .await
            .map_err(|e| SecretBackendError::Unavailable(format!("{method} {url} failed: {e}")))
    }
}

/// Map a non-success status to a backend error.
async fn status_error(response: Response) -> SecretBackendError {
    let status = response.status();
    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        return SecretBackendError::Unauthorized;
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        return SecretBackendError::Unavailable(format!("HTTP {status}: {body}"));
    }
    SecretBackendError::Http {
        status: status.as_u16(),
        message: body,
    }
}

/// Extract `data.data` from a KV v2 read response.
///
/// Non-string values are kept in their JSON text form.
fn parse_read_payload(payload: &Value) -> Result<SecretMap, SecretBackendError> {
    let fields = payload
        .get("data")
        .and_then(|d| d.get("data"))
        .and_then(Value::as_object)
        .ok_or_else(|| SecretBackendError::Malformed("missing data.data object".into()))?;

    Ok(fields
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect())
}

/// Extract `data.keys` from a KV v2 list response as full paths.
fn parse_list_payload(prefix: &str, payload: &Value) -> Result<Vec<String>, SecretBackendError> {
    let keys = payload
        .get("data")
        .and_then(|d| d.get("keys"))
        .and_then(Value::as_array)
        .ok_or_else(|| SecretBackendError::Malformed("missing data.keys array".into()))?;

    let prefix = prefix.trim_matches('/');
    Ok(keys
        .iter()
        .filter_map(Value::as_str)
        .map(|key| {
            if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}/{key}")
            }
        })
        .collect())
}

#[async_trait]
impl SecretBackend for VaultSecretBackend {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn read(&self, path: &str) -> Result<Option<SecretMap>, SecretBackendError> {
        let response = self.send(Method::GET, self.data_url(path), None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| SecretBackendError::Malformed(format!("read {path}: {e}")))?;
        parse_read_payload(&payload).map(Some)
    }

    async fn write(&self, path: &str, data: &SecretMap) -> Result<(), SecretBackendError> {
        let body = serde_json::json!({ "data": data });
        let response = self
            .send(Method::POST, self.data_url(path), Some(body))
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, SecretBackendError> {
        let method = Method::from_bytes(b"LIST")
            .map_err(|e| SecretBackendError::Unavailable(format!("invalid LIST method: {e}")))?;
        let response = self.send(method, self.metadata_url(prefix), None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| SecretBackendError::Malformed(format!("list {prefix}: {e}")))?;
        parse_list_payload(prefix, &payload)
    }

    async fn delete(&self, path: &str) -> Result<(), SecretBackendError> {
        let response = self
            .send(Method::DELETE, self.metadata_url(path), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(status_error(response).await)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/sys/health", self.base_url);
        match self.http.get(&url).send().await {
            // 429 is an unsealed standby node, which still serves reads.
            Ok(response) => {
                response.status().is_success() || response.status() == StatusCode::TOO_MANY_REQUESTS
            }
            Err(e) => {
                tracing::debug!(error = %e, url = %url, "Secret backend health check failed");
                false
            }
        }
    }
}
