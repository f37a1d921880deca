// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Environment-variable secret backend.
//!
//! Read-only, and only knows the reserved master-key path. Every other path
//! reads as absent.

use async_trait::async_trait;

use super::{SecretBackend, SecretBackendError, SecretMap, MASTER_KEY_FIELD};
use crate::config::MASTER_KEY_ENV;

/// Serves the master key from a single environment variable.
#[derive(Debug, Clone)]
pub struct EnvSecretBackend {
    master_key_path: String,
    env_var: String,
}

impl EnvSecretBackend {
    /// Backend reading the master key from `WALLET_MASTER_KEY`.
    pub fn new(master_key_path: impl Into<String>) -> Self {
        Self::with_env_var(master_key_path, MASTER_KEY_ENV)
    }

    pub fn with_env_var(master_key_path: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self {
            master_key_path: master_key_path.into(),
            env_var: env_var.into(),
        }
    }

    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    fn master_key_value(&self) -> Option<String> {
        std::env::var(&self.env_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

#[async_trait]
impl SecretBackend for EnvSecretBackend {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn read(&self, path: &str) -> Result<Option<SecretMap>, SecretBackendError> {
        if path != self.master_key_path {
            return Ok(None);
        }
        Ok(self.master_key_value().map(|value| {
            let mut map = SecretMap::new();
            map.insert(MASTER_KEY_FIELD.to_string(), value);
            map
        }))
    }

    async fn write(&self, _path: &str, _data: &SecretMap) -> Result<(), SecretBackendError> {
        Err(SecretBackendError::Unsupported {
            backend: "environment",
            operation: "write",
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, SecretBackendError> {
        if self.master_key_path.starts_with(prefix) && self.master_key_value().is_some() {
            Ok(vec![self.master_key_path.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn delete(&self, _path: &str) -> Result<(), SecretBackendError> {
        Err(SecretBackendError::Unsupported {
            backend: "environment",
            operation: "delete",
        })
    }

    async fn health_check(&self) -> bool {
        true
    }
}
