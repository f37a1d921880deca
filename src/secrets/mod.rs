// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Secret Backends
//!
//! Path-addressed key/value secrets. Two implementations are composed by
//! precedence in [`SecretManager`]:
//!
//! 1. [`VaultSecretBackend`] - networked KV v2 secret store (preferred)
//! 2. [`EnvSecretBackend`] - process environment, master key only
//!
//! When the networked backend fails its health check the master key is read
//! from the environment instead. That keeps the key in plaintext in the
//! process environment, so the degradation is always logged as a warning.
//! No other secret path has a fallback.

use std::collections::BTreeMap;

use async_trait::async_trait;

pub mod env;
pub mod manager;
pub mod vault;

pub use env::EnvSecretBackend;
pub use manager::{SecretBackendMode, SecretManager};
pub use vault::VaultSecretBackend;

/// Field of the reserved master-key secret holding the base64 key.
pub const MASTER_KEY_FIELD: &str = "key";

/// Flat key/value payload of a secret.
pub type SecretMap = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum SecretBackendError {
    /// Backend could not be reached or answered with a server error.
    #[error("secret backend unavailable: {0}")]
    Unavailable(String),

    #[error("secret backend rejected credentials")]
    Unauthorized,

    #[error("secret backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("malformed secret payload: {0}")]
    Malformed(String),

    #[error("operation not supported by {backend} backend: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

/// Abstract secret storage.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Read the secret at `path`. `Ok(None)` when it does not exist.
    async fn read(&self, path: &str) -> Result<Option<SecretMap>, SecretBackendError>;

    /// Create or replace the secret at `path`.
    async fn write(&self, path: &str, data: &SecretMap) -> Result<(), SecretBackendError>;

    /// List secret paths directly under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, SecretBackendError>;

    /// Delete the secret at `path`. Deleting a missing secret is not an error.
    async fn delete(&self, path: &str) -> Result<(), SecretBackendError>;

    /// `true` when the backend is reachable and ready to serve reads.
    async fn health_check(&self) -> bool;
}
