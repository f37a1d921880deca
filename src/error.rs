// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Service-level error taxonomy.
//!
//! Parsing, decryption and revocation errors propagate to the immediate
//! caller as typed failures. Batch renewal converts per-item errors into
//! result entries (see [`crate::renewal::RenewalResult`]) and only returns
//! these errors for failures outside a single item.

use crate::certificate::CertificateParseError;
use crate::crypto::CryptoError;
use crate::secrets::SecretBackendError;
use crate::storage::DbError;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    CertificateParse(#[from] CertificateParseError),

    /// Authentication tag mismatch on stored key material. Never retried.
    #[error("decryption failed for wallet {label}")]
    Decryption { label: String },

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("wallet is revoked: {0}")]
    RevokedCertificate(String),

    #[error("invalid wallet label {0:?} (expected username@organization)")]
    InvalidLabel(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("master key not present at secret path {0}")]
    MasterKeyMissing(String),

    #[error("a renewal batch is already running")]
    BatchInProgress,

    #[error("threshold of {0} days is out of range")]
    InvalidThreshold(i64),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    SecretBackend(#[from] SecretBackendError),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl LifecycleError {
    /// Stable machine-readable code for logs and probe bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            LifecycleError::CertificateParse(_) => "certificate_parse_error",
            LifecycleError::Decryption { .. } => "decryption_error",
            LifecycleError::WalletNotFound(_) => "wallet_not_found",
            LifecycleError::RevokedCertificate(_) => "revoked_certificate",
            LifecycleError::InvalidLabel(_) => "invalid_label",
            LifecycleError::InvalidPrivateKey(_) => "invalid_private_key",
            LifecycleError::MasterKeyMissing(_) => "master_key_missing",
            LifecycleError::BatchInProgress => "batch_in_progress",
            LifecycleError::InvalidThreshold(_) => "invalid_threshold",
            LifecycleError::Crypto(_) => "crypto_error",
            LifecycleError::SecretBackend(_) => "secret_backend_error",
            LifecycleError::Storage(_) => "storage_error",
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
