// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Row types persisted in the identity database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::SealedSecret;

/// Kind of ledger identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    Admin,
    User,
}

impl WalletType {
    /// Role requested from the CA registrar when (re-)registering.
    pub fn registrar_role(&self) -> &'static str {
        match self {
            WalletType::Admin => "admin",
            WalletType::User => "client",
        }
    }
}

impl std::fmt::Display for WalletType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletType::Admin => f.write_str("admin"),
            WalletType::User => f.write_str("user"),
        }
    }
}

/// Wallet row (`wallets` table), keyed by `label`.
///
/// The private key only ever appears here as AES-256-GCM ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    /// `username@organization`
    pub label: String,
    /// X.509 certificate (PEM)
    pub certificate: String,
    pub msp_id: String,
    pub wallet_type: WalletType,
    pub encrypted_private_key: Vec<u8>,
    pub encryption_iv: Vec<u8>,
    pub encryption_tag: Vec<u8>,
    /// Certificate `notAfter`, recomputed on every write.
    pub certificate_expires_at: DateTime<Utc>,
    /// Last time an expiry alert was emitted for this wallet.
    #[serde(default)]
    pub certificate_notified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revocation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletRecord {
    pub fn sealed_private_key(&self) -> SealedSecret {
        SealedSecret {
            ciphertext: self.encrypted_private_key.clone(),
            iv: self.encryption_iv.clone(),
            tag: self.encryption_tag.clone(),
        }
    }
}

/// Wallet metadata without key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSummary {
    pub label: String,
    pub msp_id: String,
    pub wallet_type: WalletType,
    pub certificate_expires_at: DateTime<Utc>,
    pub certificate_notified_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
}

impl From<&WalletRecord> for WalletSummary {
    fn from(record: &WalletRecord) -> Self {
        Self {
            label: record.label.clone(),
            msp_id: record.msp_id.clone(),
            wallet_type: record.wallet_type,
            certificate_expires_at: record.certificate_expires_at,
            certificate_notified_at: record.certificate_notified_at,
            revoked: record.revoked,
            revoked_at: record.revoked_at,
            revocation_reason: record.revocation_reason.clone(),
        }
    }
}

/// Append-only CRL entry (`certificate_revocations` table), keyed by serial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub certificate_serial: String,
    pub wallet_label: String,
    pub revoked_by: String,
    pub revocation_reason: String,
    pub revoked_at: DateTime<Utc>,
}

/// Session signing key (`jwt_keys` table), keyed by `key_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionKeyRecord {
    pub key_id: String,
    /// PKCS#8 private key PEM, sealed under the master key.
    pub private_key: SealedSecret,
    /// SubjectPublicKeyInfo PEM.
    pub public_key: String,
    pub algorithm: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionKeyRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&WalletType::Admin).unwrap(), "\"admin\"");
        assert_eq!(
            serde_json::from_str::<WalletType>("\"user\"").unwrap(),
            WalletType::User
        );
    }

    #[test]
    fn registrar_roles() {
        assert_eq!(WalletType::Admin.registrar_role(), "admin");
        assert_eq!(WalletType::User.registrar_role(), "client");
    }
}
