// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted identity repository.
//!
//! ## Security
//!
//! - Private keys are sealed with AES-256-GCM under the master key before
//!   they reach the database
//! - A revoked wallet is inert: [`WalletStore::get`] returns `None` for it
//! - A decryption failure is fatal for the call; there is no plaintext path
//!
//! `WalletStore` is the only writer of wallet rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::database::{IdentityDatabase, NotifyOutcome, RevokeOutcome, UpsertOutcome};
use super::records::{RevocationRecord, WalletRecord, WalletSummary, WalletType};
use crate::certificate;
use crate::crypto::{CryptoBox, CryptoError, MasterKey};
use crate::error::{LifecycleError, LifecycleResult};

/// Revoker recorded when no principal is supplied.
pub const SYSTEM_PRINCIPAL: &str = "system";

/// A decrypted, usable identity.
#[derive(Clone, Serialize)]
pub struct Identity {
    pub label: String,
    pub certificate: String,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub msp_id: String,
    pub wallet_type: WalletType,
    pub certificate_expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("label", &self.label)
            .field("msp_id", &self.msp_id)
            .field("wallet_type", &self.wallet_type)
            .field("certificate_expires_at", &self.certificate_expires_at)
            .finish_non_exhaustive()
    }
}

/// Encrypted wallet repository.
#[derive(Clone)]
pub struct WalletStore {
    db: Arc<IdentityDatabase>,
    master_key: MasterKey,
}

impl WalletStore {
    pub fn new(db: Arc<IdentityDatabase>, master_key: MasterKey) -> Self {
        Self { db, master_key }
    }

    pub fn database(&self) -> &Arc<IdentityDatabase> {
        &self.db
    }

    /// Store (or replace) an identity.
    ///
    /// Parses the certificate for its `notAfter`, seals the private key and
    /// writes the whole row in one transaction. Any previous alert
    /// bookkeeping is cleared since the certificate is new.
    pub fn put(
        &self,
        label: &str,
        certificate_pem: &str,
        private_key_pem: &str,
        msp_id: &str,
        wallet_type: WalletType,
    ) -> LifecycleResult<()> {
        let expires_at = certificate::extract_expiry(certificate_pem)?;
        validate_private_key(private_key_pem)?;

        let sealed = CryptoBox::encrypt(private_key_pem.as_bytes(), &self.master_key)?;
        let now = Utc::now();

        let record = WalletRecord {
            label: label.to_string(),
            certificate: certificate_pem.to_string(),
            msp_id: msp_id.to_string(),
            wallet_type,
            encrypted_private_key: sealed.ciphertext,
            encryption_iv: sealed.iv,
            encryption_tag: sealed.tag,
            certificate_expires_at: expires_at,
            certificate_notified_at: None,
            revoked: false,
            revoked_at: None,
            revocation_reason: None,
            created_at: now,
            updated_at: now,
        };

        match self.db.upsert_wallet(&record)? {
            UpsertOutcome::RejectedRevoked => {
                tracing::warn!(label = %label, "Refusing to overwrite revoked wallet");
                Err(LifecycleError::RevokedCertificate(label.to_string()))
            }
            outcome => {
                tracing::info!(
                    label = %label,
                    msp_id = %msp_id,
                    expires_at = %expires_at,
                    replaced = outcome == UpsertOutcome::Replaced,
                    "Wallet stored"
                );
                Ok(())
            }
        }
    }

    /// Load and decrypt an identity.
    ///
    /// Returns `Ok(None)` for both unknown and revoked labels. Callers must
    /// treat `None` as "fail closed".
    pub fn get(&self, label: &str) -> LifecycleResult<Option<Identity>> {
        let Some(record) = self.db.get_wallet(label)? else {
            return Ok(None);
        };

        if record.revoked {
            tracing::debug!(label = %label, "Revoked wallet requested");
            return Ok(None);
        }

        let plaintext = CryptoBox::open(&record.sealed_private_key(), &self.master_key)
            .map_err(|e| match e {
                CryptoError::Decryption => {
                    tracing::error!(
                        label = %label,
                        "Wallet private key failed authentication"
                    );
                    LifecycleError::Decryption {
                        label: label.to_string(),
                    }
                }
                other => LifecycleError::Crypto(other),
            })?;

        let private_key = String::from_utf8(plaintext).map_err(|_| LifecycleError::Decryption {
            label: label.to_string(),
        })?;

        Ok(Some(Identity {
            label: record.label,
            certificate: record.certificate,
            private_key,
            msp_id: record.msp_id,
            wallet_type: record.wallet_type,
            certificate_expires_at: record.certificate_expires_at,
        }))
    }

    /// Revoke a wallet on behalf of the system principal.
    pub fn revoke(&self, label: &str, reason: &str) -> LifecycleResult<()> {
        self.revoke_as(label, reason, SYSTEM_PRINCIPAL)
    }

    /// Revoke a wallet and append its certificate to the revocation list.
    ///
    /// Revoking an already revoked wallet is a no-op.
    pub fn revoke_as(&self, label: &str, reason: &str, revoked_by: &str) -> LifecycleResult<()> {
        match self.db.revoke_wallet(label, reason, revoked_by, Utc::now())? {
            RevokeOutcome::Revoked(entry) => {
                tracing::warn!(
                    label = %label,
                    serial = %entry.certificate_serial,
                    revoked_by = %revoked_by,
                    reason = %reason,
                    "Wallet revoked"
                );
                Ok(())
            }
            RevokeOutcome::RevokedSerialListed(listed) => {
                tracing::warn!(
                    label = %label,
                    serial = %listed.certificate_serial,
                    listed_for = %listed.wallet_label,
                    listed_at = %listed.revoked_at,
                    revoked_by = %revoked_by,
                    "Wallet revoked; certificate serial was already in the revocation list"
                );
                Ok(())
            }
            RevokeOutcome::AlreadyRevoked => {
                tracing::debug!(label = %label, "Wallet already revoked");
                Ok(())
            }
            RevokeOutcome::NotFound => Err(LifecycleError::WalletNotFound(label.to_string())),
            RevokeOutcome::InvalidCertificate(e) => Err(e.into()),
        }
    }

    /// Metadata for a single wallet, revoked or not.
    pub fn summary(&self, label: &str) -> LifecycleResult<Option<WalletSummary>> {
        Ok(self.db.get_wallet(label)?.as_ref().map(WalletSummary::from))
    }

    /// Metadata for every wallet.
    pub fn list(&self) -> LifecycleResult<Vec<WalletSummary>> {
        Ok(self
            .db
            .list_wallets()?
            .iter()
            .map(WalletSummary::from)
            .collect())
    }

    /// Record an alert for the certificate expiring at `alerted_expiry`.
    ///
    /// Returns `false` when the certificate was replaced in the meantime, so
    /// the new certificate keeps its first alert.
    pub fn mark_notified(
        &self,
        label: &str,
        alerted_expiry: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> LifecycleResult<bool> {
        match self.db.set_wallet_notified_at(label, alerted_expiry, at)? {
            NotifyOutcome::Recorded => Ok(true),
            NotifyOutcome::Stale => Ok(false),
            NotifyOutcome::NotFound => Err(LifecycleError::WalletNotFound(label.to_string())),
        }
    }

    pub fn revocations(&self) -> LifecycleResult<Vec<RevocationRecord>> {
        Ok(self.db.list_revocations()?)
    }

    pub fn is_serial_revoked(&self, serial: &str) -> LifecycleResult<bool> {
        Ok(self.db.get_revocation(serial)?.is_some())
    }
}

/// Light structural check: the key must be a PEM block tagged as a key.
fn validate_private_key(private_key_pem: &str) -> LifecycleResult<()> {
    let block = pem::parse(private_key_pem)
        .map_err(|e| LifecycleError::InvalidPrivateKey(e.to_string()))?;
    if !block.tag().ends_with("PRIVATE KEY") {
        return Err(LifecycleError::InvalidPrivateKey(format!(
            "unexpected PEM tag {}",
            block.tag()
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::WalletStore;
    use crate::crypto::MasterKey;
    use crate::storage::IdentityDatabase;

    /// A wallet store over a throwaway database.
    pub fn test_store() -> (tempfile::TempDir, WalletStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = IdentityDatabase::open(&dir.path().join("identities.redb")).expect("open db");
        let store = WalletStore::new(Arc::new(db), MasterKey::generate().expect("master key"));
        (dir, store)
    }
}
