// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded identity database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `wallets`: label → serialized WalletRecord
//! - `certificate_revocations`: certificate serial → serialized RevocationRecord
//! - `jwt_keys`: key_id → serialized SessionKeyRecord
//!
//! redb has a single writer: every write transaction below is one atomic
//! unit and concurrent writers are serialized by the database.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::records::{RevocationRecord, SessionKeyRecord, WalletRecord};
use crate::certificate::{self, CertificateParseError};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary wallet table: label → WalletRecord (JSON bytes).
const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");

/// CRL: certificate serial → RevocationRecord (JSON bytes). Append-only.
const REVOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("certificate_revocations");

/// Session signing keys: key_id → SessionKeyRecord (JSON bytes).
const JWT_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("jwt_keys");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Result of a wallet upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Existing row is revoked; nothing was written.
    RejectedRevoked,
}

/// Result of a wallet revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked(RevocationRecord),
    /// Wallet revoked, but its serial was already listed. Carries the
    /// existing CRL row, which is left untouched.
    RevokedSerialListed(RevocationRecord),
    AlreadyRevoked,
    NotFound,
    /// The stored certificate could not be parsed to obtain its serial.
    InvalidCertificate(CertificateParseError),
}

/// Result of recording an expiry alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Recorded,
    /// The stored certificate no longer has the alerted expiry.
    Stale,
    NotFound,
}

// =============================================================================
// IdentityDatabase
// =============================================================================

/// Embedded ACID identity database.
pub struct IdentityDatabase {
    db: Database,
}

impl IdentityDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(REVOCATIONS)?;
            let _ = write_txn.open_table(JWT_KEYS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Cheap liveness check: open a read transaction on the wallet table.
    pub fn ping(&self) -> DbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(WALLETS)?;
        Ok(())
    }

    // =========================================================================
    // Wallets
    // =========================================================================

    pub fn get_wallet(&self, label: &str) -> DbResult<Option<WalletRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WALLETS)?;
        match table.get(label)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a wallet row in a single write transaction.
    ///
    /// `created_at` of an existing row is preserved. Revoked rows are never
    /// overwritten.
    pub fn upsert_wallet(&self, record: &WalletRecord) -> DbResult<UpsertOutcome> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(WALLETS)?;

            let existing_bytes = table
                .get(record.label.as_str())?
                .map(|existing| existing.value().to_vec());

            let mut to_store = record.clone();
            let outcome = match existing_bytes {
                Some(bytes) => {
                    let existing: WalletRecord = serde_json::from_slice(&bytes)?;
                    if existing.revoked {
                        UpsertOutcome::RejectedRevoked
                    } else {
                        to_store.created_at = existing.created_at;
                        UpsertOutcome::Replaced
                    }
                }
                None => UpsertOutcome::Inserted,
            };

            if outcome != UpsertOutcome::RejectedRevoked {
                let json = serde_json::to_vec(&to_store)?;
                table.insert(record.label.as_str(), json.as_slice())?;
            }
            outcome
        };

        if outcome == UpsertOutcome::RejectedRevoked {
            write_txn.abort()?;
        } else {
            write_txn.commit()?;
        }
        Ok(outcome)
    }

    /// Revoke a wallet and append its CRL entry in one write transaction.
    ///
    /// The serial is read from the stored certificate at revocation time.
    pub fn revoke_wallet(
        &self,
        label: &str,
        reason: &str,
        revoked_by: &str,
        now: DateTime<Utc>,
    ) -> DbResult<RevokeOutcome> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut wallets = write_txn.open_table(WALLETS)?;

            let existing_bytes = wallets
                .get(label)?
                .map(|existing| existing.value().to_vec());

            match existing_bytes {
                None => RevokeOutcome::NotFound,
                Some(bytes) => {
                    let mut record: WalletRecord = serde_json::from_slice(&bytes)?;
                    if record.revoked {
                        RevokeOutcome::AlreadyRevoked
                    } else {
                        match certificate::extract_serial(&record.certificate) {
                            Err(e) => RevokeOutcome::InvalidCertificate(e),
                            Ok(serial) => {
                                record.revoked = true;
                                record.revoked_at = Some(now);
                                record.revocation_reason = Some(reason.to_string());
                                record.updated_at = now;
                                let json = serde_json::to_vec(&record)?;
                                wallets.insert(label, json.as_slice())?;

                                let entry = RevocationRecord {
                                    certificate_serial: serial,
                                    wallet_label: label.to_string(),
                                    revoked_by: revoked_by.to_string(),
                                    revocation_reason: reason.to_string(),
                                    revoked_at: now,
                                };

                                let mut crl = write_txn.open_table(REVOCATIONS)?;
                                let listed_bytes = crl
                                    .get(entry.certificate_serial.as_str())?
                                    .map(|listed| listed.value().to_vec());
                                match listed_bytes {
                                    Some(bytes) => RevokeOutcome::RevokedSerialListed(
                                        serde_json::from_slice(&bytes)?,
                                    ),
                                    None => {
                                        let json = serde_json::to_vec(&entry)?;
                                        crl.insert(
                                            entry.certificate_serial.as_str(),
                                            json.as_slice(),
                                        )?;
                                        RevokeOutcome::Revoked(entry)
                                    }
                                }
                            }
                        }
                    }
                }
            }
        };

        match outcome {
            RevokeOutcome::Revoked(_) | RevokeOutcome::RevokedSerialListed(_) => {
                write_txn.commit()?
            }
            _ => write_txn.abort()?,
        }
        Ok(outcome)
    }

    /// Record the time an expiry alert was emitted for the certificate
    /// expiring at `alerted_expiry`.
    ///
    /// Nothing is written when the stored certificate has since changed.
    pub fn set_wallet_notified_at(
        &self,
        label: &str,
        alerted_expiry: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> DbResult<NotifyOutcome> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(WALLETS)?;
            let existing_bytes = table
                .get(label)?
                .map(|existing| existing.value().to_vec());

            match existing_bytes {
                Some(bytes) => {
                    let mut record: WalletRecord = serde_json::from_slice(&bytes)?;
                    if record.certificate_expires_at == alerted_expiry {
                        record.certificate_notified_at = Some(at);
                        let json = serde_json::to_vec(&record)?;
                        table.insert(label, json.as_slice())?;
                        NotifyOutcome::Recorded
                    } else {
                        NotifyOutcome::Stale
                    }
                }
                None => NotifyOutcome::NotFound,
            }
        };

        if outcome == NotifyOutcome::Recorded {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(outcome)
    }

    pub fn list_wallets(&self) -> DbResult<Vec<WalletRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WALLETS)?;
        let mut wallets = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            wallets.push(serde_json::from_slice(value.value())?);
        }
        Ok(wallets)
    }

    // =========================================================================
    // Revocation list
    // =========================================================================

    pub fn get_revocation(&self, serial: &str) -> DbResult<Option<RevocationRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REVOCATIONS)?;
        match table.get(serial)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_revocations(&self) -> DbResult<Vec<RevocationRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REVOCATIONS)?;
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    // =========================================================================
    // Session keys
    // =========================================================================

    pub fn get_session_key(&self, key_id: &str) -> DbResult<Option<SessionKeyRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(JWT_KEYS)?;
        match table.get(key_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_session_keys(&self) -> DbResult<Vec<SessionKeyRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(JWT_KEYS)?;
        let mut keys = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            keys.push(serde_json::from_slice(value.value())?);
        }
        Ok(keys)
    }

    pub fn active_session_key(&self) -> DbResult<Option<SessionKeyRecord>> {
        Ok(self
            .list_session_keys()?
            .into_iter()
            .find(|key| key.is_active))
    }

    /// Insert `new_key` as the active key only if no key is active yet.
    ///
    /// Returns `true` when the key was inserted.
    pub fn insert_session_key_if_none_active(&self, new_key: &SessionKeyRecord) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(JWT_KEYS)?;

            let mut any_active = false;
            for entry in table.iter()? {
                let (_, value) = entry?;
                let key: SessionKeyRecord = serde_json::from_slice(value.value())?;
                if key.is_active {
                    any_active = true;
                    break;
                }
            }

            if any_active {
                false
            } else {
                let mut record = new_key.clone();
                record.is_active = true;
                let json = serde_json::to_vec(&record)?;
                table.insert(record.key_id.as_str(), json.as_slice())?;
                true
            }
        };

        if inserted {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(inserted)
    }

    /// Deactivate every active key and insert `new_key` as the sole active key.
    ///
    /// Both the flip and the insert happen in one write transaction, so no
    /// reader ever observes zero or two active keys. Returns the ids of the
    /// keys that were deactivated.
    pub fn rotate_session_key(&self, new_key: &SessionKeyRecord) -> DbResult<Vec<String>> {
        let write_txn = self.db.begin_write()?;
        let deactivated = {
            let mut table = write_txn.open_table(JWT_KEYS)?;

            let mut previously_active = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let key: SessionKeyRecord = serde_json::from_slice(value.value())?;
                if key.is_active {
                    previously_active.push(key);
                }
            }

            let mut deactivated = Vec::with_capacity(previously_active.len());
            for mut key in previously_active {
                key.is_active = false;
                let json = serde_json::to_vec(&key)?;
                table.insert(key.key_id.as_str(), json.as_slice())?;
                deactivated.push(key.key_id);
            }

            let mut record = new_key.clone();
            record.is_active = true;
            let json = serde_json::to_vec(&record)?;
            table.insert(record.key_id.as_str(), json.as_slice())?;

            deactivated
        };
        write_txn.commit()?;
        Ok(deactivated)
    }

    /// Delete inactive keys whose own expiry has passed.
    ///
    /// The active key is never deleted. Returns the purged key ids.
    pub fn delete_expired_session_keys(&self, now: DateTime<Utc>) -> DbResult<Vec<String>> {
        let write_txn = self.db.begin_write()?;
        let purged = {
            let mut table = write_txn.open_table(JWT_KEYS)?;

            let mut expired = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let key: SessionKeyRecord = serde_json::from_slice(value.value())?;
                if !key.is_active && key.is_expired_at(now) {
                    expired.push(key.key_id);
                }
            }

            for key_id in &expired {
                table.remove(key_id.as_str())?;
            }
            expired
        };
        write_txn.commit()?;
        Ok(purged)
    }

    /// Replace a session key row verbatim.
    #[cfg(test)]
    pub(crate) fn put_session_key(&self, key: &SessionKeyRecord) -> DbResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(JWT_KEYS)?;
            let json = serde_json::to_vec(key)?;
            table.insert(key.key_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
