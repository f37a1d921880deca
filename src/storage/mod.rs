// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Storage Module
//!
//! Persistent storage of ledger identities, the certificate revocation list
//! and session signing keys in an embedded redb database.
//!
//! ## Security Model
//!
//! - Private keys are sealed with AES-256-GCM (see [`crate::crypto`]) under
//!   the master key before they are written
//! - The master key never touches the database; it comes from the secret
//!   backend (see [`crate::secrets`])
//! - Each logical write (`put`, `revoke`, key rotation) is a single redb
//!   write transaction
//!
//! ## Table Layout
//!
//! ```text
//! identities.redb
//!   wallets                   label   -> WalletRecord
//!   certificate_revocations   serial  -> RevocationRecord (append-only)
//!   jwt_keys                  key_id  -> SessionKeyRecord
//! ```

pub mod database;
pub mod records;
pub mod wallet_store;

pub use database::{
    DbError, DbResult, IdentityDatabase, NotifyOutcome, RevokeOutcome, UpsertOutcome,
};
pub use records::{RevocationRecord, SessionKeyRecord, WalletRecord, WalletSummary, WalletType};
pub use wallet_store::{Identity, WalletStore, SYSTEM_PRINCIPAL};
