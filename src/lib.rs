// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger Identity Lifecycle - Certificate & Secret Lifecycle Service
//!
//! Encrypted-at-rest storage of permissioned-ledger identities (X.509
//! certificate + private key), certificate expiry monitoring, automated
//! re-enrollment through a CA registrar, and rotation of the Ed25519 keys
//! that sign session tokens.
//!
//! ## Modules
//!
//! - `crypto` - AES-256-GCM sealing of private keys under the master key
//! - `certificate` - X.509/PEM parsing (`notAfter`, serial)
//! - `secrets` - Secret backends (Vault KV v2 with environment fallback)
//! - `storage` - redb identity database and the encrypted wallet store
//! - `monitor` - Expiry reporting and tiered alerts
//! - `renewal` - CA re-enrollment, per-label leases, paced batches
//! - `session` - Session signing key rotation, JWT sign/verify
//! - `scheduler` - Periodic lifecycle driver
//! - `api` - Liveness/readiness probes (Axum)

pub mod api;
pub mod certificate;
pub mod config;
pub mod crypto;
pub mod error;
pub mod monitor;
pub mod renewal;
pub mod scheduler;
pub mod secrets;
pub mod session;
pub mod state;
pub mod storage;
