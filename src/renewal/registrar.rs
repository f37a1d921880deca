// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Certificate authority registrar boundary.
//!
//! The CA's enrollment protocol lives behind this trait. Re-registering an
//! identity that already exists must be accepted by implementations, since
//! renewal always goes through register + enroll.

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrarError {
    #[error("CA rejected request: {0}")]
    Rejected(String),

    #[error("CA unavailable: {0}")]
    Unavailable(String),
}

/// Fresh identity material produced by an enrollment.
#[derive(Clone)]
pub struct Enrollment {
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub serial: String,
}

impl std::fmt::Debug for Enrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enrollment")
            .field("serial", &self.serial)
            .field("private_key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Which registrar call a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrarStage {
    EnsureAdminEnrolled,
    RegisterUser,
    EnrollUser,
}

impl std::fmt::Display for RegistrarStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrarStage::EnsureAdminEnrolled => f.write_str("ensure_admin_enrolled"),
            RegistrarStage::RegisterUser => f.write_str("register_user"),
            RegistrarStage::EnrollUser => f.write_str("enroll_user"),
        }
    }
}

#[async_trait]
pub trait CaRegistrar: Send + Sync {
    /// Idempotent bootstrap of the organization's registrar admin.
    async fn ensure_admin_enrolled(&self, msp_id: &str) -> Result<(), RegistrarError>;

    /// (Re-)register `username` and return a one-time enrollment secret.
    async fn register_user(
        &self,
        username: &str,
        msp_id: &str,
        role: &str,
    ) -> Result<String, RegistrarError>;

    /// Exchange the enrollment secret for a new certificate and key.
    async fn enroll_user(
        &self,
        username: &str,
        secret: &str,
        msp_id: &str,
    ) -> Result<Enrollment, RegistrarError>;
}
