// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Certificate Renewal
//!
//! Re-enrollment of expiring identities through the CA registrar.
//!
//! ## Wallet states
//!
//! ```text
//! VALID -> EXPIRING_SOON -> CRITICAL -> EXPIRED
//!   \__________\_______________\_________\__-> REVOKED (absorbing)
//! ```
//!
//! A successful renewal returns the wallet to `VALID` under the same label.
//! Revoked wallets never reach the CA.
//!
//! ## Failure handling
//!
//! Renewal failures are data: [`CertificateRenewal::renew_certificate`]
//! always returns a [`RenewalResult`]. A batch only returns `Err` when it
//! cannot start (another batch running, monitor query failed).
//!
//! ## Concurrency
//!
//! - One renewal per label at a time ([`LabelLocks`])
//! - One batch at a time; a second caller gets
//!   [`LifecycleError::BatchInProgress`]
//! - Batches are sequential with a fixed pacing delay between items
//! - A batch item whose certificate was renewed since the batch started is
//!   skipped
//! - Every registrar call carries its own timeout

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::certificate;
use crate::config::RenewalConfig;
use crate::error::{LifecycleError, LifecycleResult};
use crate::monitor::{self, CertificateMonitor};
use crate::storage::{WalletStore, WalletSummary};

pub mod label;
pub mod locks;
pub mod registrar;

pub use label::WalletLabel;
pub use locks::{LabelLease, LabelLocks};
pub use registrar::{CaRegistrar, Enrollment, RegistrarError, RegistrarStage};

/// Why a single renewal did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RenewalFailure {
    #[error("invalid wallet label: {0}")]
    InvalidLabel(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("wallet is revoked: {0}")]
    Revoked(String),

    #[error("{stage} failed: {message}")]
    Registrar {
        stage: RegistrarStage,
        message: String,
    },

    #[error("{stage} timed out after {timeout_ms} ms")]
    Timeout {
        stage: RegistrarStage,
        timeout_ms: u64,
    },

    #[error("enrolled certificate is invalid: {0}")]
    InvalidCertificate(String),

    #[error("failed to store renewed identity: {0}")]
    Storage(String),
}

impl From<LifecycleError> for RenewalFailure {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidLabel(label) => RenewalFailure::InvalidLabel(label),
            LifecycleError::WalletNotFound(label) => RenewalFailure::WalletNotFound(label),
            LifecycleError::RevokedCertificate(label) => RenewalFailure::Revoked(label),
            LifecycleError::CertificateParse(e) => {
                RenewalFailure::InvalidCertificate(e.to_string())
            }
            LifecycleError::InvalidPrivateKey(e) => RenewalFailure::InvalidCertificate(e),
            other => RenewalFailure::Storage(other.to_string()),
        }
    }
}

/// Outcome of one renewal attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RenewalResult {
    pub success: bool,
    pub label: String,
    pub old_expiry: Option<DateTime<Utc>>,
    pub new_expiry: Option<DateTime<Utc>>,
    /// `new_expiry - old_expiry` in whole days.
    pub extension_days: Option<i64>,
    pub serial: Option<String>,
    pub error: Option<RenewalFailure>,
}

impl RenewalResult {
    fn failed(label: &str, old_expiry: Option<DateTime<Utc>>, error: RenewalFailure) -> Self {
        Self {
            success: false,
            label: label.to_string(),
            old_expiry,
            new_expiry: None,
            extension_days: None,
            serial: None,
            error: Some(error),
        }
    }
}

/// Aggregate outcome of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRenewalSummary {
    pub total: usize,
    pub renewed: usize,
    pub failed: usize,
    /// Already renewed by someone else once its turn came.
    pub skipped: usize,
    pub results: Vec<RenewalResult>,
}

#[derive(Clone)]
pub struct CertificateRenewal {
    store: WalletStore,
    monitor: CertificateMonitor,
    registrar: Arc<dyn CaRegistrar>,
    locks: LabelLocks,
    batch_guard: Arc<tokio::sync::Mutex<()>>,
    config: RenewalConfig,
}

impl CertificateRenewal {
    pub fn new(
        store: WalletStore,
        monitor: CertificateMonitor,
        registrar: Arc<dyn CaRegistrar>,
        config: RenewalConfig,
    ) -> Self {
        Self {
            store,
            monitor,
            registrar,
            locks: LabelLocks::new(),
            batch_guard: Arc::new(tokio::sync::Mutex::new(())),
            config,
        }
    }

    pub fn config(&self) -> &RenewalConfig {
        &self.config
    }

    /// Re-enroll the identity stored under `label`.
    pub async fn renew_certificate(&self, label: &str) -> RenewalResult {
        let parsed = match WalletLabel::parse(label) {
            Ok(parsed) => parsed,
            Err(e) => return RenewalResult::failed(label, None, e.into()),
        };

        let _lease = self.locks.acquire(label).await;
        match self.load(label) {
            Ok(wallet) => self.renew_locked(label, &parsed, wallet).await,
            Err(failure) => RenewalResult::failed(label, None, failure),
        }
    }

    /// Batch step. `None` when the stored certificate no longer expires by
    /// `horizon`, i.e. it was renewed after the batch listed it.
    async fn renew_if_still_due(
        &self,
        label: &str,
        horizon: DateTime<Utc>,
    ) -> Option<RenewalResult> {
        let parsed = match WalletLabel::parse(label) {
            Ok(parsed) => parsed,
            Err(e) => return Some(RenewalResult::failed(label, None, e.into())),
        };

        let _lease = self.locks.acquire(label).await;
        let wallet = match self.load(label) {
            Ok(wallet) => wallet,
            Err(failure) => return Some(RenewalResult::failed(label, None, failure)),
        };

        if !wallet.revoked && wallet.certificate_expires_at > horizon {
            tracing::info!(
                label = %label,
                expires_at = %wallet.certificate_expires_at,
                "Certificate renewed since the batch started; skipping"
            );
            return None;
        }
        Some(self.renew_locked(label, &parsed, wallet).await)
    }

    fn load(&self, label: &str) -> Result<WalletSummary, RenewalFailure> {
        match self.store.summary(label) {
            Ok(Some(wallet)) => Ok(wallet),
            Ok(None) => Err(RenewalFailure::WalletNotFound(label.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Caller holds the lease for `label`.
    async fn renew_locked(
        &self,
        label: &str,
        parsed: &WalletLabel,
        wallet: WalletSummary,
    ) -> RenewalResult {
        let old_expiry = wallet.certificate_expires_at;

        if wallet.revoked {
            tracing::warn!(label = %label, "Skipping renewal of revoked wallet");
            return RenewalResult::failed(
                label,
                Some(old_expiry),
                RenewalFailure::Revoked(label.to_string()),
            );
        }

        let msp_id = wallet.msp_id.as_str();
        let role = wallet.wallet_type.registrar_role();

        tracing::info!(
            label = %label,
            msp_id = %msp_id,
            old_expiry = %old_expiry,
            "Renewing certificate"
        );

        let enrollment = match self.enroll(&parsed.username, msp_id, role).await {
            Ok(enrollment) => enrollment,
            Err(failure) => return RenewalResult::failed(label, Some(old_expiry), failure),
        };

        let new_expiry = match certificate::extract_expiry(&enrollment.certificate_pem) {
            Ok(expiry) => expiry,
            Err(e) => {
                let failure: RenewalFailure = LifecycleError::from(e).into();
                return RenewalResult::failed(label, Some(old_expiry), failure);
            }
        };

        // `put` refuses revoked rows, which covers a revoke racing the CA calls.
        if let Err(e) = self.store.put(
            label,
            &enrollment.certificate_pem,
            &enrollment.private_key_pem,
            msp_id,
            wallet.wallet_type,
        ) {
            return RenewalResult::failed(label, Some(old_expiry), e.into());
        }

        let extension_days = (new_expiry - old_expiry).num_days();
        tracing::info!(
            label = %label,
            serial = %enrollment.serial,
            new_expiry = %new_expiry,
            extension_days,
            "Certificate renewed"
        );

        RenewalResult {
            success: true,
            label: label.to_string(),
            old_expiry: Some(old_expiry),
            new_expiry: Some(new_expiry),
            extension_days: Some(extension_days),
            serial: Some(enrollment.serial),
            error: None,
        }
    }

    /// Renew every non-revoked wallet expiring within `threshold_days`,
    /// one at a time, soonest first.
    pub async fn auto_renew_expiring_certificates(
        &self,
        threshold_days: i64,
    ) -> LifecycleResult<BatchRenewalSummary> {
        let _batch = self
            .batch_guard
            .try_lock()
            .map_err(|_| LifecycleError::BatchInProgress)?;

        let now = Utc::now();
        let horizon = monitor::expiry_horizon(now, threshold_days)?;
        let expiring = self.monitor.get_expiring_as_of(threshold_days, now)?;
        tracing::info!(
            count = expiring.len(),
            threshold_days,
            "Starting certificate renewal batch"
        );

        let mut results = Vec::with_capacity(expiring.len());
        let mut skipped = 0;
        for (index, cert) in expiring.iter().enumerate() {
            if index > 0 && !self.config.pacing_delay.is_zero() {
                tokio::time::sleep(self.config.pacing_delay).await;
            }

            let Some(result) = self.renew_if_still_due(&cert.label, horizon).await else {
                skipped += 1;
                continue;
            };
            if let Some(error) = &result.error {
                tracing::error!(
                    label = %cert.label,
                    days_remaining = cert.days_remaining,
                    error = %error,
                    "Certificate renewal failed"
                );
            }
            results.push(result);
        }

        let renewed = results.iter().filter(|r| r.success).count();
        let summary = BatchRenewalSummary {
            total: expiring.len(),
            renewed,
            failed: results.len() - renewed,
            skipped,
            results,
        };

        tracing::info!(
            total = summary.total,
            renewed = summary.renewed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Certificate renewal batch complete"
        );
        Ok(summary)
    }

    async fn enroll(
        &self,
        username: &str,
        msp_id: &str,
        role: &str,
    ) -> Result<Enrollment, RenewalFailure> {
        self.call(
            RegistrarStage::EnsureAdminEnrolled,
            self.registrar.ensure_admin_enrolled(msp_id),
        )
        .await?;

        let secret = self
            .call(
                RegistrarStage::RegisterUser,
                self.registrar.register_user(username, msp_id, role),
            )
            .await?;

        self.call(
            RegistrarStage::EnrollUser,
            self.registrar.enroll_user(username, &secret, msp_id),
        )
        .await
    }

    async fn call<T>(
        &self,
        stage: RegistrarStage,
        fut: impl Future<Output = Result<T, RegistrarError>>,
    ) -> Result<T, RenewalFailure> {
        match tokio::time::timeout(self.config.ca_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RenewalFailure::Registrar {
                stage,
                message: e.to_string(),
            }),
            Err(_) => Err(RenewalFailure::Timeout {
                stage,
                timeout_ms: duration_millis(self.config.ca_timeout),
            }),
        }
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
