// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Lifecycle Scheduler
//!
//! Background task driving the periodic lifecycle work.
//!
//! ## Strategy
//!
//! Every `interval` (default 24 h) the scheduler:
//! 1. Runs the daily certificate check (alerts only).
//! 2. If any non-revoked certificate expires within the renewal threshold,
//!    runs the renewal batch. Without a CA registrar the scheduler only
//!    reports.
//! 3. Rotates the session signing key when it is older than the rotation
//!    interval, then purges inactive keys past their expiry.
//!
//! A step that fails is logged and the remaining steps still run.
//!
//! ## Reentrancy
//!
//! [`LifecycleScheduler::run_once`] never overlaps itself. A trigger that
//! arrives while a run is in flight is skipped.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`. Cancellation is observed
//! between runs; an in-flight run completes first.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::monitor::{CertificateMonitor, DailyCheckReport};
use crate::renewal::{BatchRenewalSummary, CertificateRenewal};
use crate::session::SessionKeyManager;

/// What a single scheduler run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LifecycleRunReport {
    pub daily_check: Option<DailyCheckReport>,
    pub renewal: Option<BatchRenewalSummary>,
    pub rotated_key: Option<String>,
    pub purged_keys: Vec<String>,
}

#[derive(Clone)]
pub struct LifecycleScheduler {
    monitor: CertificateMonitor,
    renewal: Option<CertificateRenewal>,
    session_keys: SessionKeyManager,
    threshold_days: i64,
    rotation_interval: chrono::Duration,
    interval: Duration,
    running: Arc<tokio::sync::Mutex<()>>,
}

impl LifecycleScheduler {
    pub fn new(
        monitor: CertificateMonitor,
        session_keys: SessionKeyManager,
        threshold_days: i64,
        rotation_interval: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            monitor,
            renewal: None,
            session_keys,
            threshold_days,
            rotation_interval,
            interval,
            running: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Enable automatic renewal through `renewal`.
    pub fn with_renewal(mut self, renewal: CertificateRenewal) -> Self {
        self.renewal = Some(renewal);
        self
    }

    /// Run the scheduler loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(scheduler.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            threshold_days = self.threshold_days,
            auto_renew = self.renewal.is_some(),
            "Lifecycle scheduler starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Lifecycle scheduler shutting down");
                return;
            }

            self.run_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Lifecycle scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// One full lifecycle pass. `None` if another pass is still running.
    pub async fn run_once(&self) -> Option<LifecycleRunReport> {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Lifecycle run already in progress; skipping trigger");
            return None;
        };

        let mut report = LifecycleRunReport::default();

        match self.monitor.run_daily_check() {
            Ok(check) => report.daily_check = Some(check),
            Err(e) => error!(error = %e, "Daily certificate check failed"),
        }

        match self.monitor.get_expiring(self.threshold_days) {
            Ok(expiring) if expiring.is_empty() => {}
            Ok(expiring) => match &self.renewal {
                Some(renewal) => match renewal
                    .auto_renew_expiring_certificates(self.threshold_days)
                    .await
                {
                    Ok(summary) => report.renewal = Some(summary),
                    Err(e) => error!(error = %e, "Certificate renewal batch failed to run"),
                },
                None => warn!(
                    count = expiring.len(),
                    "Certificates need renewal but no CA registrar is configured"
                ),
            },
            Err(e) => error!(error = %e, "Expiring certificate query failed"),
        }

        match self.session_keys.rotate_if_due(self.rotation_interval) {
            Ok(rotated) => report.rotated_key = rotated,
            Err(e) => error!(error = %e, "Session key rotation failed"),
        }

        match self.session_keys.purge_expired_keys() {
            Ok(purged) => report.purged_keys = purged,
            Err(e) => error!(error = %e, "Session key purge failed"),
        }

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::certificate::test_support::mint_certificate;
    use crate::config::{RenewalConfig, SessionKeyConfig};
    use crate::renewal::registrar::test_support::FakeRegistrar;
    use crate::storage::wallet_store::test_support::test_store;
    use crate::storage::{WalletStore, WalletType};

    fn scheduler(store: &WalletStore, registrar: Arc<FakeRegistrar>) -> LifecycleScheduler {
        let monitor = CertificateMonitor::new(store.clone());
        let renewal = CertificateRenewal::new(
            store.clone(),
            monitor.clone(),
            registrar,
            RenewalConfig {
                threshold_days: 30,
                pacing_delay: Duration::ZERO,
                ca_timeout: Duration::from_secs(5),
            },
        );
        let session_keys = SessionKeyManager::new(
            store.database().clone(),
            crate::crypto::MasterKey::generate().unwrap(),
            SessionKeyConfig::default(),
        );
        LifecycleScheduler::new(
            monitor,
            session_keys,
            30,
            chrono::Duration::days(30),
            Duration::from_millis(20),
        )
        .with_renewal(renewal)
    }

    fn put(store: &WalletStore, label: &str, days: i64, serial: u64) {
        let identity =
            mint_certificate(label, Utc::now() + chrono::Duration::days(days), serial);
        store
            .put(
                label,
                &identity.certificate_pem,
                &identity.private_key_pem,
                "Org1MSP",
                WalletType::User,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn run_once_checks_renews_and_rotates() {
        let (_dir, store) = test_store();
        put(&store, "alice@org1", 5, 1);
        put(&store, "bob@org1", 120, 2);

        let registrar = Arc::new(FakeRegistrar::new());
        let scheduler = scheduler(&store, registrar.clone());

        let report = scheduler.run_once().await.unwrap();
        let check = report.daily_check.unwrap();
        assert_eq!(check.expiring_7_days.len(), 1);

        let renewal = report.renewal.unwrap();
        assert_eq!((renewal.total, renewal.renewed), (1, 1));

        // No key existed yet, so the first pass bootstraps one.
        assert!(report.rotated_key.is_some());
        assert!(report.purged_keys.is_empty());

        let second = scheduler.run_once().await.unwrap();
        assert!(second.renewal.is_none());
        assert!(second.rotated_key.is_none());
        assert_eq!(registrar.call_count(), 3);
    }

    #[tokio::test]
    async fn without_registrar_only_reports() {
        let (_dir, store) = test_store();
        put(&store, "alice@org1", 5, 1);

        let monitor = CertificateMonitor::new(store.clone());
        let session_keys = SessionKeyManager::new(
            store.database().clone(),
            crate::crypto::MasterKey::generate().unwrap(),
            SessionKeyConfig::default(),
        );
        let scheduler = LifecycleScheduler::new(
            monitor,
            session_keys,
            30,
            chrono::Duration::days(30),
            Duration::from_secs(60),
        );

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.daily_check.unwrap().expiring_7_days.len(), 1);
        assert!(report.renewal.is_none());
    }

    #[tokio::test]
    async fn overlapping_runs_are_skipped() {
        let (_dir, store) = test_store();
        let scheduler = scheduler(&store, Arc::new(FakeRegistrar::new()));

        let _held = scheduler.running.try_lock().unwrap();
        assert!(scheduler.run_once().await.is_none());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let (_dir, store) = test_store();
        let scheduler = scheduler(&store, Arc::new(FakeRegistrar::new()));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(scheduler.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler must stop")
            .unwrap();
    }
}
