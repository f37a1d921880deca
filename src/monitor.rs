// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Certificate Monitor
//!
//! Read-side reporting over the wallet store: which certificates expire
//! soon, which already expired, and severity-tiered alerting.
//!
//! ## Alert tiers
//!
//! | Tier | Condition | Level |
//! |------|-----------|-------|
//! | notice | expires within 30 days | `info` |
//! | critical | expires within 7 days | `warn` |
//! | expired | `notAfter` in the past | `error` |
//!
//! A wallet is alerted once per tier. `certificate_notified_at` records the
//! last alert; the wallet alerts again only after crossing into a more
//! severe tier than the one in force at that moment. Storing a new
//! certificate clears the timestamp.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::certificate::{self, CertificateParseError};
use crate::error::{LifecycleError, LifecycleResult};
use crate::storage::{WalletStore, WalletSummary, WalletType};

pub const NOTICE_THRESHOLD_DAYS: i64 = 30;
pub const CRITICAL_THRESHOLD_DAYS: i64 = 7;

const SECONDS_PER_DAY: i64 = 86_400;

/// A wallet whose certificate is expiring or expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiringCertificate {
    pub label: String,
    pub msp_id: String,
    pub wallet_type: WalletType,
    pub expires_at: DateTime<Utc>,
    /// `floor((expires_at - now) / 1 day)`, negative once expired.
    pub days_remaining: i64,
}

/// Outcome of [`CertificateMonitor::run_daily_check`].
#[derive(Debug, Clone, Serialize)]
pub struct DailyCheckReport {
    pub checked_at: DateTime<Utc>,
    pub expiring_30_days: Vec<ExpiringCertificate>,
    pub expiring_7_days: Vec<ExpiringCertificate>,
    pub expired: Vec<ExpiringCertificate>,
    /// Alerts actually emitted after deduplication.
    pub alerts_emitted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum AlertTier {
    Notice,
    Critical,
    Expired,
}

impl AlertTier {
    fn at(expires_at: DateTime<Utc>, at: DateTime<Utc>) -> Option<Self> {
        if expires_at < at {
            Some(AlertTier::Expired)
        } else if expires_within(expires_at, at, CRITICAL_THRESHOLD_DAYS) {
            Some(AlertTier::Critical)
        } else if expires_within(expires_at, at, NOTICE_THRESHOLD_DAYS) {
            Some(AlertTier::Notice)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct CertificateMonitor {
    store: WalletStore,
}

impl CertificateMonitor {
    pub fn new(store: WalletStore) -> Self {
        Self { store }
    }

    /// `notAfter` of a PEM certificate.
    pub fn extract_expiry(certificate_pem: &str) -> Result<DateTime<Utc>, CertificateParseError> {
        certificate::extract_expiry(certificate_pem)
    }

    /// Non-revoked wallets with `now < expiry <= now + threshold_days`,
    /// soonest first.
    pub fn get_expiring(&self, threshold_days: i64) -> LifecycleResult<Vec<ExpiringCertificate>> {
        self.get_expiring_as_of(threshold_days, Utc::now())
    }

    pub fn get_expiring_as_of(
        &self,
        threshold_days: i64,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Vec<ExpiringCertificate>> {
        expiring_within(&self.store.list()?, threshold_days, now)
    }

    /// Non-revoked wallets whose certificate is already past `notAfter`.
    pub fn get_expired(&self) -> LifecycleResult<Vec<ExpiringCertificate>> {
        self.get_expired_as_of(Utc::now())
    }

    pub fn get_expired_as_of(
        &self,
        now: DateTime<Utc>,
    ) -> LifecycleResult<Vec<ExpiringCertificate>> {
        Ok(expired_before(&self.store.list()?, now))
    }

    /// Compute the 30-day, 7-day and expired sets and emit alerts.
    ///
    /// The only write is the alert bookkeeping on `certificate_notified_at`.
    pub fn run_daily_check(&self) -> LifecycleResult<DailyCheckReport> {
        self.run_daily_check_as_of(Utc::now())
    }

    pub fn run_daily_check_as_of(&self, now: DateTime<Utc>) -> LifecycleResult<DailyCheckReport> {
        let wallets = self.store.list()?;

        let expiring_30_days = expiring_within(&wallets, NOTICE_THRESHOLD_DAYS, now)?;
        let critical_horizon = expiry_horizon(now, CRITICAL_THRESHOLD_DAYS)?;
        let expiring_7_days: Vec<_> = expiring_30_days
            .iter()
            .filter(|c| c.expires_at <= critical_horizon)
            .cloned()
            .collect();
        let expired = expired_before(&wallets, now);

        let mut alerts_emitted = 0;
        for wallet in &wallets {
            if wallet.revoked {
                continue;
            }
            let Some(tier) = AlertTier::at(wallet.certificate_expires_at, now) else {
                continue;
            };
            if !should_alert(wallet, tier) {
                continue;
            }

            let days_remaining = days_between(now, wallet.certificate_expires_at);
            match tier {
                AlertTier::Expired => tracing::error!(
                    label = %wallet.label,
                    msp_id = %wallet.msp_id,
                    expired_at = %wallet.certificate_expires_at,
                    "Certificate expired"
                ),
                AlertTier::Critical => tracing::warn!(
                    label = %wallet.label,
                    msp_id = %wallet.msp_id,
                    days_remaining,
                    "Certificate expires within 7 days"
                ),
                AlertTier::Notice => tracing::info!(
                    label = %wallet.label,
                    msp_id = %wallet.msp_id,
                    days_remaining,
                    "Certificate expires within 30 days"
                ),
            }
            alerts_emitted += 1;

            // Bookkeeping failure must not hide the rest of the report.
            match self
                .store
                .mark_notified(&wallet.label, wallet.certificate_expires_at, now)
            {
                Ok(true) => {}
                Ok(false) => tracing::debug!(
                    label = %wallet.label,
                    "Certificate replaced during check; alert not recorded"
                ),
                Err(e) => {
                    tracing::warn!(label = %wallet.label, error = %e, "Failed to record alert")
                }
            }
        }

        tracing::info!(
            expiring_30_days = expiring_30_days.len(),
            expiring_7_days = expiring_7_days.len(),
            expired = expired.len(),
            alerts_emitted,
            "Daily certificate check complete"
        );

        Ok(DailyCheckReport {
            checked_at: now,
            expiring_30_days,
            expiring_7_days,
            expired,
            alerts_emitted,
        })
    }
}

/// `now + days`, or [`LifecycleError::InvalidThreshold`] when that instant
/// is not representable.
pub fn expiry_horizon(now: DateTime<Utc>, days: i64) -> LifecycleResult<DateTime<Utc>> {
    Duration::try_days(days)
        .and_then(|span| now.checked_add_signed(span))
        .ok_or(LifecycleError::InvalidThreshold(days))
}

/// An unrepresentable horizon lies past every certificate.
fn expires_within(expires_at: DateTime<Utc>, at: DateTime<Utc>, days: i64) -> bool {
    expiry_horizon(at, days).map_or(true, |limit| expires_at <= limit)
}

fn should_alert(wallet: &WalletSummary, tier: AlertTier) -> bool {
    match wallet.certificate_notified_at {
        None => true,
        Some(notified_at) => match AlertTier::at(wallet.certificate_expires_at, notified_at) {
            Some(previous) => tier > previous,
            None => true,
        },
    }
}

fn days_between(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> i64 {
    (expires_at - now).num_seconds().div_euclid(SECONDS_PER_DAY)
}

fn to_report(wallet: &WalletSummary, now: DateTime<Utc>) -> ExpiringCertificate {
    ExpiringCertificate {
        label: wallet.label.clone(),
        msp_id: wallet.msp_id.clone(),
        wallet_type: wallet.wallet_type,
        expires_at: wallet.certificate_expires_at,
        days_remaining: days_between(now, wallet.certificate_expires_at),
    }
}

fn sort_by_expiry(certs: &mut [ExpiringCertificate]) {
    certs.sort_by(|a, b| {
        a.expires_at
            .cmp(&b.expires_at)
            .then_with(|| a.label.cmp(&b.label))
    });
}

fn expiring_within(
    wallets: &[WalletSummary],
    threshold_days: i64,
    now: DateTime<Utc>,
) -> LifecycleResult<Vec<ExpiringCertificate>> {
    let horizon = expiry_horizon(now, threshold_days)?;
    let mut certs: Vec<_> = wallets
        .iter()
        .filter(|w| !w.revoked)
        .filter(|w| now < w.certificate_expires_at && w.certificate_expires_at <= horizon)
        .map(|w| to_report(w, now))
        .collect();
    sort_by_expiry(&mut certs);
    Ok(certs)
}

fn expired_before(wallets: &[WalletSummary], now: DateTime<Utc>) -> Vec<ExpiringCertificate> {
    let mut certs: Vec<_> = wallets
        .iter()
        .filter(|w| !w.revoked && w.certificate_expires_at < now)
        .map(|w| to_report(w, now))
        .collect();
    sort_by_expiry(&mut certs);
    certs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::test_support::{mint_certificate, whole_seconds};
    use crate::storage::wallet_store::test_support::test_store;

    fn put(store: &WalletStore, label: &str, expires_at: DateTime<Utc>, serial: u64) {
        let identity = mint_certificate(label, expires_at, serial);
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

    #[test]
    fn alice_expiring_in_five_days() {
        let (_dir, store) = test_store();
        let now = whole_seconds(Utc::now());
        put(&store, "alice@org1", now + Duration::days(5), 1);
        let monitor = CertificateMonitor::new(store);

        let week = monitor.get_expiring_as_of(7, now).unwrap();
        assert_eq!(week.len(), 1);
        assert_eq!(week[0].label, "alice@org1");
        assert_eq!(week[0].days_remaining, 5);

        assert_eq!(monitor.get_expiring_as_of(30, now).unwrap().len(), 1);
        assert!(monitor.get_expired_as_of(now).unwrap().is_empty());
    }

    #[test]
    fn filtering_respects_threshold_and_order() {
        let (_dir, store) = test_store();
        let now = whole_seconds(Utc::now());
        put(&store, "late@org1", now + Duration::days(30), 1);
        put(&store, "soon@org1", now + Duration::hours(12), 2);
        put(&store, "far@org1", now + Duration::days(31), 3);
        put(&store, "gone@org1", now - Duration::days(2), 4);
        let monitor = CertificateMonitor::new(store);

        let labels: Vec<_> = monitor
            .get_expiring_as_of(30, now)
            .unwrap()
            .into_iter()
            .map(|c| (c.label, c.days_remaining))
            .collect();
        assert_eq!(
            labels,
            vec![("soon@org1".to_string(), 0), ("late@org1".to_string(), 30)]
        );

        let expired = monitor.get_expired_as_of(now).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].label, "gone@org1");
        assert_eq!(expired[0].days_remaining, -2);
    }

    #[test]
    fn revoked_wallets_are_never_reported() {
        let (_dir, store) = test_store();
        let now = whole_seconds(Utc::now());
        put(&store, "bob@org1", now + Duration::days(3), 1);
        put(&store, "carol@org1", now - Duration::days(3), 2);
        store.revoke("bob@org1", "key compromise").unwrap();
        store.revoke("carol@org1", "key compromise").unwrap();
        let monitor = CertificateMonitor::new(store);

        assert!(monitor.get_expiring_as_of(30, now).unwrap().is_empty());
        assert!(monitor.get_expired_as_of(now).unwrap().is_empty());

        let report = monitor.run_daily_check_as_of(now).unwrap();
        assert_eq!(report.alerts_emitted, 0);
    }

    #[test]
    fn daily_check_tolerates_empty_store() {
        let (_dir, store) = test_store();
        let report = CertificateMonitor::new(store).run_daily_check().unwrap();
        assert!(report.expiring_30_days.is_empty());
        assert!(report.expiring_7_days.is_empty());
        assert!(report.expired.is_empty());
        assert_eq!(report.alerts_emitted, 0);
    }

    #[test]
    fn daily_check_splits_tiers() {
        let (_dir, store) = test_store();
        let now = whole_seconds(Utc::now());
        put(&store, "a@org1", now + Duration::days(20), 1);
        put(&store, "b@org1", now + Duration::days(6), 2);
        put(&store, "c@org1", now - Duration::days(1), 3);
        let monitor = CertificateMonitor::new(store);

        let report = monitor.run_daily_check_as_of(now).unwrap();
        assert_eq!(report.expiring_30_days.len(), 2);
        assert_eq!(report.expiring_7_days.len(), 1);
        assert_eq!(report.expiring_7_days[0].label, "b@org1");
        assert_eq!(report.expired.len(), 1);
        assert_eq!(report.alerts_emitted, 3);
    }

    #[test]
    fn alerts_once_per_tier() {
        let (_dir, store) = test_store();
        let now = whole_seconds(Utc::now());
        put(&store, "dave@org1", now + Duration::days(5), 1);
        let monitor = CertificateMonitor::new(store.clone());

        assert_eq!(monitor.run_daily_check_as_of(now).unwrap().alerts_emitted, 1);
        assert_eq!(
            store.summary("dave@org1").unwrap().unwrap().certificate_notified_at,
            Some(now)
        );

        // Same tier the next day: silent.
        let tomorrow = now + Duration::days(1);
        assert_eq!(
            monitor.run_daily_check_as_of(tomorrow).unwrap().alerts_emitted,
            0
        );

        // Crossing into expired alerts again.
        let after_expiry = now + Duration::days(6);
        let report = monitor.run_daily_check_as_of(after_expiry).unwrap();
        assert_eq!(report.expired.len(), 1);
        assert_eq!(report.alerts_emitted, 1);
    }

    #[test]
    fn notice_escalates_to_critical() {
        let (_dir, store) = test_store();
        let now = whole_seconds(Utc::now());
        put(&store, "erin@org1", now + Duration::days(5), 1);
        // Last alert went out while 25 days remained.
        let expires_at = store
            .summary("erin@org1")
            .unwrap()
            .unwrap()
            .certificate_expires_at;
        assert!(store
            .mark_notified("erin@org1", expires_at, now - Duration::days(20))
            .unwrap());
        let monitor = CertificateMonitor::new(store);

        assert_eq!(monitor.run_daily_check_as_of(now).unwrap().alerts_emitted, 1);
    }

    #[test]
    fn renewed_certificate_alerts_afresh() {
        let (_dir, store) = test_store();
        let now = whole_seconds(Utc::now());
        put(&store, "frank@org1", now + Duration::days(5), 1);
        let monitor = CertificateMonitor::new(store.clone());
        assert_eq!(monitor.run_daily_check_as_of(now).unwrap().alerts_emitted, 1);

        put(&store, "frank@org1", now + Duration::days(25), 2);
        assert!(store
            .summary("frank@org1")
            .unwrap()
            .unwrap()
            .certificate_notified_at
            .is_none());
        assert_eq!(monitor.run_daily_check_as_of(now).unwrap().alerts_emitted, 1);
    }

    #[test]
    fn unrepresentable_threshold_is_an_error() {
        let (_dir, store) = test_store();
        let now = whole_seconds(Utc::now());
        put(&store, "gina@org1", now + Duration::days(5), 1);
        let monitor = CertificateMonitor::new(store);

        assert!(matches!(
            monitor.get_expiring_as_of(i64::MAX / 1000, now),
            Err(LifecycleError::InvalidThreshold(_))
        ));
        assert!(matches!(
            monitor.get_expiring(i64::MIN),
            Err(LifecycleError::InvalidThreshold(_))
        ));
        assert!(monitor.get_expiring_as_of(-1, now).unwrap().is_empty());
        assert_eq!(monitor.get_expiring_as_of(3_650, now).unwrap().len(), 1);
    }

    #[test]
    fn replaced_certificate_is_not_stamped_with_stale_alert() {
        let (_dir, store) = test_store();
        let now = whole_seconds(Utc::now());
        put(&store, "hank@org1", now + Duration::days(5), 1);
        let alerted_expiry = store
            .summary("hank@org1")
            .unwrap()
            .unwrap()
            .certificate_expires_at;

        // A renewal lands between listing and recording the alert.
        put(&store, "hank@org1", now + Duration::days(25), 2);
        assert!(!store
            .mark_notified("hank@org1", alerted_expiry, now)
            .unwrap());
        assert!(store
            .summary("hank@org1")
            .unwrap()
            .unwrap()
            .certificate_notified_at
            .is_none());

        let monitor = CertificateMonitor::new(store);
        assert_eq!(monitor.run_daily_check_as_of(now).unwrap().alerts_emitted, 1);
    }

    #[test]
    fn extract_expiry_rejects_garbage() {
        assert!(CertificateMonitor::extract_expiry("not a certificate").is_err());
    }
}
