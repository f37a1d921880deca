// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the service. Configuration is loaded from the environment
//! at startup via [`LifecycleConfig::from_env`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the identity database | `/data` |
//! | `HOST` | Probe server bind address | `0.0.0.0` |
//! | `PORT` | Probe server bind port | `8080` |
//! | `VAULT_ADDR` | Secret backend base URL | unset (environment-only mode) |
//! | `VAULT_TOKEN` | Secret backend access token | unset |
//! | `VAULT_MOUNT` | KV v2 mount name | `secret` |
//! | `MASTER_KEY_PATH` | Reserved secret path of the master key | `wallet/master-key` |
//! | `WALLET_MASTER_KEY` | Fallback master key (base64, 32 bytes) | unset |
//! | `MASTER_KEY_AUTO_PROVISION` | Generate the master key when absent | `false` |
//! | `RENEWAL_THRESHOLD_DAYS` | Auto-renew certificates expiring within | `30` |
//! | `RENEWAL_PACING_MS` | Delay between renewals in a batch | `2000` |
//! | `CA_TIMEOUT_SECS` | Timeout per CA registrar call | `30` |
//! | `LIFECYCLE_CHECK_INTERVAL_SECS` | Scheduler cadence | `86400` |
//! | `SESSION_KEY_LIFETIME_DAYS` | Validity of a session signing key | `90` |
//! | `SESSION_KEY_ROTATION_DAYS` | Age at which the active key rotates | `30` |
//! | `SESSION_TOKEN_ISSUER` | `iss` claim of session tokens | `ledger-identity-lifecycle` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "/data";

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";
pub const VAULT_MOUNT_ENV: &str = "VAULT_MOUNT";

/// Reserved secret path holding the master encryption key.
pub const MASTER_KEY_PATH_ENV: &str = "MASTER_KEY_PATH";
pub const DEFAULT_MASTER_KEY_PATH: &str = "wallet/master-key";

/// Environment-sourced master key used when the secret backend is unhealthy.
///
/// This keeps the key in plaintext in the process environment. The fallback
/// is always logged as a warning.
pub const MASTER_KEY_ENV: &str = "WALLET_MASTER_KEY";
pub const MASTER_KEY_AUTO_PROVISION_ENV: &str = "MASTER_KEY_AUTO_PROVISION";

pub const RENEWAL_THRESHOLD_DAYS_ENV: &str = "RENEWAL_THRESHOLD_DAYS";
pub const RENEWAL_PACING_MS_ENV: &str = "RENEWAL_PACING_MS";
pub const CA_TIMEOUT_SECS_ENV: &str = "CA_TIMEOUT_SECS";
pub const CHECK_INTERVAL_SECS_ENV: &str = "LIFECYCLE_CHECK_INTERVAL_SECS";

pub const SESSION_KEY_LIFETIME_DAYS_ENV: &str = "SESSION_KEY_LIFETIME_DAYS";
pub const SESSION_KEY_ROTATION_DAYS_ENV: &str = "SESSION_KEY_ROTATION_DAYS";
pub const SESSION_TOKEN_ISSUER_ENV: &str = "SESSION_TOKEN_ISSUER";

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Largest accepted value of any day-count setting.
pub const MAX_DAYS_SETTING: i64 = 3_650;

/// Full runtime configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub secrets: SecretsConfig,
    pub renewal: RenewalConfig,
    pub session: SessionKeyConfig,
    /// Cadence of the lifecycle scheduler.
    pub check_interval: Duration,
}

/// Secret backend connection settings.
#[derive(Debug, Clone)]
pub struct SecretsConfig {
    /// Base URL of the networked backend. `None` means environment-only.
    pub vault_addr: Option<String>,
    pub vault_token: Option<String>,
    pub vault_mount: String,
    pub master_key_path: String,
    pub auto_provision_master_key: bool,
}

/// Certificate renewal settings.
#[derive(Debug, Clone)]
pub struct RenewalConfig {
    pub threshold_days: i64,
    /// Fixed delay between consecutive renewals in a batch.
    pub pacing_delay: Duration,
    /// Timeout applied to each individual CA registrar call.
    pub ca_timeout: Duration,
}

/// Session signing key settings.
#[derive(Debug, Clone)]
pub struct SessionKeyConfig {
    pub issuer: String,
    pub key_lifetime: chrono::Duration,
    pub rotation_interval: chrono::Duration,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            vault_addr: None,
            vault_token: None,
            vault_mount: "secret".to_string(),
            master_key_path: DEFAULT_MASTER_KEY_PATH.to_string(),
            auto_provision_master_key: false,
        }
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            threshold_days: 30,
            pacing_delay: Duration::from_millis(2000),
            ca_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for SessionKeyConfig {
    fn default() -> Self {
        Self {
            issuer: "ledger-identity-lifecycle".to_string(),
            key_lifetime: chrono::Duration::days(90),
            rotation_interval: chrono::Duration::days(30),
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from the process environment.
    ///
    /// Missing or unparseable values fall back to their defaults. Day counts
    /// outside `1..=MAX_DAYS_SETTING` are rejected with a warning.
    pub fn from_env() -> Self {
        let renewal_defaults = RenewalConfig::default();
        let session_defaults = SessionKeyConfig::default();

        Self {
            data_dir: PathBuf::from(
                env::var(DATA_DIR_ENV).unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string()),
            ),
            host: env::var(HOST_ENV).unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env(PORT_ENV, 8080),
            secrets: SecretsConfig {
                vault_addr: non_empty_env(VAULT_ADDR_ENV),
                vault_token: non_empty_env(VAULT_TOKEN_ENV),
                vault_mount: env::var(VAULT_MOUNT_ENV).unwrap_or_else(|_| "secret".to_string()),
                master_key_path: env::var(MASTER_KEY_PATH_ENV)
                    .unwrap_or_else(|_| DEFAULT_MASTER_KEY_PATH.to_string()),
                auto_provision_master_key: parse_env(MASTER_KEY_AUTO_PROVISION_ENV, false),
            },
            renewal: RenewalConfig {
                threshold_days: days_env(
                    RENEWAL_THRESHOLD_DAYS_ENV,
                    renewal_defaults.threshold_days,
                ),
                pacing_delay: Duration::from_millis(parse_env(RENEWAL_PACING_MS_ENV, 2000)),
                ca_timeout: Duration::from_secs(parse_env(CA_TIMEOUT_SECS_ENV, 30)),
            },
            session: session_config(
                env::var(SESSION_TOKEN_ISSUER_ENV).unwrap_or(session_defaults.issuer),
                days_env(SESSION_KEY_LIFETIME_DAYS_ENV, 90),
                days_env(SESSION_KEY_ROTATION_DAYS_ENV, 30),
            ),
            check_interval: Duration::from_secs(parse_env(CHECK_INTERVAL_SECS_ENV, 86_400)),
        }
    }

    /// Path of the redb identity database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("identities.redb")
    }
}

/// Both day counts are already within `1..=MAX_DAYS_SETTING`.
fn session_config(issuer: String, lifetime_days: i64, rotation_days: i64) -> SessionKeyConfig {
    if rotation_days >= lifetime_days {
        tracing::warn!(
            lifetime_days,
            rotation_days,
            "Session keys expire before they rotate; verification gaps are possible"
        );
    }
    SessionKeyConfig {
        issuer,
        key_lifetime: chrono::Duration::days(lifetime_days),
        rotation_interval: chrono::Duration::days(rotation_days),
    }
}

fn days_env(name: &str, default: i64) -> i64 {
    parse_days(name, env::var(name).ok().as_deref(), default)
}

fn parse_days(name: &str, raw: Option<&str>, default: i64) -> i64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<i64>() {
        Ok(days) if (1..=MAX_DAYS_SETTING).contains(&days) => days,
        Ok(days) => {
            tracing::warn!(
                variable = name,
                value = days,
                max = MAX_DAYS_SETTING,
                default,
                "Day count out of range; using default"
            );
            default
        }
        Err(_) => {
            tracing::warn!(
                variable = name,
                value = raw,
                default,
                "Unparseable day count; using default"
            );
            default
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let renewal = RenewalConfig::default();
        assert_eq!(renewal.threshold_days, 30);
        assert_eq!(renewal.pacing_delay, Duration::from_secs(2));

        let session = SessionKeyConfig::default();
        assert!(session.rotation_interval < session.key_lifetime);

        let secrets = SecretsConfig::default();
        assert_eq!(secrets.master_key_path, DEFAULT_MASTER_KEY_PATH);
        assert!(secrets.vault_addr.is_none());
    }

    #[test]
    fn parse_env_falls_back_on_garbage() {
        // Variable name is unique to this test to avoid cross-test races.
        env::set_var("LIFECYCLE_TEST_GARBAGE_NUMBER", "not-a-number");
        assert_eq!(parse_env("LIFECYCLE_TEST_GARBAGE_NUMBER", 42u64), 42);
        env::remove_var("LIFECYCLE_TEST_GARBAGE_NUMBER");
    }

    #[test]
    fn day_counts_are_range_checked() {
        let name = RENEWAL_THRESHOLD_DAYS_ENV;
        assert_eq!(parse_days(name, None, 30), 30);
        assert_eq!(parse_days(name, Some(" 45 "), 30), 45);
        assert_eq!(parse_days(name, Some("3650"), 30), 3_650);
        assert_eq!(parse_days(name, Some("0"), 30), 30);
        assert_eq!(parse_days(name, Some("-5"), 30), 30);
        assert_eq!(parse_days(name, Some("3651"), 30), 30);
        assert_eq!(parse_days(name, Some("9223372036854775"), 30), 30);
        assert_eq!(parse_days(name, Some("soon"), 30), 30);
    }

    #[test]
    fn session_config_converts_days() {
        let config = session_config("issuer".into(), 90, 30);
        assert_eq!(config.key_lifetime, chrono::Duration::days(90));
        assert_eq!(config.rotation_interval, chrono::Duration::days(30));
        assert!(config.key_lifetime > chrono::Duration::zero());
    }

    #[test]
    fn database_lives_under_data_dir() {
        let mut config = LifecycleConfig::from_env();
        config.data_dir = PathBuf::from("/tmp/lifecycle");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/lifecycle/identities.redb")
        );
    }
}
