// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Key Manager
//!
//! Ed25519 signing keys for session tokens (JWT, `alg = EdDSA`).
//!
//! ## Key lifecycle
//!
//! - Exactly one key is active and signs new tokens
//! - [`SessionKeyManager::rotate_keys`] flips the active key in one write
//!   transaction
//! - Inactive keys keep verifying until their own `expires_at`, so tokens
//!   issued just before a rotation stay valid
//! - [`SessionKeyManager::purge_expired_keys`] deletes inactive keys past
//!   expiry
//!
//! Private keys are stored as PKCS#8 PEM sealed under the master key. The
//! token header carries `kid` so verification can pick the matching key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionKeyConfig;
use crate::crypto::{CryptoBox, CryptoError, MasterKey};
use crate::storage::{DbError, IdentityDatabase, SessionKeyRecord};

pub const SESSION_KEY_ALGORITHM: &str = "EdDSA";

/// Clock skew tolerance in seconds.
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// DER prefix of an Ed25519 SubjectPublicKeyInfo, followed by the raw key.
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];
const ED25519_PUBLIC_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SessionKeyError {
    /// Unknown, purged or expired `kid`.
    #[error("signing key not found: {0}")]
    KeyNotFound(String),

    #[error("token signature is invalid")]
    SignatureInvalid,

    #[error("token has expired")]
    TokenExpired,

    #[error("token issuer is not trusted")]
    InvalidIssuer,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("no active signing key")]
    NoActiveKey,

    /// Fatal to the rotation call; safe to retry.
    #[error("key rotation failed: {0}")]
    KeyRotation(String),

    #[error("stored key material is invalid: {0}")]
    InvalidKeyMaterial(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

/// Standard session claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn new(
        subject: impl Into<String>,
        issuer: impl Into<String>,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        let exp = now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            sub: subject.into(),
            iss: issuer.into(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        }
    }
}

/// Public metadata of a signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionKeyInfo {
    pub key_id: String,
    pub public_key: String,
    pub algorithm: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&SessionKeyRecord> for SessionKeyInfo {
    fn from(record: &SessionKeyRecord) -> Self {
        Self {
            key_id: record.key_id.clone(),
            public_key: record.public_key.clone(),
            algorithm: record.algorithm.clone(),
            is_active: record.is_active,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

#[derive(Clone)]
pub struct SessionKeyManager {
    db: Arc<IdentityDatabase>,
    master_key: MasterKey,
    config: SessionKeyConfig,
}

impl SessionKeyManager {
    pub fn new(db: Arc<IdentityDatabase>, master_key: MasterKey, config: SessionKeyConfig) -> Self {
        Self {
            db,
            master_key,
            config,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Ensure an active key exists. Returns the active key id.
    pub fn initialize(&self) -> Result<String, SessionKeyError> {
        if let Some(active) = self.db.active_session_key()? {
            tracing::debug!(key_id = %active.key_id, "Active session key present");
            return Ok(active.key_id);
        }

        let record = self.generate_key(Utc::now())?;
        if self.db.insert_session_key_if_none_active(&record)? {
            tracing::info!(key_id = %record.key_id, "Generated initial session signing key");
            return Ok(record.key_id);
        }

        // Another initializer won the race.
        self.active_key_id()?.ok_or(SessionKeyError::NoActiveKey)
    }

    /// Generate a new key and make it the only active one.
    pub fn rotate_keys(&self) -> Result<String, SessionKeyError> {
        let record = self.generate_key(Utc::now())?;
        let deactivated = self
            .db
            .rotate_session_key(&record)
            .map_err(|e| SessionKeyError::KeyRotation(e.to_string()))?;

        tracing::info!(
            key_id = %record.key_id,
            deactivated = ?deactivated,
            expires_at = %record.expires_at,
            "Rotated session signing key"
        );
        Ok(record.key_id)
    }

    /// Rotate when the active key is older than `interval`, or when there is
    /// no active key at all. Returns the new key id if a rotation happened.
    pub fn rotate_if_due(
        &self,
        interval: chrono::Duration,
    ) -> Result<Option<String>, SessionKeyError> {
        let due = match self.db.active_session_key()? {
            // An interval past the end of time never comes due.
            Some(active) => active
                .created_at
                .checked_add_signed(interval)
                .is_some_and(|due_at| due_at <= Utc::now()),
            None => true,
        };
        if due {
            self.rotate_keys().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Delete inactive keys past their own expiry.
    pub fn purge_expired_keys(&self) -> Result<Vec<String>, SessionKeyError> {
        let purged = self.db.delete_expired_session_keys(Utc::now())?;
        if !purged.is_empty() {
            tracing::info!(purged = ?purged, "Purged expired session keys");
        }
        Ok(purged)
    }

    pub fn active_key_id(&self) -> Result<Option<String>, SessionKeyError> {
        Ok(self.db.active_session_key()?.map(|k| k.key_id))
    }

    pub fn list_keys(&self) -> Result<Vec<SessionKeyInfo>, SessionKeyError> {
        let mut keys: Vec<_> = self
            .db
            .list_session_keys()?
            .iter()
            .map(SessionKeyInfo::from)
            .collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(keys)
    }

    /// Sign `claims` with the active key, `kid` in the header.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, SessionKeyError> {
        let active = self
            .db
            .active_session_key()?
            .ok_or(SessionKeyError::NoActiveKey)?;

        let private_pem = CryptoBox::open(&active.private_key, &self.master_key)?;
        let private_pem = String::from_utf8(private_pem)
            .map_err(|e| SessionKeyError::InvalidKeyMaterial(e.to_string()))?;
        let pkcs8 = pem::parse(&private_pem)
            .map_err(|e| SessionKeyError::InvalidKeyMaterial(e.to_string()))?;

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(active.key_id.clone());

        encode(&header, claims, &EncodingKey::from_ed_der(pkcs8.contents()))
            .map_err(|e| SessionKeyError::InvalidKeyMaterial(e.to_string()))
    }

    /// Issue a token for `subject` valid for `ttl`.
    pub fn issue(&self, subject: &str, ttl: chrono::Duration) -> Result<String, SessionKeyError> {
        self.sign(&SessionClaims::new(subject, self.config.issuer.clone(), ttl))
    }

    /// Verify `token` against any retained, unexpired key.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, SessionKeyError> {
        let header =
            decode_header(token).map_err(|e| SessionKeyError::MalformedToken(e.to_string()))?;
        if header.alg != Algorithm::EdDSA {
            return Err(SessionKeyError::MalformedToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| SessionKeyError::MalformedToken("missing kid".into()))?;

        let key = self
            .db
            .get_session_key(&kid)?
            .filter(|k| !k.is_expired_at(Utc::now()))
            .ok_or_else(|| SessionKeyError::KeyNotFound(kid.clone()))?;

        let raw_public_key = raw_ed25519_public_key(&key.public_key)?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.validate_aud = false;
        validation.set_issuer(&[&self.config.issuer]);

        let data = decode::<T>(token, &DecodingKey::from_ed_der(&raw_public_key), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => SessionKeyError::SignatureInvalid,
                ErrorKind::ExpiredSignature => SessionKeyError::TokenExpired,
                ErrorKind::InvalidIssuer => SessionKeyError::InvalidIssuer,
                _ => SessionKeyError::MalformedToken(e.to_string()),
            })?;

        Ok(data.claims)
    }

    fn generate_key(&self, now: DateTime<Utc>) -> Result<SessionKeyRecord, SessionKeyError> {
        let lifetime = self.config.key_lifetime;
        if lifetime <= chrono::Duration::zero() {
            return Err(SessionKeyError::KeyRotation(format!(
                "key lifetime must be positive, got {lifetime}"
            )));
        }
        let expires_at = now.checked_add_signed(lifetime).ok_or_else(|| {
            SessionKeyError::KeyRotation(format!("key lifetime {lifetime} is out of range"))
        })?;

        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| SessionKeyError::KeyRotation("key generation failed".into()))?;
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|e| SessionKeyError::KeyRotation(e.to_string()))?;

        let private_pem = pem::encode(&pem::Pem::new("PRIVATE KEY", pkcs8.as_ref().to_vec()));
        let spki = [&ED25519_SPKI_PREFIX[..], key_pair.public_key().as_ref()].concat();
        let public_pem = pem::encode(&pem::Pem::new("PUBLIC KEY", spki));

        let sealed = CryptoBox::encrypt(private_pem.as_bytes(), &self.master_key)?;
        let suffix = Uuid::new_v4().simple().to_string();

        Ok(SessionKeyRecord {
            key_id: format!("key-{}-{}", now.timestamp_millis(), &suffix[..8]),
            private_key: sealed,
            public_key: public_pem,
            algorithm: SESSION_KEY_ALGORITHM.to_string(),
            is_active: false,
            created_at: now,
            expires_at,
        })
    }
}

/// Raw 32-byte key from an Ed25519 SubjectPublicKeyInfo PEM.
fn raw_ed25519_public_key(public_pem: &str) -> Result<Vec<u8>, SessionKeyError> {
    let block =
        pem::parse(public_pem).map_err(|e| SessionKeyError::InvalidKeyMaterial(e.to_string()))?;
    let der = block.contents();
    match der.strip_prefix(&ED25519_SPKI_PREFIX[..]) {
        Some(raw) if raw.len() == ED25519_PUBLIC_KEY_LEN => Ok(raw.to_vec()),
        _ => Err(SessionKeyError::InvalidKeyMaterial(
            "not an Ed25519 public key".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, SessionKeyManager) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = IdentityDatabase::open(&dir.path().join("identities.redb")).expect("open db");
        let manager = SessionKeyManager::new(
            Arc::new(db),
            MasterKey::generate().expect("master key"),
            SessionKeyConfig::default(),
        );
        (dir, manager)
    }

    fn active_count(manager: &SessionKeyManager) -> usize {
        manager
            .list_keys()
            .unwrap()
            .iter()
            .filter(|k| k.is_active)
            .count()
    }

    #[test]
    fn initialize_bootstraps_exactly_one_key() {
        let (_dir, manager) = manager();
        assert!(manager.active_key_id().unwrap().is_none());

        let first = manager.initialize().unwrap();
        let second = manager.initialize().unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.list_keys().unwrap().len(), 1);
        assert_eq!(active_count(&manager), 1);
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let (_dir, manager) = manager();
        let kid = manager.initialize().unwrap();

        let token = manager.issue("alice@org1", chrono::Duration::hours(1)).unwrap();
        assert_eq!(decode_header(&token).unwrap().kid, Some(kid));

        let claims: SessionClaims = manager.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice@org1");
        assert_eq!(claims.iss, manager.issuer());
    }

    #[test]
    fn rotation_keeps_previous_tokens_valid() {
        let (_dir, manager) = manager();
        let old_kid = manager.initialize().unwrap();
        let old_token = manager.issue("alice@org1", chrono::Duration::hours(1)).unwrap();

        let new_kid = manager.rotate_keys().unwrap();
        assert_ne!(old_kid, new_kid);
        assert_eq!(active_count(&manager), 1);
        assert_eq!(manager.active_key_id().unwrap(), Some(new_kid.clone()));

        let claims: SessionClaims = manager.verify(&old_token).unwrap();
        assert_eq!(claims.sub, "alice@org1");

        let new_token = manager.issue("bob@org1", chrono::Duration::hours(1)).unwrap();
        assert_eq!(decode_header(&new_token).unwrap().kid, Some(new_kid));
    }

    #[test]
    fn expired_key_no_longer_verifies() {
        let (_dir, manager) = manager();
        let old_kid = manager.initialize().unwrap();
        let token = manager.issue("alice@org1", chrono::Duration::hours(1)).unwrap();
        manager.rotate_keys().unwrap();

        let mut record = manager.db.get_session_key(&old_kid).unwrap().unwrap();
        record.expires_at = Utc::now() - chrono::Duration::seconds(1);
        manager.db.put_session_key(&record).unwrap();

        assert!(matches!(
            manager.verify::<SessionClaims>(&token),
            Err(SessionKeyError::KeyNotFound(kid)) if kid == old_kid
        ));

        assert_eq!(manager.purge_expired_keys().unwrap(), vec![old_kid]);
        assert_eq!(manager.list_keys().unwrap().len(), 1);
        assert_eq!(active_count(&manager), 1);
    }

    #[test]
    fn expired_token_is_rejected() {
        let (_dir, manager) = manager();
        manager.initialize().unwrap();

        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: "alice@org1".into(),
            iss: manager.issuer().to_string(),
            iat: now - 3_600,
            exp: now - 600,
        };
        let token = manager.sign(&claims).unwrap();

        assert!(matches!(
            manager.verify::<SessionClaims>(&token),
            Err(SessionKeyError::TokenExpired)
        ));
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let (_dir, manager) = manager();
        manager.initialize().unwrap();

        let alice = manager.issue("alice@org1", chrono::Duration::hours(1)).unwrap();
        let mallory = manager.issue("mallory@org1", chrono::Duration::hours(1)).unwrap();

        let alice_parts: Vec<_> = alice.split('.').collect();
        let mallory_parts: Vec<_> = mallory.split('.').collect();
        let forged = format!("{}.{}.{}", alice_parts[0], mallory_parts[1], alice_parts[2]);

        assert!(matches!(
            manager.verify::<SessionClaims>(&forged),
            Err(SessionKeyError::SignatureInvalid)
        ));
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let (_dir, manager) = manager();
        manager.initialize().unwrap();
        let token = manager
            .sign(&SessionClaims::new("alice@org1", "someone-else", chrono::Duration::hours(1)))
            .unwrap();

        assert!(matches!(
            manager.verify::<SessionClaims>(&token),
            Err(SessionKeyError::InvalidIssuer)
        ));
    }

    #[test]
    fn unknown_kid_and_garbage() {
        let (_dir, other) = manager();
        other.initialize().unwrap();
        let foreign = other.issue("alice@org1", chrono::Duration::hours(1)).unwrap();

        let (_dir2, manager) = manager();
        manager.initialize().unwrap();
        assert!(matches!(
            manager.verify::<SessionClaims>(&foreign),
            Err(SessionKeyError::KeyNotFound(_))
        ));
        assert!(matches!(
            manager.verify::<SessionClaims>("not-a-token"),
            Err(SessionKeyError::MalformedToken(_))
        ));
    }

    #[test]
    fn rotate_if_due_respects_interval() {
        let (_dir, manager) = manager();
        // No active key counts as due.
        let first = manager
            .rotate_if_due(chrono::Duration::days(30))
            .unwrap()
            .expect("bootstrap rotation");

        assert!(manager
            .rotate_if_due(chrono::Duration::days(30))
            .unwrap()
            .is_none());

        let second = manager
            .rotate_if_due(chrono::Duration::zero())
            .unwrap()
            .expect("due rotation");
        assert_ne!(first, second);
        assert_eq!(active_count(&manager), 1);
    }

    fn manager_with_lifetime(lifetime: chrono::Duration) -> (tempfile::TempDir, SessionKeyManager) {
        let (dir, manager) = manager();
        let config = SessionKeyConfig {
            key_lifetime: lifetime,
            ..SessionKeyConfig::default()
        };
        let manager = SessionKeyManager::new(manager.db, manager.master_key, config);
        (dir, manager)
    }

    #[test]
    fn unusable_key_lifetime_is_refused() {
        for lifetime in [
            chrono::Duration::days(-1),
            chrono::Duration::zero(),
            chrono::Duration::MAX,
        ] {
            let (_dir, manager) = manager_with_lifetime(lifetime);
            assert!(matches!(
                manager.initialize(),
                Err(SessionKeyError::KeyRotation(_))
            ));
            assert!(matches!(
                manager.rotate_keys(),
                Err(SessionKeyError::KeyRotation(_))
            ));
            assert!(manager.list_keys().unwrap().is_empty());
        }
    }

    #[test]
    fn unbounded_durations_do_not_panic() {
        let (_dir, manager) = manager();
        manager.initialize().unwrap();
        assert!(manager
            .rotate_if_due(chrono::Duration::MAX)
            .unwrap()
            .is_none());

        let claims = SessionClaims::new("alice@org1", manager.issuer(), chrono::Duration::MAX);
        assert_eq!(claims.exp, DateTime::<Utc>::MAX_UTC.timestamp());
    }

    #[test]
    fn private_keys_are_sealed_at_rest() {
        let (_dir, manager) = manager();
        let kid = manager.initialize().unwrap();
        let record = manager.db.get_session_key(&kid).unwrap().unwrap();

        assert!(!String::from_utf8_lossy(&record.private_key.ciphertext).contains("PRIVATE KEY"));
        assert_eq!(raw_ed25519_public_key(&record.public_key).unwrap().len(), 32);
        assert_eq!(record.algorithm, SESSION_KEY_ALGORITHM);
    }
}
