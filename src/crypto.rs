// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AES-256-GCM envelope for private key material.
//!
//! ## Security
//!
//! - A fresh random 96-bit IV is drawn for every encryption
//! - The authentication tag is stored separately from the ciphertext
//! - A tag mismatch (tampering or wrong key) is always an error, never
//!   partially decrypted output
//!
//! [`CryptoBox`] is stateless: the master key is supplied by the caller on
//! every call and no I/O is performed.

use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

/// Length of the master key in bytes (AES-256).
pub const MASTER_KEY_LEN: usize = 32;

/// Length of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Authentication tag did not verify (tampered data or wrong key).
    #[error("decryption failed: authentication tag mismatch")]
    Decryption,

    #[error("encryption failed")]
    Encryption,

    #[error("invalid IV length: expected {NONCE_LEN} bytes, got {0}")]
    InvalidIv(usize),

    #[error("invalid master key: {0}")]
    InvalidKey(String),

    #[error("random number generator failure")]
    Rng,
}

/// The key-encryption-key protecting stored private keys.
///
/// `Debug` never prints key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let decoded = Base64::decode_vec(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not valid base64: {e}")))?;
        let bytes: [u8; MASTER_KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {MASTER_KEY_LEN} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Generate a new random key.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; MASTER_KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| CryptoError::Rng)?;
        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        Base64::encode_string(&self.0)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Output of [`CryptoBox::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Stateless AES-256-GCM encrypt/decrypt.
pub struct CryptoBox;

impl CryptoBox {
    /// Encrypt `plaintext` under `key` with a freshly generated IV.
    pub fn encrypt(plaintext: &[u8], key: &MasterKey) -> Result<SealedSecret, CryptoError> {
        let sealing_key = aead_key(key)?;

        let mut iv = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut iv)
            .map_err(|_| CryptoError::Rng)?;

        let mut in_out = plaintext.to_vec();
        let tag = sealing_key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(iv),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Encryption)?;

        Ok(SealedSecret {
            ciphertext: in_out,
            iv: iv.to_vec(),
            tag: tag.as_ref().to_vec(),
        })
    }

    /// Decrypt and authenticate.
    ///
    /// Returns [`CryptoError::Decryption`] when the tag does not verify.
    pub fn decrypt(
        ciphertext: &[u8],
        iv: &[u8],
        tag: &[u8],
        key: &MasterKey,
    ) -> Result<Vec<u8>, CryptoError> {
        let opening_key = aead_key(key)?;
        let nonce =
            Nonce::try_assume_unique_for_key(iv).map_err(|_| CryptoError::InvalidIv(iv.len()))?;

        if tag.len() != TAG_LEN {
            return Err(CryptoError::Decryption);
        }

        let mut in_out = Vec::with_capacity(ciphertext.len() + tag.len());
        in_out.extend_from_slice(ciphertext);
        in_out.extend_from_slice(tag);

        let plaintext = opening_key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Decryption)?;
        Ok(plaintext.to_vec())
    }

    /// Convenience wrapper over [`CryptoBox::decrypt`] for a [`SealedSecret`].
    pub fn open(sealed: &SealedSecret, key: &MasterKey) -> Result<Vec<u8>, CryptoError> {
        Self::decrypt(&sealed.ciphertext, &sealed.iv, &sealed.tag, key)
    }
}

fn aead_key(key: &MasterKey) -> Result<LessSafeKey, CryptoError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map_err(|_| CryptoError::InvalidKey("rejected by AES-256-GCM".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}
