//! Machine-keyed sealing for small blobs at rest.
//!
//! Layout of a sealed blob: `nonce (12 bytes) || AES-256-GCM ciphertext+tag`.
//! A fresh random nonce is drawn for every call to [`seal`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::sha256_joined;

pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SealError {
    #[error("random nonce generation failed")]
    Rng,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed")]
    DecryptFailed,
    #[error("sealed blob too short: {0} bytes")]
    Truncated(usize),
}

/// 256-bit symmetric key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MachineKey([u8; 32]);

impl MachineKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive a key from stable machine attributes.
    ///
    /// The same attributes always produce the same key, so data sealed on one
    /// machine can only be opened where the attributes match.
    pub fn derive<S: AsRef<str>>(attributes: &[S]) -> Self {
        Self(sha256_joined(attributes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for MachineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MachineKey(..)")
    }
}

pub fn seal(key: &MachineKey, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce).map_err(|_| SealError::Rng)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SealError::EncryptFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

pub fn open(key: &MachineKey, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
    // 16-byte GCM tag follows the nonce even for empty plaintext.
    if sealed.len() < NONCE_LEN + 16 {
        return Err(SealError::Truncated(sealed.len()));
    }
    let (nonce, ct) = sealed.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), ct)
        .map_err(|_| SealError::DecryptFailed)
}
