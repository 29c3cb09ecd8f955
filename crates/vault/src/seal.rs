//! AES-256-GCM sealing with a configured key.

use crate::error::VaultError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};

/// Key size for AES-256 (32 bytes).
pub const KEY_SIZE: usize = 32;

/// Nonce size for AES-GCM (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Symmetric key for sealing blobs.
///
/// Keys come from external configuration so that anything sealed by one
/// process can be opened by the next one.
pub struct SealingKey(Secret<[u8; KEY_SIZE]>);

impl SealingKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Secret::new(bytes))
    }

    /// Parse a hex-encoded 32-byte key.
    pub fn from_hex(encoded: &str) -> Result<Self, VaultError> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| VaultError::InvalidKey(format!("not valid hex: {}", e)))?;

        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
            VaultError::InvalidKey(format!("expected {} bytes, got {}", KEY_SIZE, b.len()))
        })?;

        Ok(Self::from_bytes(key))
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self::from_bytes(key)
    }

    /// Hex encoding of the key, for writing it into configuration.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.expose_secret())
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.0.expose_secret()))
    }

    /// Seal a blob.
    ///
    /// Output format: [12 bytes nonce][ciphertext with auth tag]
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext)
            .map_err(|_| VaultError::Seal)?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Open a blob produced by [`SealingKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, VaultError> {
        if sealed.len() < NONCE_SIZE {
            return Err(VaultError::Open);
        }

        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher()
            .decrypt(nonce, &sealed[NONCE_SIZE..])
            .map_err(|_| VaultError::Open)
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey([REDACTED])")
    }
}

impl Clone for SealingKey {
    fn clone(&self) -> Self {
        Self::from_bytes(*self.0.expose_secret())
    }
}
