//! Slice encryption at rest.
//!
//! Stored layout: `nonce (24 bytes) || ciphertext || tag (16 bytes)`, sealed
//! with XChaCha20-Poly1305. The blob path is bound as associated data, so a
//! ciphertext copied to another path no longer decrypts.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// XChaCha20 nonce size in bytes.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

#[derive(Clone, ZeroizeOnDrop)]
struct SliceKey([u8; KEY_SIZE]);

/// Process-wide cipher for slice files.
#[derive(Clone)]
pub struct SliceCipher {
    key: SliceKey,
}

impl SliceCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key: SliceKey(key) }
    }

    /// Parse a key written as 64 hex characters.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let mut decoded = hex::decode(hex_key.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not hex: {}", e)))?;

        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE, len
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self::new(key))
    }

    /// Random key, printed by `check` for first-time setup.
    pub fn generate_hex() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut key);
        let encoded = hex::encode(key);
        key.zeroize();
        encoded
    }

    /// Seal `plaintext` for storage at `path`.
    pub fn encrypt(&self, path: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key.0));
        let sealed = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: path.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open bytes previously sealed for `path`.
    pub fn decrypt(&self, path: &str, stored: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if stored.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Truncated { len: stored.len() });
        }
        let (nonce, sealed) = stored.split_at(NONCE_SIZE);

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key.0));
        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: path.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Decrypt)
    }
}

impl std::fmt::Debug for SliceCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceCipher").finish_non_exhaustive()
    }
}
