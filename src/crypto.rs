//! Credential snapshot encryption.
//!
//! Delivery items can carry an inlined copy of their sender credential so
//! the pipeline can skip a live lookup. The snapshot is AES-256-GCM
//! encrypted and base64-encoded; the key is derived from the configured
//! secret with a domain-separation suffix.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const KEY_SUFFIX: &str = "_sender_config_encryption_key";

/// Encrypts and decrypts credential snapshots with a key derived from
/// one shared secret.
pub struct SnapshotCipher {
    cipher: Aes256Gcm,
}

impl SnapshotCipher {
    /// Derive the AES key as SHA-256(secret + suffix).
    pub fn new(secret: &SecretString) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.expose_secret().as_bytes());
        hasher.update(KEY_SUFFIX.as_bytes());
        let key = hasher.finalize();
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Encrypt a serialized credential into a base64 string. The nonce
    /// is prepended to the ciphertext before encoding.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Crypto(format!("encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a base64 snapshot back into the credential bytes.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("invalid base64: {e}")))?;

        let nonce_len = 12;
        if raw.len() < nonce_len {
            return Err(Error::Crypto("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = raw.split_at(nonce_len);

        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::Crypto(format!("decrypt failed: {e}")))
    }
}
