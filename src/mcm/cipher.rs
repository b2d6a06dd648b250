//! Encryption of secrets at rest.
//!
//! Resolution only needs the [`SecretCipher`] seam; [`ChaChaCipher`] is the
//! implementation the binary wires in. Ciphertexts are
//! `base64(nonce || ciphertext || tag)` with a fresh random nonce per call.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce, aead::Aead};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::error::{McmError, McmResult};

const NONCE_LEN: usize = 12;

/// Environment variable holding the passphrase the cipher key is derived from
pub(crate) const SECRET_KEY_ENV_VAR: &str = "MCM_SECRET_KEY";

/// Encrypt/decrypt capability for stored secrets.
///
/// A decryption failure signals a rotated key or corrupted data and surfaces
/// as [`McmError::Decrypt`].
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> McmResult<String>;

    fn decrypt(&self, ciphertext: &str) -> McmResult<String>;
}

/// ChaCha20-Poly1305 cipher keyed by the SHA-256 of a passphrase.
pub struct ChaChaCipher {
    cipher: ChaCha20Poly1305,
}

impl ChaChaCipher {
    pub fn from_passphrase(passphrase: &str) -> McmResult<Self> {
        if passphrase.is_empty() {
            return Err(McmError::Invalid(
                "secret key passphrase must not be empty".to_string(),
            ));
        }
        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| McmError::Invalid(format!("invalid cipher key: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Build the cipher from `MCM_SECRET_KEY`.
    pub fn from_env() -> McmResult<Self> {
        let passphrase = std::env::var(SECRET_KEY_ENV_VAR).map_err(|_| {
            McmError::Invalid(format!("{} is not set", SECRET_KEY_ENV_VAR))
        })?;
        Self::from_passphrase(&passphrase)
    }
}

impl SecretCipher for ChaChaCipher {
    fn encrypt(&self, plaintext: &str) -> McmResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| McmError::Invalid("failed to encrypt secret".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> McmResult<String> {
        let raw = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| McmError::Decrypt(format!("not valid base64: {}", e)))?;
        if raw.len() <= NONCE_LEN {
            return Err(McmError::Decrypt("ciphertext too short".to_string()));
        }

        let (nonce, body) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| {
                McmError::Decrypt("authentication tag mismatch (rotated key?)".to_string())
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| McmError::Decrypt("plaintext is not valid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_recovers_plaintext() {
        let cipher = ChaChaCipher::from_passphrase("correct horse").unwrap();
        let sealed = cipher.encrypt("s3cret").unwrap();
        assert_ne!(sealed, "s3cret");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "s3cret");
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let cipher = ChaChaCipher::from_passphrase("correct horse").unwrap();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rotated_key_is_decrypt_error() {
        let old = ChaChaCipher::from_passphrase("old key").unwrap();
        let new = ChaChaCipher::from_passphrase("new key").unwrap();
        let sealed = old.encrypt("s3cret").unwrap();
        assert!(matches!(new.decrypt(&sealed), Err(McmError::Decrypt(_))));
    }

    #[test]
    fn test_garbage_is_decrypt_error() {
        let cipher = ChaChaCipher::from_passphrase("k").unwrap();
        assert!(matches!(cipher.decrypt("%%%"), Err(McmError::Decrypt(_))));
        assert!(matches!(cipher.decrypt("AAAA"), Err(McmError::Decrypt(_))));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(matches!(
            ChaChaCipher::from_passphrase(""),
            Err(McmError::Invalid(_))
        ));
    }
}
