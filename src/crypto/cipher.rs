//! Authenticated encryption of stored conversation history.
//!
//! AES-256-GCM with a key stretched from the operator secret by PBKDF2-HMAC-SHA256.
//! The salt and iteration count are fixed so that every server process sharing the
//! same secret derives the same key and can read history written by any other.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

const KEY_SALT: &[u8] = b"pamoja-conversation-history";
pub const KDF_ITERATIONS: u32 = 100_000;
pub const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Ciphertext plus the parameters needed to open it, all hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

/// Stretch an operator secret into AES-256 key material.
pub fn derive_key(secret: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), KEY_SALT, KDF_ITERATIONS, &mut key[..]);
    key
}

pub struct HistoryCipher {
    key: Option<Zeroizing<[u8; KEY_LEN]>>,
}

impl std::fmt::Debug for HistoryCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryCipher")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl HistoryCipher {
    /// Build a cipher from the configured secret. A missing or blank secret yields a
    /// cipher whose every operation fails, which callers treat as a degraded mode.
    pub fn new(secret: Option<&str>) -> Self {
        let key = secret
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(derive_key);
        Self { key }
    }

    /// Build a cipher from already-derived key material.
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: Some(Zeroizing::new(key)),
        }
    }

    pub fn disabled() -> Self {
        Self { key: None }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedPayload, CipherError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| CipherError::Encryption("encryption secret is not configured".into()))?;
        if plaintext.is_empty() {
            return Err(CipherError::Encryption("plaintext is empty".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| CipherError::Encryption(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        // aes-gcm appends the tag to the ciphertext
        let mut sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CipherError::Encryption(e.to_string()))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedPayload {
            ciphertext: hex::encode(&sealed),
            iv: hex::encode(nonce),
            auth_tag: hex::encode(tag),
        })
    }

    /// Open a payload produced by [`HistoryCipher::encrypt`]. The tag is verified before
    /// any plaintext is returned.
    pub fn decrypt(&self, ciphertext: &str, iv: &str, auth_tag: &str) -> Result<String, CipherError> {
        if ciphertext.is_empty() || iv.is_empty() || auth_tag.is_empty() {
            return Err(CipherError::Decryption(
                "ciphertext, iv and auth tag are all required".into(),
            ));
        }
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| CipherError::Decryption("encryption secret is not configured".into()))?;

        let iv = decode_hex("iv", iv)?;
        let iv: [u8; IV_LEN] = iv.as_slice().try_into().map_err(|_| {
            CipherError::Decryption(format!("iv must be {IV_LEN} bytes, got {}", iv.len()))
        })?;
        let tag = decode_hex("auth tag", auth_tag)?;
        if tag.len() != TAG_LEN {
            return Err(CipherError::Decryption(format!(
                "auth tag must be {TAG_LEN} bytes, got {}",
                tag.len()
            )));
        }
        let mut sealed = decode_hex("ciphertext", ciphertext)?;
        sealed.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| CipherError::Decryption(e.to_string()))?;
        let plaintext = cipher
            .decrypt(&Nonce::from(iv), sealed.as_ref())
            .map_err(|_| CipherError::Decryption("authentication tag mismatch".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CipherError::Decryption(format!("plaintext is not UTF-8: {e}")))
    }

    pub fn decrypt_payload(&self, payload: &EncryptedPayload) -> Result<String, CipherError> {
        self.decrypt(&payload.ciphertext, &payload.iv, &payload.auth_tag)
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, CipherError> {
    hex::decode(value).map_err(|e| CipherError::Decryption(format!("{field} is not valid hex: {e}")))
}
