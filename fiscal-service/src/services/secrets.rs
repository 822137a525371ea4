//! Symmetric encryption of certificate passphrases.
//!
//! AES-256-GCM under the server-held master key (CERT_STORE_KEY). Tokens are
//! stored as `nonce:tag:ciphertext`, each part base64, the format the
//! settings documents already carry. A token that fails to decrypt is an
//! expected condition after a master-key rotation and is reported as such
//! rather than treated as corruption.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum SecretCodecError {
    #[error("server decryption key is not configured")]
    MissingKey,
    #[error("master key must decode to at least 32 bytes")]
    KeyTooShort,
    #[error("invalid encrypted token format")]
    InvalidFormat,
    #[error("decryption failed (master key rotated or token corrupted)")]
    DecryptFailed,
    #[error("encryption failed")]
    EncryptFailed,
}

#[derive(Clone)]
pub struct SecretCodec {
    key: Option<[u8; 32]>,
}

impl SecretCodec {
    /// Build the codec from the configured master key. A missing key yields
    /// a codec that reports `MissingKey` on use; diagnostics step 1 surfaces
    /// that state to operators.
    pub fn new(master_key: Option<&SecretString>) -> Result<Self, SecretCodecError> {
        let key = match master_key {
            None => None,
            Some(raw) => Some(derive_key(raw.expose_secret())?),
        };
        Ok(Self { key })
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretCodecError> {
        let key = self.key.ok_or(SecretCodecError::MissingKey)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext; split it back out to
        // keep the stored token format.
        let sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| SecretCodecError::EncryptFailed)?;
        let (ciphertext, auth_tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            BASE64.encode(nonce_bytes),
            BASE64.encode(auth_tag),
            BASE64.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, token: &str) -> Result<String, SecretCodecError> {
        let key = self.key.ok_or(SecretCodecError::MissingKey)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let parts: Vec<&str> = token.split(':').collect();
        if parts.len() != 3 {
            return Err(SecretCodecError::InvalidFormat);
        }
        let nonce_bytes = BASE64
            .decode(parts[0])
            .map_err(|_| SecretCodecError::InvalidFormat)?;
        let auth_tag = BASE64
            .decode(parts[1])
            .map_err(|_| SecretCodecError::InvalidFormat)?;
        let ciphertext = BASE64
            .decode(parts[2])
            .map_err(|_| SecretCodecError::InvalidFormat)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(SecretCodecError::InvalidFormat);
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&auth_tag);

        let plain = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), sealed.as_ref())
            .map_err(|_| SecretCodecError::DecryptFailed)?;
        String::from_utf8(plain).map_err(|_| SecretCodecError::DecryptFailed)
    }
}

/// Accept a base64-encoded key, falling back to the raw bytes, and use the
/// first 32 bytes. Mirrors how operators have historically provisioned the
/// variable.
fn derive_key(raw: &str) -> Result<[u8; 32], SecretCodecError> {
    let bytes = BASE64
        .decode(raw)
        .unwrap_or_else(|_| raw.as_bytes().to_vec());
    if bytes.len() < 32 {
        return Err(SecretCodecError::KeyTooShort);
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[..32]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec_with(raw_key: &str) -> SecretCodec {
        let key = SecretString::new(raw_key.to_string());
        SecretCodec::new(Some(&key)).expect("codec")
    }

    #[test]
    fn roundtrip() {
        let codec = codec_with("unit-test-master-key-0123456789abcdef");
        let token = codec.encrypt("certificate-password").unwrap();
        assert_eq!(token.split(':').count(), 3);
        assert_eq!(codec.decrypt(&token).unwrap(), "certificate-password");
    }

    #[test]
    fn rotated_key_fails_to_decrypt() {
        let old = codec_with("unit-test-master-key-0123456789abcdef");
        let new = codec_with("unit-test-rotated-key-fedcba987654321");
        let token = old.encrypt("secret").unwrap();
        assert!(matches!(
            new.decrypt(&token),
            Err(SecretCodecError::DecryptFailed)
        ));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let codec = codec_with("unit-test-master-key-0123456789abcdef");
        assert!(matches!(
            codec.decrypt("not-a-token"),
            Err(SecretCodecError::InvalidFormat)
        ));
    }

    #[test]
    fn missing_key_is_reported() {
        let codec = SecretCodec::new(None).unwrap();
        assert!(!codec.has_key());
        assert!(matches!(
            codec.encrypt("x"),
            Err(SecretCodecError::MissingKey)
        ));
    }

    #[test]
    fn short_key_is_rejected() {
        let key = SecretString::new("too-short".to_string());
        assert!(matches!(
            SecretCodec::new(Some(&key)),
            Err(SecretCodecError::KeyTooShort)
        ));
    }

    #[test]
    fn base64_key_accepted() {
        let encoded = BASE64.encode([7u8; 32]);
        let key = SecretString::new(encoded);
        let codec = SecretCodec::new(Some(&key)).unwrap();
        let token = codec.encrypt("p").unwrap();
        assert_eq!(codec.decrypt(&token).unwrap(), "p");
    }
}
