//! Envelope encryption for vault payloads.
//!
//! Payloads are JSON values encrypted with AES-256-GCM under a key derived
//! from the operator-supplied master secret. Encrypted tokens have the form
//! `base64(nonce) + "." + base64(ciphertext || tag)` with a fresh 12-byte
//! nonce per encryption.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Key length in bytes (256 bits for AES-256)
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// No master key is configured. The vault must refuse to operate rather
    /// than fall back to anything weaker.
    #[error("CLAWVAULT_MASTER_KEY is required")]
    MissingMasterKey,

    #[error("invalid encrypted payload format")]
    InvalidFormat,

    /// The AEAD tag check failed. Never treated as "no secret".
    #[error("payload authentication failed")]
    Authentication,

    #[error("encryption failed")]
    Encryption,

    #[error("payload serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Derive a 32-byte AES key from the operator-supplied master secret.
///
/// If the secret base64-decodes to exactly 32 bytes it is used verbatim.
/// Any other string is hashed with SHA-256, so every non-empty secret yields
/// a valid key length.
pub fn derive_key(master_key: &str) -> Result<[u8; KEY_LENGTH], CryptoError> {
    let trimmed = master_key.trim();
    if trimmed.is_empty() {
        return Err(CryptoError::MissingMasterKey);
    }
    if let Ok(raw) = BASE64.decode(trimmed) {
        if raw.len() == KEY_LENGTH {
            let mut key = [0u8; KEY_LENGTH];
            key.copy_from_slice(&raw);
            return Ok(key);
        }
    }
    let hashed = Sha256::digest(trimmed.as_bytes());
    Ok(hashed.into())
}

/// Encrypt a JSON payload, producing a `nonce.ciphertext` token.
pub fn encrypt_json(
    key: &[u8; KEY_LENGTH],
    payload: &serde_json::Value,
) -> Result<String, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Encryption)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = serde_json::to_vec(payload)?;
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|_| CryptoError::Encryption)?;

    Ok(format!(
        "{}.{}",
        BASE64.encode(nonce_bytes),
        BASE64.encode(&ciphertext)
    ))
}

/// Decrypt a `nonce.ciphertext` token back into a JSON payload.
pub fn decrypt_json(
    key: &[u8; KEY_LENGTH],
    token: &str,
) -> Result<serde_json::Value, CryptoError> {
    let (nonce_raw, data_raw) = token.split_once('.').ok_or(CryptoError::InvalidFormat)?;
    if nonce_raw.is_empty() || data_raw.is_empty() {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce_bytes = BASE64
        .decode(nonce_raw)
        .map_err(|_| CryptoError::InvalidFormat)?;
    let data = BASE64
        .decode(data_raw)
        .map_err(|_| CryptoError::InvalidFormat)?;
    if nonce_bytes.len() != NONCE_LENGTH {
        return Err(CryptoError::InvalidFormat);
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Authentication)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, data.as_slice())
        .map_err(|_| CryptoError::Authentication)?;

    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn zero_key_base64() -> String {
        BASE64.encode([0u8; KEY_LENGTH])
    }

    #[test]
    fn test_derive_key_base64_used_verbatim() {
        let key = derive_key(&zero_key_base64()).unwrap();
        assert_eq!(key, [0u8; KEY_LENGTH]);
    }

    #[test]
    fn test_derive_key_arbitrary_string_hashed() {
        let key = derive_key("not a base64 key").unwrap();
        let expected: [u8; KEY_LENGTH] = Sha256::digest(b"not a base64 key").into();
        assert_eq!(key, expected);
    }

    #[test]
    fn test_derive_key_short_base64_hashed() {
        // Valid base64, but not 32 bytes: falls through to SHA-256.
        let key = derive_key("aGVsbG8=").unwrap();
        let expected: [u8; KEY_LENGTH] = Sha256::digest(b"aGVsbG8=").into();
        assert_eq!(key, expected);
    }

    #[test]
    fn test_derive_key_empty_is_missing() {
        assert!(matches!(derive_key(""), Err(CryptoError::MissingMasterKey)));
        assert!(matches!(
            derive_key("   "),
            Err(CryptoError::MissingMasterKey)
        ));
    }

    #[test]
    fn test_round_trip() {
        let key = derive_key(&zero_key_base64()).unwrap();
        let payload = json!({"a": 1});

        let token = encrypt_json(&key, &payload).unwrap();
        let decrypted = decrypt_json(&key, &token).unwrap();

        assert_eq!(decrypted, payload);
    }

    #[test]
    fn test_nonce_differs_across_encryptions() {
        let key = derive_key("some master secret").unwrap();
        let payload = json!({"values": {"API": "x"}});

        let token1 = encrypt_json(&key, &payload).unwrap();
        let token2 = encrypt_json(&key, &payload).unwrap();

        assert_ne!(token1, token2);
        let nonce1 = token1.split('.').next().unwrap();
        let nonce2 = token2.split('.').next().unwrap();
        assert_ne!(nonce1, nonce2);
    }

    #[test]
    fn test_tamper_detection() {
        let key = derive_key("tamper test key").unwrap();
        let token = encrypt_json(&key, &json!({"secret": "value"})).unwrap();

        let (nonce_raw, data_raw) = token.split_once('.').unwrap();
        let data = BASE64.decode(data_raw).unwrap();
        for i in 0..data.len() {
            let mut flipped = data.clone();
            flipped[i] ^= 0x01;
            let tampered = format!("{}.{}", nonce_raw, BASE64.encode(&flipped));
            assert!(
                matches!(decrypt_json(&key, &tampered), Err(CryptoError::Authentication)),
                "flipping byte {} was not detected",
                i
            );
        }
        // Sanity: the untouched token still decrypts.
        assert!(decrypt_json(&key, &token).is_ok());
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let key1 = derive_key("key one").unwrap();
        let key2 = derive_key("key two").unwrap();

        let token = encrypt_json(&key1, &json!("payload")).unwrap();
        assert!(matches!(
            decrypt_json(&key2, &token),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn test_missing_segment_is_format_error() {
        let key = derive_key("format test").unwrap();
        assert!(matches!(
            decrypt_json(&key, "no-dot-here"),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_json(&key, "abc."),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_json(&key, ""),
            Err(CryptoError::InvalidFormat)
        ));
    }

    #[test]
    fn test_unicode_payload() {
        let key = derive_key("unicode").unwrap();
        let payload = json!({"greeting": "Hello, 世界! 🎉"});

        let token = encrypt_json(&key, &payload).unwrap();
        assert_eq!(decrypt_json(&key, &token).unwrap(), payload);
    }
}
