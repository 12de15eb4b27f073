//! Sealing of DLQ subject data with AES-256-GCM
//!
//! The seal key comes from `DLQ_SEAL_KEY_B64` or AWS Secrets Manager
//! (`erasure/dlq-seal-key`, created on first use).
//!
//! Format: base64(nonce_12bytes || ciphertext || tag_16bytes)

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use zeroize::Zeroize;

use crate::error::BoxError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const SECRET_NAME: &str = "erasure/dlq-seal-key";

/// Seal key (32 bytes for AES-256-GCM)
#[derive(Clone)]
pub struct SealKey {
    key: [u8; KEY_LEN],
}

impl Drop for SealKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for SealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealKey(..)")
    }
}

fn key_from_bytes(bytes: &[u8]) -> Result<[u8; KEY_LEN], BoxError> {
    if bytes.len() != KEY_LEN {
        return Err(format!("Seal key wrong length: {} (expected {KEY_LEN})", bytes.len()).into());
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(bytes);
    Ok(key)
}

impl SealKey {
    /// Fresh random key (development mode and tests)
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut key);
        Self { key }
    }

    pub fn from_base64(b64: &str) -> Result<Self, BoxError> {
        let mut bytes = base64::engine::general_purpose::STANDARD.decode(b64.trim())?;
        let key = key_from_bytes(&bytes);
        bytes.zeroize();
        Ok(Self { key: key? })
    }

    /// Load or create the seal key in AWS Secrets Manager
    pub async fn from_secrets_manager(
        sm: &aws_sdk_secretsmanager::Client,
    ) -> Result<Self, BoxError> {
        match sm.get_secret_value().secret_id(SECRET_NAME).send().await {
            Ok(output) => {
                let b64 = output
                    .secret_string()
                    .ok_or("Seal key secret has no string value")?;
                let key = Self::from_base64(b64)?;
                tracing::info!("DLQ seal key loaded from Secrets Manager");
                Ok(key)
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                let key = Self::generate();
                let b64 = base64::engine::general_purpose::STANDARD.encode(key.key);

                sm.create_secret()
                    .name(SECRET_NAME)
                    .secret_string(&b64)
                    .send()
                    .await?;

                tracing::info!("DLQ seal key created in Secrets Manager");
                Ok(key)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Seal plaintext → base64(nonce || ciphertext || tag)
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, &'static str> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| "Invalid key")?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| "Encryption failed")?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&result))
    }

    /// Open base64(nonce || ciphertext || tag) → plaintext
    pub fn open(&self, sealed_b64: &str) -> Result<Vec<u8>, &'static str> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(sealed_b64)
            .map_err(|_| "Invalid base64")?;

        if data.len() < NONCE_LEN + TAG_LEN {
            return Err("Ciphertext too short");
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| "Invalid key")?;
        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);

        cipher
            .decrypt(nonce, &data[NONCE_LEN..])
            .map_err(|_| "Decryption failed (wrong key or tampered data)")
    }

    /// Seal a serializable value as JSON
    pub fn seal_json<T: serde::Serialize>(&self, value: &T) -> Result<String, &'static str> {
        let mut json = serde_json::to_vec(value).map_err(|_| "Serialization failed")?;
        let sealed = self.seal(&json);
        json.zeroize();
        sealed
    }

    /// Open a sealed JSON value
    pub fn open_json<T: serde::de::DeserializeOwned>(
        &self,
        sealed_b64: &str,
    ) -> Result<T, &'static str> {
        let mut plain = self.open(sealed_b64)?;
        let value = serde_json::from_slice(&plain).map_err(|_| "Sealed payload is not valid JSON");
        plain.zeroize();
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = SealKey::generate();
        let sealed = key.seal(b"user@example.com").unwrap();
        assert!(!sealed.contains("user@example.com"));
        assert_eq!(key.open(&sealed).unwrap(), b"user@example.com");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SealKey::generate().seal(b"payload").unwrap();
        assert!(SealKey::generate().open(&sealed).is_err());
    }

    #[test]
    fn test_tampered_fails() {
        let key = SealKey::generate();
        let sealed = key.seal(b"payload").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(&sealed)
            .unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = base64::engine::general_purpose::STANDARD.encode(raw);
        assert!(key.open(&tampered).is_err());
        assert!(key.open("c2hvcnQ=").is_err());
    }

    #[test]
    fn test_from_base64_length_check() {
        let b64 = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        assert!(SealKey::from_base64(&b64).is_ok());
        let short = base64::engine::general_purpose::STANDARD.encode([7u8; 16]);
        assert!(SealKey::from_base64(&short).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let key = SealKey::generate();
        let sealed = key
            .seal_json(&serde_json::json!({ "email": "user@example.com" }))
            .unwrap();
        let value: serde_json::Value = key.open_json(&sealed).unwrap();
        assert_eq!(value["email"], "user@example.com");
    }
}
