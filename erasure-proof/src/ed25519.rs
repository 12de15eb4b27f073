//! Local Ed25519 signer

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signer as _, SigningKey};

use crate::error::{ProofError, Result};
use crate::hash::sha256_hex;
use crate::signer::{Algorithm, ProofSigner, PublicKey};

pub struct Ed25519Signer {
    key: SigningKey,
    key_id: String,
}

impl Ed25519Signer {
    /// Build from a 32-byte seed. Without an explicit id the key id is
    /// `ed25519:` plus the first 16 hex chars of sha256(public key).
    pub fn from_seed(seed: &[u8; 32], key_id: Option<String>) -> Self {
        let key = SigningKey::from_bytes(seed);
        let key_id = key_id.unwrap_or_else(|| derive_key_id(&key));
        Self { key, key_id }
    }

    /// Accepts a base64 32-byte seed
    pub fn from_base64(b64: &str, key_id: Option<String>) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|e| ProofError::InvalidKey(format!("base64: {e}")))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            ProofError::InvalidKey(format!("seed must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self::from_seed(&seed, key_id))
    }

    /// Accepts a PKCS#8 PEM private key
    pub fn from_pkcs8_pem(pem: &str, key_id: Option<String>) -> Result<Self> {
        let key =
            SigningKey::from_pkcs8_pem(pem).map_err(|e| ProofError::InvalidKey(e.to_string()))?;
        let key_id = key_id.unwrap_or_else(|| derive_key_id(&key));
        Ok(Self { key, key_id })
    }

    /// Load from a file holding either a PKCS#8 PEM or a base64 seed
    pub fn from_file(path: &Path, key_id: Option<String>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.contains("-----BEGIN") {
            Self::from_pkcs8_pem(&content, key_id)
        } else {
            Self::from_base64(&content, key_id)
        }
    }
}

fn derive_key_id(key: &SigningKey) -> String {
    let digest = sha256_hex(key.verifying_key().as_bytes());
    format!("ed25519:{}", &digest[..16])
}

#[async_trait]
impl ProofSigner for Ed25519Signer {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Ed25519
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::Ed25519(self.key.verifying_key().to_bytes())
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}
