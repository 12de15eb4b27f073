//! Public keys trusted for ledger verification

use std::collections::HashMap;
use std::path::Path;

use base64::Engine;
use serde::Deserialize;

use crate::error::{ProofError, Result};
use crate::signer::{Algorithm, ProofSigner, PublicKey};

/// Entry of a key ring file
///
/// ```json
/// [{ "key_id": "ed25519:...", "algorithm": "ed25519", "public_key_b64": "..." }]
/// ```
#[derive(Debug, Deserialize)]
struct KeyEntry {
    key_id: String,
    algorithm: Algorithm,
    public_key_b64: String,
}

#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: HashMap<String, PublicKey>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ring holding the active signer's key
    pub fn for_signer(signer: &dyn ProofSigner) -> Self {
        let mut ring = Self::new();
        ring.insert(signer.key_id(), signer.public_key());
        ring
    }

    pub fn insert(&mut self, key_id: impl Into<String>, key: PublicKey) {
        self.keys.insert(key_id.into(), key);
    }

    pub fn get(&self, key_id: &str) -> Option<&PublicKey> {
        self.keys.get(key_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Add retired or external keys from a JSON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<KeyEntry> = serde_json::from_str(&content)
            .map_err(|e| ProofError::InvalidKey(format!("{}: {e}", path.display())))?;

        let count = entries.len();
        for entry in entries {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(entry.public_key_b64.trim())
                .map_err(|e| ProofError::InvalidKey(format!("{}: {e}", entry.key_id)))?;
            let key = PublicKey::from_bytes(entry.algorithm, &bytes)?;
            self.insert(entry.key_id, key);
        }
        Ok(count)
    }

    /// Verify a stored signature
    ///
    /// Unknown key ids and algorithm names are lookup errors. A known key
    /// whose algorithm does not match, or any bad signature, is `Ok(false)`.
    pub fn verify(
        &self,
        algorithm: &str,
        key_id: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let algorithm: Algorithm = algorithm.parse()?;
        let key = self
            .get(key_id)
            .ok_or_else(|| ProofError::UnknownKey(key_id.to_string()))?;
        if key.algorithm() != algorithm {
            return Ok(false);
        }
        Ok(key.verify(message, signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ed25519::Ed25519Signer;

    #[tokio::test]
    async fn test_verify_with_signer_ring() {
        let signer = Ed25519Signer::from_seed(&[5u8; 32], None);
        let ring = KeyRing::for_signer(&signer);
        let sig = signer.sign(b"msg").await.unwrap();

        assert!(ring.verify("ed25519", signer.key_id(), b"msg", &sig).unwrap());
        assert!(!ring.verify("ed25519", signer.key_id(), b"msh", &sig).unwrap());
        assert!(!ring.verify("rsa-pss-sha256", signer.key_id(), b"msg", &sig).unwrap());
        assert!(matches!(
            ring.verify("ed25519", "missing", b"msg", &sig),
            Err(ProofError::UnknownKey(_))
        ));
        assert!(matches!(
            ring.verify("dsa", signer.key_id(), b"msg", &sig),
            Err(ProofError::UnsupportedAlgorithm(_))
        ));
    }

    #[tokio::test]
    async fn test_load_file_adds_retired_keys() {
        let retired = Ed25519Signer::from_seed(&[1u8; 32], Some("retired-2025".into()));
        let pk_b64 =
            base64::engine::general_purpose::STANDARD.encode(retired.public_key().as_bytes());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(
            &path,
            serde_json::json!([{
                "key_id": "retired-2025",
                "algorithm": "ed25519",
                "public_key_b64": pk_b64
            }])
            .to_string(),
        )
        .unwrap();

        let mut ring = KeyRing::new();
        assert_eq!(ring.load_file(&path).unwrap(), 1);
        let sig = retired.sign(b"old root").await.unwrap();
        assert!(ring.verify("ed25519", "retired-2025", b"old root", &sig).unwrap());
    }
}
