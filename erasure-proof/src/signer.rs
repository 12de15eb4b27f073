use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use ed25519_dalek::Verifier as _;
use rsa::pkcs8::DecodePublicKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{ProofError, Result};

/// Signature scheme of a ledger record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "rsa-pss-sha256")]
    RsaPssSha256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::RsaPssSha256 => "rsa-pss-sha256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ProofError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ed25519" => Ok(Self::Ed25519),
            "rsa-pss-sha256" => Ok(Self::RsaPssSha256),
            other => Err(ProofError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Public verification material for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    /// Raw 32-byte Ed25519 public key
    Ed25519([u8; 32]),
    /// DER SubjectPublicKeyInfo of an RSA key
    RsaPssSha256(Vec<u8>),
}

impl PublicKey {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Ed25519(_) => Algorithm::Ed25519,
            Self::RsaPssSha256(_) => Algorithm::RsaPssSha256,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Ed25519(bytes) => bytes,
            Self::RsaPssSha256(der) => der,
        }
    }

    pub fn from_bytes(algorithm: Algorithm, bytes: &[u8]) -> Result<Self> {
        match algorithm {
            Algorithm::Ed25519 => {
                let raw: [u8; 32] = bytes.try_into().map_err(|_| {
                    ProofError::InvalidKey(format!("ed25519 key must be 32 bytes, got {}", bytes.len()))
                })?;
                ed25519_dalek::VerifyingKey::from_bytes(&raw)
                    .map_err(|e| ProofError::InvalidKey(e.to_string()))?;
                Ok(Self::Ed25519(raw))
            }
            Algorithm::RsaPssSha256 => {
                rsa::RsaPublicKey::from_public_key_der(bytes)
                    .map_err(|e| ProofError::InvalidKey(e.to_string()))?;
                Ok(Self::RsaPssSha256(bytes.to_vec()))
            }
        }
    }

    /// Check `signature` over `message`
    ///
    /// Malformed keys or signatures verify as `false`; this never panics.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::Ed25519(raw) => {
                let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(raw) else {
                    return false;
                };
                let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
                    return false;
                };
                key.verify(message, &sig).is_ok()
            }
            Self::RsaPssSha256(der) => {
                use rsa::signature::Verifier;

                let Ok(key) = rsa::RsaPublicKey::from_public_key_der(der) else {
                    return false;
                };
                let Ok(sig) = rsa::pss::Signature::try_from(signature) else {
                    return false;
                };
                rsa::pss::VerifyingKey::<Sha256>::new(key)
                    .verify(message, &sig)
                    .is_ok()
            }
        }
    }
}

/// A signature together with the key that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEnvelope {
    pub algorithm: Algorithm,
    pub key_id: String,
    pub signature: Vec<u8>,
}

impl SignatureEnvelope {
    pub fn signature_b64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.signature)
    }
}

/// Ledger signing backend
///
/// Callers never see private key material; they hand over a message and get
/// a signature back. Backends may be local (Ed25519) or remote (KMS).
#[async_trait]
pub trait ProofSigner: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    fn key_id(&self) -> &str;

    fn public_key(&self) -> PublicKey;

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    async fn sign_envelope(&self, message: &[u8]) -> Result<SignatureEnvelope> {
        let signature = self.sign(message).await?;
        Ok(SignatureEnvelope {
            algorithm: self.algorithm(),
            key_id: self.key_id().to_string(),
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_str_roundtrip() {
        for alg in [Algorithm::Ed25519, Algorithm::RsaPssSha256] {
            assert_eq!(alg.as_str().parse::<Algorithm>().unwrap(), alg);
        }
        assert!("hmac-sha256".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_garbage_public_key_rejected() {
        assert!(PublicKey::from_bytes(Algorithm::Ed25519, &[1, 2, 3]).is_err());
        assert!(PublicKey::from_bytes(Algorithm::RsaPssSha256, b"not der").is_err());
    }

    #[test]
    fn test_verify_with_malformed_signature_is_false() {
        let key = PublicKey::RsaPssSha256(b"not der".to_vec());
        assert!(!key.verify(b"m", b"sig"));
    }
}
