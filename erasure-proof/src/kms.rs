//! Remote RSA-PSS signer backed by AWS KMS
//!
//! KMS is handed `sha256(message)` as a pre-hashed digest, so the resulting
//! signature verifies as plain RSASSA-PSS/SHA-256 over the original message.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{MessageType, SigningAlgorithmSpec};
use sha2::{Digest, Sha256};

use crate::error::{ProofError, Result};
use crate::signer::{Algorithm, ProofSigner, PublicKey};

pub struct KmsSigner {
    client: aws_sdk_kms::Client,
    key_id: String,
    public_key: PublicKey,
    timeout: Duration,
}

impl KmsSigner {
    /// Fetch the public half of `key_id` and build a signer for it
    pub async fn connect(
        client: aws_sdk_kms::Client,
        key_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let key_id = key_id.into();
        let request = client.get_public_key().key_id(&key_id).send();
        let output = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| ProofError::Timeout(timeout.as_secs()))?
            .map_err(|e| {
                ProofError::Remote(format!(
                    "GetPublicKey {key_id}: {}",
                    aws_sdk_kms::error::DisplayErrorContext(&e)
                ))
            })?;

        let der = output
            .public_key()
            .ok_or_else(|| ProofError::Remote(format!("KMS key {key_id} has no public key")))?;
        let public_key = PublicKey::from_bytes(Algorithm::RsaPssSha256, der.as_ref())?;

        tracing::info!(key_id = %key_id, "KMS ledger signer ready");
        Ok(Self {
            client,
            key_id,
            public_key,
            timeout,
        })
    }
}

#[async_trait]
impl ProofSigner for KmsSigner {
    fn algorithm(&self) -> Algorithm {
        Algorithm::RsaPssSha256
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn public_key(&self) -> PublicKey {
        self.public_key.clone()
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(message);
        let request = self
            .client
            .sign()
            .key_id(&self.key_id)
            .message(Blob::new(digest.to_vec()))
            .message_type(MessageType::Digest)
            .signing_algorithm(SigningAlgorithmSpec::RsassaPssSha256)
            .send();

        let output = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ProofError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| {
                ProofError::SigningFailed(format!(
                    "KMS Sign: {}",
                    aws_sdk_kms::error::DisplayErrorContext(&e)
                ))
            })?;

        output
            .signature()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| ProofError::SigningFailed("KMS returned no signature".into()))
    }
}
