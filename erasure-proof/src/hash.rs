//! Evidence hashing
//!
//! A receipt leaf binds a job id to the hashes of its captured page and
//! screenshot: `sha256("{job_id}:{html_sha256}:{screenshot_sha256}")`.

use sha2::{Digest, Sha256};

use crate::error::{ProofError, Result};

/// 32-byte SHA-256 digest
pub type Hash32 = [u8; 32];

pub fn sha256(data: &[u8]) -> Hash32 {
    Sha256::digest(data).into()
}

/// Lowercase hex SHA-256 of raw bytes
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Content hashes of captured submission evidence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHashes {
    pub html_sha256: String,
    pub screenshot_sha256: String,
}

impl ArtifactHashes {
    pub fn compute(html: &[u8], screenshot: &[u8]) -> Self {
        Self {
            html_sha256: sha256_hex(html),
            screenshot_sha256: sha256_hex(screenshot),
        }
    }
}

/// Merkle leaf for one receipt
pub fn receipt_leaf(job_id: i64, html_sha256: &str, screenshot_sha256: &str) -> Hash32 {
    sha256(format!("{job_id}:{html_sha256}:{screenshot_sha256}").as_bytes())
}

/// Parse a 64-char hex digest
pub fn parse_hash_hex(s: &str) -> Result<Hash32> {
    let bytes = hex::decode(s.trim()).map_err(|e| ProofError::InvalidHash(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| ProofError::InvalidHash(format!("expected 32 bytes, got {}", b.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_receipt_leaf_binds_job_id() {
        let hashes = ArtifactHashes::compute(b"<html></html>", b"\x89PNG");
        let a = receipt_leaf(1, &hashes.html_sha256, &hashes.screenshot_sha256);
        let b = receipt_leaf(2, &hashes.html_sha256, &hashes.screenshot_sha256);
        assert_ne!(a, b);
        assert_eq!(
            a,
            sha256(format!("1:{}:{}", hashes.html_sha256, hashes.screenshot_sha256).as_bytes())
        );
    }

    #[test]
    fn test_parse_hash_hex() {
        let h = sha256(b"x");
        assert_eq!(parse_hash_hex(&hex::encode(h)).unwrap(), h);
        assert!(parse_hash_hex("abcd").is_err());
        assert!(parse_hash_hex("zz").is_err());
    }
}
