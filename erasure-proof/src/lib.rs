//! Evidence hashing, Merkle rollups and ledger signatures
//!
//! Everything here is pure or talks only to a signing backend; persistence
//! lives in the service.

mod ed25519;
mod error;
mod hash;
mod keyring;
mod kms;
pub mod merkle;
pub mod signer;

pub use ed25519::Ed25519Signer;
pub use error::{ProofError, Result};
pub use hash::{ArtifactHashes, Hash32, parse_hash_hex, receipt_leaf, sha256, sha256_hex};
pub use keyring::KeyRing;
pub use kms::KmsSigner;
pub use merkle::{InclusionProof, inclusion_proof, merkle_root, verify_inclusion};
pub use signer::{Algorithm, ProofSigner, PublicKey, SignatureEnvelope};
