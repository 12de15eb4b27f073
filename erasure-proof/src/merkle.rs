//! Binary Merkle tree over 32-byte leaves
//!
//! Parents are `sha256(left || right)` over the raw digest bytes. A level
//! with an odd number of nodes pairs its last node with itself. A single
//! leaf is its own root; an empty set has no root.

use serde::{Deserialize, Serialize};

use crate::hash::{Hash32, sha256};

fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    sha256(&combined)
}

fn next_level(level: &[Hash32]) -> Vec<Hash32> {
    level
        .chunks(2)
        .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
        .collect()
}

/// Root of the tree, `None` for no leaves
pub fn merkle_root(leaves: &[Hash32]) -> Option<Hash32> {
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.first().copied()
}

/// One step of an inclusion path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling digest (hex)
    pub sibling: String,
    /// Sibling sits on the left of the running hash
    pub sibling_is_left: bool,
}

/// Inclusion path of one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_index: usize,
    pub leaf: String,
    pub path: Vec<ProofStep>,
    pub root: String,
}

/// Build the inclusion path for `leaves[index]`
pub fn inclusion_proof(leaves: &[Hash32], index: usize) -> Option<InclusionProof> {
    let leaf = *leaves.get(index)?;
    let mut path = Vec::new();
    let mut level = leaves.to_vec();
    let mut i = index;

    while level.len() > 1 {
        let (sibling, sibling_is_left) = if i % 2 == 0 {
            (*level.get(i + 1).unwrap_or(&level[i]), false)
        } else {
            (level[i - 1], true)
        };
        path.push(ProofStep {
            sibling: hex::encode(sibling),
            sibling_is_left,
        });
        level = next_level(&level);
        i /= 2;
    }

    Some(InclusionProof {
        leaf_index: index,
        leaf: hex::encode(leaf),
        path,
        root: hex::encode(level[0]),
    })
}

/// Fold an inclusion path and compare against its claimed root
pub fn verify_inclusion(proof: &InclusionProof) -> bool {
    let Ok(mut running) = crate::hash::parse_hash_hex(&proof.leaf) else {
        return false;
    };
    for step in &proof.path {
        let Ok(sibling) = crate::hash::parse_hash_hex(&step.sibling) else {
            return false;
        };
        running = if step.sibling_is_left {
            hash_pair(&sibling, &running)
        } else {
            hash_pair(&running, &sibling)
        };
    }
    hex::encode(running) == proof.root
}
