//! Binary Merkle tree over ordered byte leaves.
//!
//! Hashing follows the Certificate Transparency convention: leaves are
//! `SHA3-256(0x00 || data)`, internal nodes `SHA3-256(0x01 || left || right)`.
//! An unpaired node at the end of a level is promoted unchanged to the next
//! level, so no step is emitted for it in inclusion proofs.

use serde::{Deserialize, Serialize};

use crate::hash::sha3_256_multi;
use crate::{CryptoError, Result};

const LEAF_PREFIX: [u8; 1] = [0x00];
const NODE_PREFIX: [u8; 1] = [0x01];

/// One step of an inclusion proof: a sibling hash and which side it sits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    #[serde(with = "hex_hash")]
    pub hash: [u8; 32],
    /// True when the sibling is the right child at this level.
    pub is_right: bool,
}

/// A Merkle tree built from an ordered list of byte leaves.
pub struct MerkleTree {
    leaf_hashes: Vec<[u8; 32]>,
    root: [u8; 32],
    height: usize,
}

impl MerkleTree {
    /// Build a tree from the given leaves. Empty input is an error.
    pub fn new<L: AsRef<[u8]>>(leaves: &[L]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(CryptoError::EmptyTree);
        }

        let leaf_hashes: Vec<[u8; 32]> =
            leaves.iter().map(|l| hash_leaf(l.as_ref())).collect();

        let mut current = leaf_hashes.clone();
        let mut height = 0;

        while current.len() > 1 {
            current = next_level(&current);
            height += 1;
        }

        Ok(Self {
            leaf_hashes,
            root: current[0],
            height,
        })
    }

    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }

    /// Height is 0 for a single leaf, otherwise the number of levels walked
    /// bottom-up minus one.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_hashes.len()
    }

    /// Generate the inclusion proof for the leaf at `index`, ordered from
    /// the leaf level upward.
    pub fn proof(&self, index: usize) -> Result<Vec<ProofStep>> {
        if index >= self.leaf_hashes.len() {
            return Err(CryptoError::LeafIndexOutOfRange {
                index,
                count: self.leaf_hashes.len(),
            });
        }

        let mut proof = Vec::new();
        let mut current = self.leaf_hashes.clone();
        let mut idx = index;

        while current.len() > 1 {
            if idx % 2 == 0 {
                // Left child; the sibling, if any, is on the right.
                if idx + 1 < current.len() {
                    proof.push(ProofStep {
                        hash: current[idx + 1],
                        is_right: true,
                    });
                }
            } else {
                proof.push(ProofStep {
                    hash: current[idx - 1],
                    is_right: false,
                });
            }

            current = next_level(&current);
            idx /= 2;
        }

        Ok(proof)
    }
}

/// Verify an inclusion proof against a claimed root.
pub fn verify_proof(leaf_data: &[u8], proof: &[ProofStep], root: &[u8; 32]) -> bool {
    let mut current = hash_leaf(leaf_data);

    for step in proof {
        current = if step.is_right {
            hash_node(&current, &step.hash)
        } else {
            hash_node(&step.hash, &current)
        };
    }

    current == *root
}

fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    for pair in level.chunks(2) {
        match pair {
            [left, right] => next.push(hash_node(left, right)),
            [odd] => next.push(*odd),
            _ => unreachable!("chunks(2) yields one or two elements"),
        }
    }
    next
}

fn hash_leaf(data: &[u8]) -> [u8; 32] {
    sha3_256_multi(&[&LEAF_PREFIX, data])
}

fn hash_node(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    sha3_256_multi(&[&NODE_PREFIX, left, right])
}

mod hex_hash {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 hex-encoded bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![(i >> 8) as u8, i as u8]).collect()
    }

    #[test]
    fn single_leaf() {
        let tree = MerkleTree::new(&[b"hello"]).unwrap();
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.height(), 0);
        // A single leaf's root is its leaf hash, provable with an empty proof.
        assert!(verify_proof(b"hello", &tree.proof(0).unwrap(), &tree.root()));
    }

    #[test]
    fn two_leaves() {
        let tree = MerkleTree::new(&[b"hello".to_vec(), b"world".to_vec()]).unwrap();
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.height(), 1);
    }

    #[test]
    fn power_of_two_height() {
        let tree = MerkleTree::new(&leaves(8)).unwrap();
        assert_eq!(tree.height(), 3);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            MerkleTree::new(&Vec::<Vec<u8>>::new()),
            Err(CryptoError::EmptyTree)
        ));
    }

    #[test]
    fn deterministic_root() {
        let data = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let root1 = MerkleTree::new(&data).unwrap().root();
        let root2 = MerkleTree::new(&data).unwrap().root();
        assert_eq!(root1, root2);
    }

    #[test]
    fn every_leaf_proves_even_and_odd_counts() {
        for n in [1, 2, 3, 5, 8, 13] {
            let data = leaves(n);
            let tree = MerkleTree::new(&data).unwrap();
            for (i, leaf) in data.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert!(
                    verify_proof(leaf, &proof, &tree.root()),
                    "proof failed for leaf {i} of {n}"
                );
                assert!(
                    !verify_proof(b"tampered", &proof, &tree.root()),
                    "tampered leaf accepted for leaf {i} of {n}"
                );
            }
        }
    }

    #[test]
    fn proof_rejects_out_of_range_index() {
        let tree = MerkleTree::new(&leaves(2)).unwrap();
        assert!(tree.proof(2).is_err());
    }

    #[test]
    fn proof_fails_against_wrong_root() {
        let data = leaves(4);
        let tree = MerkleTree::new(&data).unwrap();
        let proof = tree.proof(0).unwrap();
        assert!(!verify_proof(&data[0], &proof, &[0u8; 32]));
    }

    #[test]
    fn proof_steps_serialize_as_hex() {
        let tree = MerkleTree::new(&leaves(4)).unwrap();
        let proof = tree.proof(1).unwrap();

        let json = serde_json::to_string(&proof).unwrap();
        let parsed: Vec<ProofStep> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, proof);
    }

    #[test]
    fn large_tree() {
        let data = leaves(1000);
        let tree = MerkleTree::new(&data).unwrap();
        assert_eq!(tree.leaf_count(), 1000);

        for idx in [0, 499, 999] {
            let proof = tree.proof(idx).unwrap();
            assert!(verify_proof(&data[idx], &proof, &tree.root()));
        }
    }
}
