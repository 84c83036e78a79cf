//! Balanced Merkle tree over an ordered list of leaf hashes.
//!
//! Shape depends only on leaf count and order: the list splits at its
//! midpoint, a single leaf stands as its own subtree, and every branch hashes
//! the concatenation of its children's hex digests (left first, never sorted).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::crypto::hash;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum MerkleNode {
    Leaf {
        hash: String,
    },
    Branch {
        hash: String,
        left: Box<MerkleNode>,
        right: Box<MerkleNode>,
    },
}

impl MerkleNode {
    pub fn hash(&self) -> &str {
        match self {
            Self::Leaf { hash } | Self::Branch { hash, .. } => hash,
        }
    }

    fn build(leaves: &[String]) -> Self {
        if leaves.len() == 1 {
            return Self::Leaf {
                hash: leaves[0].clone(),
            };
        }
        let (l, r) = leaves.split_at(leaves.len() / 2);
        let left = Self::build(l);
        let right = Self::build(r);
        Self::Branch {
            hash: join_hash(left.hash(), right.hash()),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn validate(&self) -> bool {
        match self {
            Self::Leaf { hash } => !hash.is_empty(),
            Self::Branch { hash, left, right } => {
                left.validate() && right.validate() && *hash == join_hash(left.hash(), right.hash())
            }
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Leaf { hash } => out.push(hash),
            Self::Branch { left, right, .. } => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
        }
    }

    fn path_to(&self, leaf: &str, path: &mut Vec<ProofStep>) -> bool {
        match self {
            Self::Leaf { hash } => hash == leaf,
            Self::Branch { left, right, .. } => {
                if left.path_to(leaf, path) {
                    path.push(ProofStep::Right(right.hash().to_string()));
                    true
                } else if right.path_to(leaf, path) {
                    path.push(ProofStep::Left(left.hash().to_string()));
                    true
                } else {
                    false
                }
            }
        }
    }
}

fn join_hash(left: &str, right: &str) -> String {
    hash(&format!("{left}{right}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    root: MerkleNode,
}

/// Sibling hash on the way from a leaf to the root, tagged with its side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStep {
    Left(String),
    Right(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: String,
    pub path: Vec<ProofStep>,
}

impl MerkleProof {
    /// Fold the authentication path back up to a root hash.
    pub fn fold(&self) -> String {
        self.path.iter().fold(self.leaf.clone(), |cur, step| match step {
            ProofStep::Left(sib) => join_hash(sib, &cur),
            ProofStep::Right(sib) => join_hash(&cur, sib),
        })
    }

    pub fn verify(&self, root: &str) -> bool {
        self.fold() == root
    }
}

impl MerkleTree {
    /// # Errors
    /// `Error::InvalidTree` for an empty leaf list.
    pub fn build(leaves: &[String]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(Error::InvalidTree("no leaves".into()));
        }
        Ok(Self {
            root: MerkleNode::build(leaves),
        })
    }

    pub fn root(&self) -> &MerkleNode {
        &self.root
    }

    pub fn root_hash(&self) -> &str {
        self.root.hash()
    }

    /// Recompute every internal hash; any mismatch invalidates the tree.
    #[must_use]
    pub fn validate(&self) -> bool {
        self.root.validate()
    }

    pub fn leaves(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect_leaves(&mut out);
        out
    }

    /// True iff every candidate is a leaf of this exact tree.
    #[must_use]
    pub fn validate_leaves(&self, candidates: &[String]) -> bool {
        let leaves: HashSet<&str> = self.leaves().into_iter().collect();
        candidates.iter().all(|c| leaves.contains(c.as_str()))
    }

    pub fn proof(&self, leaf: &str) -> Option<MerkleProof> {
        let mut path = Vec::new();
        self.root.path_to(leaf, &mut path).then(|| MerkleProof {
            leaf: leaf.to_string(),
            path,
        })
    }
}
