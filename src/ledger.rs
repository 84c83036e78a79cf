use serde::{Deserialize, Serialize};

use crate::crypto::hash;
use crate::error::{Error, Result};
use crate::merkle::MerkleTree;

pub const GENESIS_SEED: &str = "Genesis Block";

/// `prev_id` expected of the very first block.
pub fn genesis_id() -> String {
    hash(GENESIS_SEED)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Certification(MerkleTree),
    Tombstone(String),
}

impl Payload {
    /// Merkle root for certifications, referenced block id for tombstones.
    pub fn digest(&self) -> &str {
        match self {
            Self::Certification(tree) => tree.root_hash(),
            Self::Tombstone(target) => target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub prev_id: String,
    pub author: String,
    pub payload: Payload,
    pub id: String,
}

impl Block {
    pub fn new(prev_id: String, author: String, payload: Payload) -> Self {
        let id = Self::compute_id(&prev_id, &author, &payload);
        Self {
            prev_id,
            author,
            payload,
            id,
        }
    }

    pub fn certification(prev_id: String, author: String, tree: MerkleTree) -> Self {
        Self::new(prev_id, author, Payload::Certification(tree))
    }

    pub fn tombstone(prev_id: String, author: String, target: String) -> Self {
        Self::new(prev_id, author, Payload::Tombstone(target))
    }

    pub fn compute_id(prev_id: &str, author: &str, payload: &Payload) -> String {
        let is_tombstone = matches!(payload, Payload::Tombstone(_));
        hash(&format!(
            "{prev_id}{author}{}{is_tombstone}",
            payload.digest()
        ))
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.payload, Payload::Tombstone(_))
    }

    pub fn tree(&self) -> Option<&MerkleTree> {
        match &self.payload {
            Payload::Certification(tree) => Some(tree),
            Payload::Tombstone(_) => None,
        }
    }

    /// A tombstone pointing at `target`.
    pub fn revokes(&self, target: &str) -> bool {
        matches!(&self.payload, Payload::Tombstone(t) if t == target)
    }
}

/// Append-only, hash-linked sequence of blocks.
///
/// Deserialising re-appends every block, so a stored chain with a broken
/// link fails to load instead of coming back half-trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Block>", into = "Vec<Block>")]
pub struct Ledger {
    blocks: Vec<Block>,
}

impl TryFrom<Vec<Block>> for Ledger {
    type Error = Error;

    fn try_from(blocks: Vec<Block>) -> Result<Self> {
        Self::from_blocks(blocks)
    }
}

impl From<Ledger> for Vec<Block> {
    fn from(ledger: Ledger) -> Self {
        ledger.blocks
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `Error::ChainLink` at the first block that does not link to its predecessor.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self> {
        let mut ledger = Self::new();
        for block in blocks {
            ledger.append(block)?;
        }
        Ok(ledger)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn last(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Id the next block must link to.
    pub fn tip_id(&self) -> String {
        self.last().map_or_else(genesis_id, |b| b.id.clone())
    }

    /// # Errors
    /// `Error::ChainLink` when `block.prev_id` is not the current tip; the
    /// ledger is left untouched.
    pub fn append(&mut self, block: Block) -> Result<()> {
        let expected = self.tip_id();
        if block.prev_id != expected {
            return Err(Error::ChainLink {
                expected,
                found: block.prev_id,
            });
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn find(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    pub fn next(&self, block: &Block) -> Option<&Block> {
        let pos = self.position(&block.id)?;
        self.blocks.get(pos + 1)
    }

    /// Append a tombstone for `target_id`, authored by the target's author.
    pub fn revoke(&mut self, target_id: &str) -> Result<String> {
        let target = self
            .find(target_id)
            .ok_or_else(|| Error::NotFound(format!("block {target_id}")))?;
        let block = Block::tombstone(self.tip_id(), target.author.clone(), target_id.to_string());
        let id = block.id.clone();
        self.append(block)?;
        Ok(id)
    }

    /// Certified and not yet followed by a tombstone referencing it.
    pub fn is_live(&self, target_id: &str) -> bool {
        let Some(mut cur) = self.find(target_id) else {
            return false;
        };
        while let Some(next) = self.next(cur) {
            if next.revokes(target_id) {
                return false;
            }
            cur = next;
        }
        true
    }

    pub fn is_valid(&self) -> bool {
        let mut expected = genesis_id();
        for b in &self.blocks {
            if b.prev_id != expected || b.id != Block::compute_id(&b.prev_id, &b.author, &b.payload)
            {
                return false;
            }
            expected = b.id.clone();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(tag: &str) -> MerkleTree {
        MerkleTree::build(&[hash(tag), hash(&format!("{tag}-2"))]).unwrap()
    }

    fn certify(ledger: &mut Ledger, tag: &str) -> String {
        let b = Block::certification(ledger.tip_id(), hash("author"), tree(tag));
        let id = b.id.clone();
        ledger.append(b).unwrap();
        id
    }

    #[test]
    fn first_block_links_to_genesis() {
        let mut ledger = Ledger::new();
        let bad = Block::certification("nope".into(), "a".into(), tree("x"));
        let err = ledger.append(bad).unwrap_err();
        assert!(matches!(err, Error::ChainLink { .. }));
        assert!(ledger.is_empty());

        certify(&mut ledger, "x");
        assert_eq!(ledger.blocks()[0].prev_id, genesis_id());
        assert!(ledger.is_valid());
    }

    #[test]
    fn wrong_prev_leaves_ledger_unchanged() {
        let mut ledger = Ledger::new();
        certify(&mut ledger, "a");
        certify(&mut ledger, "b");
        let before = ledger.clone();
        let stale = Block::certification(genesis_id(), "a".into(), tree("c"));
        assert!(ledger.append(stale).is_err());
        assert_eq!(ledger, before);
    }

    #[test]
    fn revocation_is_an_appended_event() {
        let mut ledger = Ledger::new();
        let id = certify(&mut ledger, "a");
        certify(&mut ledger, "b");
        assert!(ledger.is_live(&id));

        let tomb = ledger.revoke(&id).unwrap();
        assert!(!ledger.is_live(&id));
        assert_eq!(ledger.len(), 3);
        let tomb_block = ledger.find(&tomb).unwrap();
        assert!(tomb_block.is_tombstone());
        assert_eq!(tomb_block.author, ledger.find(&id).unwrap().author);
        assert!(ledger.find(&id).unwrap().tree().is_some());
        assert!(ledger.is_valid());
    }

    #[test]
    fn unknown_id_is_not_live() {
        let ledger = Ledger::new();
        assert!(!ledger.is_live("missing"));
    }

    #[test]
    fn from_blocks_detects_reordering() {
        let mut ledger = Ledger::new();
        certify(&mut ledger, "a");
        certify(&mut ledger, "b");
        let mut blocks = ledger.blocks().to_vec();
        blocks.swap(0, 1);
        assert!(matches!(
            Ledger::from_blocks(blocks),
            Err(Error::ChainLink { .. })
        ));
    }

    #[test]
    fn deserialising_a_spliced_chain_fails() {
        let mut ledger = Ledger::new();
        certify(&mut ledger, "a");
        certify(&mut ledger, "b");
        let mut json = serde_json::to_value(&ledger).unwrap();
        json.as_array_mut().unwrap().remove(0);
        assert!(serde_json::from_value::<Ledger>(json).is_err());
    }

    #[test]
    fn tombstone_id_differs_from_certification_with_same_digest() {
        let p = genesis_id();
        let leaf = hash("d");
        let cert = Payload::Certification(MerkleTree::build(&[leaf.clone()]).unwrap());
        let tomb = Payload::Tombstone(leaf);
        assert_eq!(cert.digest(), tomb.digest());
        assert_ne!(
            Block::compute_id(&p, "x", &cert),
            Block::compute_id(&p, "x", &tomb)
        );
    }
}
