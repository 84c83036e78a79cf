//! Trust registry: the single authoritative writer of the ledger.
//!
//! The registry is itself a channel principal so universities can reach it
//! with signed requests. Alongside the ledger it keeps the public keys of the
//! parties allowed to certify and a monotonically growing blacklist.

use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::channel::Principal;
use crate::config::Settings;
use crate::crypto::Capability;
use crate::error::{Error, Result};
use crate::ledger::{Block, Ledger};
use crate::merkle::MerkleTree;

pub const REGISTRY_CODE: &str = "SMART_CONTRACT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustRegistry {
    principal: Principal,
    ledger: Ledger,
    keys: BTreeMap<String, Capability>,
    /// Target code → fingerprints of the registered keys that voted against it.
    votes: BTreeMap<String, BTreeSet<String>>,
    /// Only ever grows: a target stays here whatever the keyring does later.
    #[serde(default)]
    blacklisted: BTreeSet<String>,
    threshold: f64,
}

impl TrustRegistry {
    pub fn new(threshold: f64) -> Result<Self> {
        let mut principal = Principal::new(REGISTRY_CODE);
        principal.set_own_key(Capability::generate_asymmetric()?);
        Ok(Self {
            principal,
            ledger: Ledger::new(),
            keys: BTreeMap::new(),
            votes: BTreeMap::new(),
            blacklisted: BTreeSet::new(),
            threshold,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.blacklist_threshold)
    }

    pub fn code(&self) -> &str {
        self.principal.code()
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn principal_mut(&mut self) -> &mut Principal {
        &mut self.principal
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn public_capability(&self) -> Result<Capability> {
        self.principal
            .own_public()
            .ok_or_else(|| Error::missing_key(self.code(), self.code()))
    }

    pub fn registered(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Insert or replace the public key of a certifying party. Only the public
    /// half is kept, and it is also installed in the registry's keyring so the
    /// party's signed requests verify.
    pub fn register_principal(&mut self, code: &str, key: &Capability) -> Result<()> {
        let public = key
            .share_public()
            .ok_or_else(|| Error::Crypto(format!("{code}: registry keys must be asymmetric")))?;
        self.principal.add_key(code, public.clone());
        self.keys.insert(code.to_string(), public);
        info!("registry: registered {code}");
        Ok(())
    }

    /// Ledger author string for `code`: the hash of its public key material.
    fn author_of(&self, code: &str) -> Result<String> {
        self.keys
            .get(code)
            .map(Capability::fingerprint)
            .ok_or_else(|| Error::NotFound(format!("principal {code} is not registered")))
    }

    /// # Errors
    /// `Error::Blacklisted` once `code` has joined the blacklist.
    pub fn ensure_trusted(&self, code: &str) -> Result<()> {
        if self.is_blacklisted(code) {
            warn!("registry: refused request from blacklisted {code}");
            return Err(Error::Blacklisted(code.to_string()));
        }
        Ok(())
    }

    /// Append a certification block for `tree` and return its id, which is
    /// the credential id handed back to the student.
    pub fn certify(&mut self, tree: MerkleTree, author_code: &str) -> Result<String> {
        self.ensure_trusted(author_code)?;
        if !tree.validate() {
            return Err(Error::InvalidTree(format!(
                "tree submitted by {author_code} does not hash to its root"
            )));
        }
        let author = self.author_of(author_code)?;
        let block = Block::certification(self.ledger.tip_id(), author, tree);
        let id = block.id.clone();
        self.ledger.append(block)?;
        info!("registry: {author_code} certified {id}");
        Ok(id)
    }

    /// Append a tombstone for `block_id`; returns the tombstone's id.
    pub fn revoke(&mut self, block_id: &str, author_code: &str) -> Result<String> {
        self.ensure_trusted(author_code)?;
        let block = self
            .ledger
            .find(block_id)
            .ok_or_else(|| Error::NotFound(format!("credential {block_id}")))?;
        if block.is_tombstone() {
            return Err(Error::PayloadKind(block_id.to_string()));
        }
        if !self.ledger.is_live(block_id) {
            return Err(Error::AlreadyRevoked(block_id.to_string()));
        }
        let tomb = self.ledger.revoke(block_id)?;
        info!("registry: {author_code} revoked {block_id}");
        Ok(tomb)
    }

    /// The block exists, certifies a tree, and has not been revoked.
    pub fn validate_id(&self, block_id: &str) -> bool {
        self.ledger
            .find(block_id)
            .is_some_and(|b| !b.is_tombstone() && self.ledger.is_live(block_id))
    }

    /// Every candidate is a leaf of the tree certified by `block_id`, and that
    /// certification is still live.
    ///
    /// # Errors
    /// `Error::InvalidTree` for an empty candidate list, `Error::PayloadKind`
    /// when `block_id` names a tombstone.
    pub fn validate_leaves(&self, leaves: &[String], block_id: &str) -> Result<bool> {
        if leaves.is_empty() {
            return Err(Error::InvalidTree("no candidate leaves".into()));
        }
        let Some(block) = self.ledger.find(block_id) else {
            return Ok(false);
        };
        let tree = block
            .tree()
            .ok_or_else(|| Error::PayloadKind(block_id.to_string()))?;
        Ok(tree.validate_leaves(leaves) && self.ledger.is_live(block_id))
    }

    /// Count a vote by the registered principal `voter` against `target`,
    /// keyed by the voter's registered key. Returns false for a repeat vote.
    ///
    /// The target joins the blacklist the first time its distinct votes
    /// exceed `threshold × (registered − 1)` and never leaves it.
    ///
    /// # Errors
    /// `Error::NotFound` when either party is unregistered;
    /// `Error::Blacklisted` when the voter itself is blacklisted.
    pub fn vote_blacklist(&mut self, voter: &str, target: &str) -> Result<bool> {
        self.ensure_trusted(voter)?;
        let ballot = self.author_of(voter)?;
        if !self.keys.contains_key(target) {
            return Err(Error::NotFound(format!("principal {target} is not registered")));
        }
        let fresh = self
            .votes
            .entry(target.to_string())
            .or_default()
            .insert(ballot);
        let peers = self.keys.len().saturating_sub(1) as f64;
        if self.votes_against(target) as f64 > self.threshold * peers
            && self.blacklisted.insert(target.to_string())
        {
            warn!("registry: {target} is now blacklisted");
        }
        info!("registry: {voter} voted against {target}");
        Ok(fresh)
    }

    pub fn votes_against(&self, target: &str) -> usize {
        self.votes.get(target).map_or(0, BTreeSet::len)
    }

    pub fn is_blacklisted(&self, target: &str) -> bool {
        self.blacklisted.contains(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash;

    fn registry_with(codes: &[&str]) -> (TrustRegistry, Vec<Capability>) {
        let mut reg = TrustRegistry::new(0.5).unwrap();
        let keys: Vec<Capability> = codes
            .iter()
            .map(|code| {
                let k = Capability::generate_asymmetric().unwrap();
                reg.register_principal(code, &k).unwrap();
                k
            })
            .collect();
        (reg, keys)
    }

    fn tree() -> MerkleTree {
        MerkleTree::build(&[hash("meta"), hash("exam")]).unwrap()
    }

    #[test]
    fn certify_uses_key_hash_as_author() {
        let (mut reg, keys) = registry_with(&["U1"]);
        let id = reg.certify(tree(), "U1").unwrap();
        let block = reg.ledger().find(&id).unwrap();
        assert_eq!(block.author, keys[0].fingerprint());
        assert!(reg.validate_id(&id));
    }

    #[test]
    fn unregistered_author_cannot_certify() {
        let (mut reg, _) = registry_with(&["U1"]);
        assert!(matches!(reg.certify(tree(), "U9"), Err(Error::NotFound(_))));
        assert!(reg.ledger().is_empty());
    }

    #[test]
    fn revoke_succeeds_exactly_once() {
        let (mut reg, _) = registry_with(&["U1"]);
        let id = reg.certify(tree(), "U1").unwrap();
        let tomb = reg.revoke(&id, "U1").unwrap();
        assert!(!reg.validate_id(&id));
        assert!(matches!(reg.revoke(&id, "U1"), Err(Error::AlreadyRevoked(_))));
        assert!(matches!(reg.revoke(&tomb, "U1"), Err(Error::PayloadKind(_))));
        assert!(matches!(reg.revoke("nope", "U1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn leaves_validate_against_tombstone_is_a_type_error() {
        let (mut reg, _) = registry_with(&["U1"]);
        let id = reg.certify(tree(), "U1").unwrap();
        let tomb = reg.revoke(&id, "U1").unwrap();
        let leaves = vec![hash("meta")];
        assert!(!reg.validate_leaves(&leaves, &id).unwrap());
        assert!(matches!(
            reg.validate_leaves(&leaves, &tomb),
            Err(Error::PayloadKind(_))
        ));
        assert!(!reg.validate_leaves(&leaves, "unknown").unwrap());
    }

    #[test]
    fn redacted_subset_still_validates() {
        let (mut reg, _) = registry_with(&["U1"]);
        let id = reg.certify(tree(), "U1").unwrap();
        assert!(reg.validate_leaves(&[hash("meta")], &id).unwrap());
        assert!(!reg.validate_leaves(&[hash("forged")], &id).unwrap());
    }

    #[test]
    fn duplicate_votes_do_not_count() {
        let (mut reg, _) = registry_with(&["U1", "U2", "U3"]);
        assert!(reg.vote_blacklist("U2", "U1").unwrap());
        assert!(!reg.vote_blacklist("U2", "U1").unwrap());
        assert_eq!(reg.votes_against("U1"), 1);
        // 1 > 0.5 * 2 is false
        assert!(!reg.is_blacklisted("U1"));
        reg.vote_blacklist("U3", "U1").unwrap();
        assert!(reg.is_blacklisted("U1"));
    }

    #[test]
    fn only_registered_principals_vote() {
        let (mut reg, _) = registry_with(&["U1", "U2", "U3"]);
        assert!(matches!(reg.vote_blacklist("X1", "U1"), Err(Error::NotFound(_))));
        assert!(matches!(reg.vote_blacklist("X2", "U1"), Err(Error::NotFound(_))));
        assert!(matches!(reg.vote_blacklist("U2", "X1"), Err(Error::NotFound(_))));
        assert_eq!(reg.votes_against("U1"), 0);
        assert!(!reg.is_blacklisted("U1"));
    }

    #[test]
    fn blacklisted_voter_is_refused() {
        let (mut reg, _) = registry_with(&["U1", "U2", "U3"]);
        reg.vote_blacklist("U2", "U1").unwrap();
        reg.vote_blacklist("U3", "U1").unwrap();
        assert!(matches!(reg.vote_blacklist("U1", "U2"), Err(Error::Blacklisted(_))));
        assert_eq!(reg.votes_against("U2"), 0);
    }

    #[test]
    fn blacklist_survives_a_growing_keyring() {
        let (mut reg, _) = registry_with(&["U1", "U2"]);
        reg.vote_blacklist("U2", "U1").unwrap();
        assert!(reg.is_blacklisted("U1"));
        for code in ["U3", "U4", "U5"] {
            let k = Capability::generate_asymmetric().unwrap();
            reg.register_principal(code, &k).unwrap();
            assert!(reg.is_blacklisted("U1"));
        }
        let restored: TrustRegistry =
            serde_json::from_value(serde_json::to_value(&reg).unwrap()).unwrap();
        assert!(restored.is_blacklisted("U1"));
    }

    #[test]
    fn blacklisted_principal_is_refused() {
        let (mut reg, _) = registry_with(&["U1", "U2", "U3"]);
        let id = reg.certify(tree(), "U1").unwrap();
        reg.vote_blacklist("U2", "U1").unwrap();
        reg.vote_blacklist("U3", "U1").unwrap();
        assert!(matches!(reg.certify(tree(), "U1"), Err(Error::Blacklisted(_))));
        assert!(matches!(reg.revoke(&id, "U1"), Err(Error::Blacklisted(_))));
        // earlier certifications stay live
        assert!(reg.validate_id(&id));
    }

    #[test]
    fn tampered_tree_is_rejected() {
        let (mut reg, _) = registry_with(&["U1"]);
        let mut json = serde_json::to_value(tree()).unwrap();
        json["root"]["hash"] = serde_json::json!("00");
        let bad: MerkleTree = serde_json::from_value(json).unwrap();
        assert!(matches!(reg.certify(bad, "U1"), Err(Error::InvalidTree(_))));
    }

    #[test]
    fn symmetric_keys_cannot_be_registered() {
        let mut reg = TrustRegistry::new(0.5).unwrap();
        let k = Capability::generate_symmetric().unwrap();
        assert!(reg.register_principal("U1", &k).is_err());
    }
}
