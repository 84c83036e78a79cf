use proptest::prelude::*;

use mobility_ledger::crypto::{hash, Capability};
use mobility_ledger::merkle::MerkleTree;
use mobility_ledger::registry::TrustRegistry;

fn leaf_set() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(any::<u64>(), 1..40)
        .prop_map(|seeds| seeds.iter().map(|s| hash(&format!("leaf-{s}"))).collect())
}

proptest! {
    #[test]
    fn tree_keeps_its_leaves_in_order(leaves in leaf_set()) {
        let tree = MerkleTree::build(&leaves).unwrap();
        prop_assert!(tree.validate());
        prop_assert_eq!(tree.leaves(), leaves.iter().map(String::as_str).collect::<Vec<_>>());
        prop_assert!(tree.validate_leaves(&leaves));
        for leaf in &leaves {
            let proof = tree.proof(leaf).unwrap();
            prop_assert!(proof.verify(tree.root_hash()));
        }
    }

    #[test]
    fn swapping_two_leaves_changes_the_root(
        leaves in leaf_set().prop_filter("need two leaves", |l| l.len() >= 2),
        i in any::<prop::sample::Index>(),
        j in any::<prop::sample::Index>(),
    ) {
        let (i, j) = (i.index(leaves.len()), j.index(leaves.len()));
        prop_assume!(leaves[i] != leaves[j]);
        let mut swapped = leaves.clone();
        swapped.swap(i, j);
        let a = MerkleTree::build(&leaves).unwrap();
        let b = MerkleTree::build(&swapped).unwrap();
        prop_assert_ne!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn any_subset_of_leaves_is_a_member(
        (leaves, subset) in leaf_set().prop_flat_map(|leaves| {
            let len = leaves.len();
            (Just(leaves.clone()), prop::sample::subsequence(leaves, 1..=len))
        })
    ) {
        let tree = MerkleTree::build(&leaves).unwrap();
        prop_assert!(tree.validate_leaves(&subset));
    }

    #[test]
    fn foreign_leaf_is_not_a_member(leaves in leaf_set(), stranger in any::<u64>()) {
        let candidate = hash(&format!("stranger-{stranger}"));
        prop_assume!(!leaves.contains(&candidate));
        let tree = MerkleTree::build(&leaves).unwrap();
        let mut candidates = leaves.clone();
        candidates.push(candidate);
        prop_assert!(!tree.validate_leaves(&candidates));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn blacklist_needs_votes_above_threshold(
        registered in 2usize..7,
        votes in 0usize..7,
        threshold in 0.0f64..=1.0,
        late in 0usize..4,
    ) {
        let votes = votes.min(registered - 1);
        let mut registry = TrustRegistry::new(threshold).unwrap();
        for i in 0..registered {
            let key = Capability::generate_asymmetric().unwrap();
            registry.register_principal(&format!("U{i}"), &key).unwrap();
        }
        let quorum = threshold * (registered - 1) as f64;
        for cast in 1..=votes {
            let voter = format!("U{cast}");
            prop_assert!(registry.vote_blacklist(&voter, "U0").unwrap());
            prop_assert_eq!(registry.is_blacklisted("U0"), cast as f64 > quorum);
        }
        let expected = votes as f64 > quorum;
        prop_assert_eq!(registry.is_blacklisted("U0"), expected);
        prop_assert_eq!(registry.votes_against("U0"), votes);

        // late registrations never lift an exclusion already reached
        for i in registered..registered + late {
            let key = Capability::generate_asymmetric().unwrap();
            registry.register_principal(&format!("U{i}"), &key).unwrap();
        }
        if expected {
            prop_assert!(registry.is_blacklisted("U0"));
        }
    }
}
