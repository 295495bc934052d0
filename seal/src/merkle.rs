//! Binary SHA-254 trees built with `merkletree`.
//!
//! Trees are persisted as [`DiskStore`]s named by [`StoreConfig`], so every
//! level sits in one file laid out leaves first and root last.

use std::hash::Hasher;

use anyhow::{ensure, Context, Result};
use log::trace;
use merkletree::hash::Algorithm;
use merkletree::merkle::{get_merkle_tree_len, Element, FromIndexedParallelIterator, MerkleTree};
use merkletree::proof::Proof;
use merkletree::store::{DiskStore, Store, StoreConfig, VecStore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use typenum::{U0, U2};

use crate::constants::NODE_SIZE;
use crate::hasher::trim_to_fr32;
use crate::types::Commitment;
use crate::util::remove_if_exists;

pub const BINARY_ARITY: usize = 2;

/// Leaves hashed per in-memory subtree when a root is recomputed from disk.
const ROOT_CHUNK_LEAFS: usize = 1 << 16;

#[inline]
pub(crate) fn read_node(bytes: &[u8], index: usize) -> Commitment {
    let mut node = [0u8; 32];
    node.copy_from_slice(&bytes[index * NODE_SIZE..(index + 1) * NODE_SIZE]);
    node
}

/// A tree node. Wraps a commitment so it can be stored by `merkletree`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Node(pub Commitment);

impl AsRef<[u8]> for Node {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Element for Node {
    #[inline]
    fn byte_len() -> usize {
        NODE_SIZE
    }

    #[inline]
    fn from_slice(bytes: &[u8]) -> Self {
        Node(read_node(bytes, 0))
    }

    #[inline]
    fn copy_to_slice(&self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.0);
    }
}

/// SHA-256 with the digest trimmed to 254 bits.
#[derive(Clone, Default)]
pub struct Sha254Algorithm(Sha256);

impl Hasher for Sha254Algorithm {
    #[inline]
    fn write(&mut self, msg: &[u8]) {
        self.0.update(msg);
    }

    #[inline]
    fn finish(&self) -> u64 {
        let digest = self.0.clone().finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(head)
    }
}

impl Algorithm<Node> for Sha254Algorithm {
    #[inline]
    fn hash(&mut self) -> Node {
        Node(trim_to_fr32(self.0.clone().finalize().into()))
    }

    #[inline]
    fn reset(&mut self) {
        self.0 = Sha256::new();
    }

    fn node(&mut self, left: Node, right: Node, height: usize) -> Node {
        self.multi_node(&[left, right], height)
    }

    fn multi_node(&mut self, nodes: &[Node], _height: usize) -> Node {
        self.reset();
        for node in nodes {
            self.write(node.as_ref());
        }
        self.hash()
    }
}

pub type BinaryTree<S> = MerkleTree<Node, Sha254Algorithm, S, U2>;

/// A tree whose levels live in a store file in the cache directory.
pub type DiskTree = BinaryTree<DiskStore<Node>>;

/// Number of nodes in a binary tree over `leafs` leaves.
#[inline]
pub fn tree_len(leafs: usize) -> Result<usize> {
    get_merkle_tree_len(leafs, BINARY_ARITY)
}

/// Builds a tree over `leafs` nodes produced by `leaf` into the store named
/// by `config`. A store already at that path is replaced.
pub fn build_disk_tree<F>(config: StoreConfig, leafs: usize, leaf: F) -> Result<DiskTree>
where
    F: Fn(usize) -> Node + Send + Sync,
{
    let data_path = StoreConfig::data_path(&config.path, &config.id);
    remove_if_exists(&data_path)?;

    let tree = DiskTree::from_par_iter_with_config((0..leafs).into_par_iter().map(leaf), config)
        .with_context(|| format!("could not build tree {:?}", data_path))?;
    trace!(
        "built tree {:?}: {} leafs, {} nodes",
        data_path,
        tree.leafs(),
        tree.len()
    );
    Ok(tree)
}

/// Opens the store of a tree over `leafs` leaves without reading it.
pub fn open_store(config: &StoreConfig, leafs: usize) -> Result<DiskStore<Node>> {
    let data_path = StoreConfig::data_path(&config.path, &config.id);
    DiskStore::new_from_disk(tree_len(leafs)?, BINARY_ARITY, config)
        .with_context(|| format!("could not open tree store={:?}", data_path))
}

pub fn open_disk_tree(config: &StoreConfig, leafs: usize) -> Result<DiskTree> {
    let store = open_store(config, leafs)?;
    DiskTree::from_data_store(store, leafs)
}

/// Whether the store named by `config` has the size of a tree over `leafs`.
pub fn is_consistent(config: &StoreConfig, leafs: usize) -> Result<bool> {
    DiskStore::<Node>::is_consistent(tree_len(leafs)?, BINARY_ARITY, config)
}

/// The root as stored in the last node of `store`.
pub fn stored_root(store: &DiskStore<Node>) -> Result<Commitment> {
    ensure!(Store::len(store) > 0, "tree store is empty");
    Ok(store.read_at(Store::len(store) - 1)?.0)
}

/// Recomputes the root from the leaves of `store`, reading them a chunk at a
/// time so upper levels are never loaded.
pub fn recompute_root(store: &DiskStore<Node>, leafs: usize) -> Result<Commitment> {
    ensure!(
        leafs > 1 && leafs.is_power_of_two(),
        "leaf count {} must be a power of two above one",
        leafs
    );
    let chunk = leafs.min(ROOT_CHUNK_LEAFS);

    let roots = (0..leafs / chunk)
        .map(|i| {
            let leaves = store.read_range(i * chunk..(i + 1) * chunk)?;
            Ok(BinaryTree::<VecStore<Node>>::from_par_iter(leaves)?.root())
        })
        .collect::<Result<Vec<Node>>>()?;

    match roots.as_slice() {
        [root] => Ok(root.0),
        _ => Ok(BinaryTree::<VecStore<Node>>::from_par_iter(roots)?.root().0),
    }
}

/// Inclusion proof of one leaf, in the form `merkletree` validates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub index: u64,
    /// The leaf, its sibling on every level, then the root.
    pub lemma: Vec<Commitment>,
    /// Side of the path node on every level, leaves first.
    pub path: Vec<usize>,
}

impl MerkleProof {
    pub fn generate<S: Store<Node>>(tree: &BinaryTree<S>, index: usize) -> Result<Self> {
        let proof = tree
            .gen_proof(index)
            .with_context(|| format!("could not open leaf {}", index))?;
        Ok(MerkleProof {
            index: index as u64,
            lemma: proof.lemma().iter().map(|node| node.0).collect(),
            path: proof.path().clone(),
        })
    }

    #[inline]
    pub fn leaf(&self) -> Commitment {
        self.lemma.first().copied().unwrap_or_default()
    }

    #[inline]
    pub fn root(&self) -> Commitment {
        self.lemma.last().copied().unwrap_or_default()
    }

    fn path_index(&self) -> u64 {
        self.path
            .iter()
            .rev()
            .fold(0, |acc, &side| (acc << 1) | side as u64)
    }

    pub fn verify(&self, root: &Commitment) -> bool {
        if self.lemma.last() != Some(root) || self.path_index() != self.index {
            return false;
        }
        let lemma = self.lemma.iter().copied().map(Node).collect();
        Proof::<Node, U2>::new::<U0, U0>(None, lemma, self.path.clone())
            .and_then(|proof| proof.validate::<Sha254Algorithm>())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache_key::CacheKey;
    use crate::hasher::hash_nodes;
    use tempfile::tempdir;

    fn leaf(i: usize) -> Node {
        let mut leaf = [0u8; 32];
        leaf[..8].copy_from_slice(&(i as u64).to_le_bytes());
        Node(leaf)
    }

    #[test]
    fn algorithm_matches_node_hash() {
        let mut a = Sha254Algorithm::default();
        let left = leaf(1);
        let right = leaf(2);
        assert_eq!(a.node(left, right, 0).0, hash_nodes(&left.0, &right.0));
        assert_eq!(a.multi_node(&[left, right], 3).0, hash_nodes(&left.0, &right.0));

        let tree = BinaryTree::<VecStore<Node>>::from_par_iter((0..4).map(leaf).collect::<Vec<_>>())
            .unwrap();
        let expected = hash_nodes(
            &hash_nodes(&leaf(0).0, &leaf(1).0),
            &hash_nodes(&leaf(2).0, &leaf(3).0),
        );
        assert_eq!(tree.root().0, expected);
    }

    #[test]
    fn disk_tree_persists_every_level() -> Result<()> {
        let dir = tempdir()?;
        let config = CacheKey::CommCTree.store_config(dir.path());
        let tree = build_disk_tree(config.clone(), 16, leaf)?;

        assert_eq!(
            std::fs::metadata(CacheKey::CommCTree.path(dir.path()))?.len(),
            (tree_len(16)? * NODE_SIZE) as u64
        );
        assert!(is_consistent(&config, 16)?);
        assert!(!is_consistent(&config, 8)?);

        let store = open_store(&config, 16)?;
        assert_eq!(stored_root(&store)?, tree.root().0);
        assert_eq!(recompute_root(&store, 16)?, tree.root().0);
        assert_eq!(open_disk_tree(&config, 16)?.root(), tree.root());

        assert!(open_store(&config, 8).is_err());
        Ok(())
    }

    #[test]
    fn rebuilding_replaces_the_store() -> Result<()> {
        let dir = tempdir()?;
        let config = CacheKey::CommDTree.store_config(dir.path());
        let first = build_disk_tree(config.clone(), 8, leaf)?.root();
        let second = build_disk_tree(config, 8, |i| leaf(i + 1))?.root();
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn proofs_verify_against_root() -> Result<()> {
        let dir = tempdir()?;
        let config = CacheKey::CommRLastTree.store_config(dir.path());
        build_disk_tree(config.clone(), 32, leaf)?;
        let tree = open_disk_tree(&config, 32)?;
        let root = tree.root().0;

        for index in [0, 1, 17, 31] {
            let proof = MerkleProof::generate(&tree, index)?;
            assert_eq!(proof.path.len(), 5);
            assert_eq!(proof.leaf(), leaf(index).0);
            assert_eq!(proof.root(), root);
            assert!(proof.verify(&root));

            let mut tampered = proof.clone();
            tampered.lemma[0][0] ^= 1;
            assert!(!tampered.verify(&root));

            let mut moved = proof.clone();
            moved.index ^= 1;
            assert!(!moved.verify(&root));
        }
        assert!(MerkleProof::generate(&tree, 32).is_err());
        Ok(())
    }

    #[test]
    fn recompute_root_spans_chunks() -> Result<()> {
        let dir = tempdir()?;
        let config = CacheKey::CommDTree.store_config(dir.path());
        let leafs = ROOT_CHUNK_LEAFS * 2;
        let tree = build_disk_tree(config.clone(), leafs, leaf)?;
        let store = open_store(&config, leafs)?;
        assert_eq!(recompute_root(&store, leafs)?, tree.root().0);
        Ok(())
    }
}
