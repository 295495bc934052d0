use std::io::ErrorKind;
use std::path::Path;

use anyhow::{ensure, Context};
use log::{debug, info, warn};

use crate::cache_key::CacheKey;
use crate::constants::NODE_SIZE;
use crate::error::{Result, SealError};
use crate::hasher::{self, zero_commitment};
use crate::merkle::{open_store, recompute_root, stored_root};
use crate::types::{Commitment, CommitmentKind, PersistentAux, SectorSize, TemporaryAux};
use crate::util::{persist_bincode, read_bincode};

fn read_p_aux(cache_path: &Path) -> Option<PersistentAux> {
    let path = CacheKey::PAux.path(cache_path);
    match std::fs::metadata(&path) {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("no p_aux in {:?}", cache_path);
            return None;
        }
        Err(e) => {
            warn!("could not stat {:?}: {}", path, e);
            return None;
        }
        Ok(_) => {}
    }

    match read_bincode::<PersistentAux>(&path) {
        Ok(p_aux) => Some(p_aux),
        Err(e) => {
            warn!("malformed p_aux in {:?}: {:#}", cache_path, e);
            None
        }
    }
}

pub fn get_comm_c(cache_path: &Path) -> Option<Commitment> {
    read_p_aux(cache_path)?.comm_c
}

pub fn get_comm_r_last(cache_path: &Path) -> Option<Commitment> {
    read_p_aux(cache_path)?.comm_r_last
}

/// `comm_r` is never stored; it is combined from `comm_c` and `comm_r_last`
/// and is absent unless both were written.
pub fn get_comm_r(cache_path: &Path) -> Option<Commitment> {
    let p_aux = read_p_aux(cache_path)?;
    Some(hasher::comm_r(&p_aux.comm_c?, &p_aux.comm_r_last?))
}

/// Root stored in the last node of the tree_d store. Only that node is read.
pub fn get_comm_d(cache_path: &Path) -> Option<Commitment> {
    let path = CacheKey::CommDTree.path(cache_path);
    let len = match std::fs::metadata(&path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("no tree_d in {:?}", cache_path);
            return None;
        }
        Err(e) => {
            warn!("could not stat {:?}: {}", path, e);
            return None;
        }
    };

    // A binary tree over n > 1 leaves holds 2n - 1 nodes.
    let nodes = (len / NODE_SIZE as u64) as usize;
    if len % NODE_SIZE as u64 != 0 || nodes < 3 || !(nodes + 1).is_power_of_two() {
        warn!("malformed tree_d in {:?}: {} bytes", cache_path, len);
        return None;
    }

    match open_store(&CacheKey::CommDTree.store_config(cache_path), (nodes + 1) / 2)
        .and_then(|store| stored_root(&store))
    {
        Ok(root) => Some(root),
        Err(e) => {
            warn!("could not read tree_d root in {:?}: {:#}", cache_path, e);
            None
        }
    }
}

/// `comm_d` of a committed-capacity sector: the root of an all-zero tree.
pub fn cc_comm_d(sector_size: SectorSize) -> Option<Commitment> {
    if !sector_size.is_supported() {
        return None;
    }
    zero_commitment(sector_size.nodes())
}

// A missing or malformed p_aux is replaced by one holding only the new value.
fn update_p_aux<F>(cache_path: &Path, kind: CommitmentKind, update: F) -> Result<()>
where
    F: FnOnce(&mut PersistentAux),
{
    let mut p_aux = read_p_aux(cache_path).unwrap_or_default();
    update(&mut p_aux);

    let path = CacheKey::PAux.path(cache_path);
    persist_bincode(&path, &p_aux).map_err(|source| SealError::CommitmentWrite {
        kind,
        path,
        source,
    })?;
    debug!("{} written to {:?}", kind, cache_path);
    Ok(())
}

pub fn set_comm_c(cache_path: &Path, comm_c: &Commitment) -> Result<()> {
    update_p_aux(cache_path, CommitmentKind::C, |p| p.comm_c = Some(*comm_c))
}

pub fn set_comm_r_last(cache_path: &Path, comm_r_last: &Commitment) -> Result<()> {
    update_p_aux(cache_path, CommitmentKind::RLast, |p| {
        p.comm_r_last = Some(*comm_r_last)
    })
}

// The leaf count follows from the sector size; t_aux, when present, only
// has to agree with it.
fn tree_leafs(cache_path: &Path, sector_size: SectorSize) -> anyhow::Result<usize> {
    let leafs = sector_size.nodes();
    match read_bincode::<TemporaryAux>(&CacheKey::TAux.path(cache_path)) {
        Ok(t_aux) => {
            ensure!(
                t_aux.leafs == leafs,
                "t_aux records {} leafs, a {} sector has {}",
                t_aux.leafs,
                sector_size,
                leafs
            );
        }
        Err(e) => debug!("walking trees in {:?} without t_aux: {:#}", cache_path, e),
    }
    Ok(leafs)
}

fn walk_tree(cache_path: &Path, key: CacheKey, sector_size: SectorSize) -> anyhow::Result<Commitment> {
    let leafs = tree_leafs(cache_path, sector_size)?;
    let path = key.path(cache_path);
    let store = open_store(&key.store_config(cache_path), leafs)?;
    let root = recompute_root(&store, leafs)
        .with_context(|| format!("could not walk tree file={:?}", path))?;

    match stored_root(&store) {
        Ok(stored) if stored == root => {}
        Ok(_) => warn!(
            "stored root of {:?} does not match its leaves, using the recomputed root",
            path
        ),
        Err(e) => warn!("could not read stored root of {:?}: {:#}", path, e),
    }
    Ok(root)
}

fn root_from_tree(cache_path: &Path, key: CacheKey, sector_size: SectorSize) -> Result<Commitment> {
    walk_tree(cache_path, key, sector_size).map_err(|e| SealError::MissingArtifact {
        path: key.path(cache_path),
        reason: format!("{:#}", e),
    })
}

/// Recomputes `comm_c` from the leaves of the tree_c store, ignoring `p_aux`.
pub fn comm_c_from_tree(cache_path: &Path, sector_size: SectorSize) -> Result<Commitment> {
    info!("comm_c_from_tree: {:?}", cache_path);
    root_from_tree(cache_path, CacheKey::CommCTree, sector_size)
}

/// Recomputes `comm_r_last` from the leaves of the tree_r_last store.
pub fn comm_r_last_from_tree(cache_path: &Path, sector_size: SectorSize) -> Result<Commitment> {
    info!("comm_r_last_from_tree: {:?}", cache_path);
    root_from_tree(cache_path, CacheKey::CommRLastTree, sector_size)
}

/// Reads any commitment kind. `sector_size` is only consulted for
/// [`CommitmentKind::CcD`].
pub fn read_commitment(
    kind: CommitmentKind,
    cache_path: &Path,
    sector_size: SectorSize,
) -> Option<Commitment> {
    match kind {
        CommitmentKind::C => get_comm_c(cache_path),
        CommitmentKind::RLast => get_comm_r_last(cache_path),
        CommitmentKind::R => get_comm_r(cache_path),
        CommitmentKind::D => get_comm_d(cache_path),
        CommitmentKind::CcD => cc_comm_d(sector_size),
    }
}

pub fn write_commitment(kind: CommitmentKind, cache_path: &Path, value: &Commitment) -> Result<()> {
    match kind {
        CommitmentKind::C => set_comm_c(cache_path, value),
        CommitmentKind::RLast => set_comm_r_last(cache_path, value),
        _ => Err(SealError::ReadOnlyCommitment { kind }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::{SECTOR_SIZE_2_KIB, SECTOR_SIZE_32_GIB};
    use crate::merkle::{build_disk_tree, Node};
    use rand::{Rng, SeedableRng};
    use rand_xorshift::XorShiftRng;
    use tempfile::tempdir;

    fn size_2kib() -> SectorSize {
        SectorSize(SECTOR_SIZE_2_KIB)
    }

    fn node(i: usize) -> Node {
        let mut node = [3u8; 32];
        node[..8].copy_from_slice(&(i as u64).to_le_bytes());
        Node(node)
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let rng = &mut XorShiftRng::from_seed([0x59; 16]);
        let comm_c: Commitment = rng.gen();
        let comm_r_last: Commitment = rng.gen();

        assert_eq!(get_comm_c(dir.path()), None);
        write_commitment(CommitmentKind::C, dir.path(), &comm_c).unwrap();
        assert_eq!(get_comm_c(dir.path()), Some(comm_c));

        set_comm_r_last(dir.path(), &comm_r_last).unwrap();
        assert_eq!(get_comm_c(dir.path()), Some(comm_c));
        assert_eq!(get_comm_r_last(dir.path()), Some(comm_r_last));
        assert_eq!(
            get_comm_r(dir.path()),
            Some(hasher::comm_r(&comm_c, &comm_r_last))
        );
    }

    #[test]
    fn lone_value_leaves_the_other_absent() {
        let dir = tempdir().unwrap();
        set_comm_c(dir.path(), &[5u8; 32]).unwrap();
        assert_eq!(get_comm_c(dir.path()), Some([5u8; 32]));
        assert_eq!(get_comm_r_last(dir.path()), None);
        assert_eq!(get_comm_r(dir.path()), None);

        let other = tempdir().unwrap();
        set_comm_r_last(other.path(), &[0u8; 32]).unwrap();
        assert_eq!(get_comm_r_last(other.path()), Some([0u8; 32]));
        assert_eq!(get_comm_c(other.path()), None);
        assert_eq!(get_comm_r(other.path()), None);

        set_comm_c(other.path(), &[5u8; 32]).unwrap();
        assert_eq!(
            get_comm_r(other.path()),
            Some(hasher::comm_r(&[5u8; 32], &[0u8; 32]))
        );
    }

    #[test]
    fn derived_kinds_are_read_only() {
        let dir = tempdir().unwrap();
        for kind in [CommitmentKind::R, CommitmentKind::D, CommitmentKind::CcD] {
            assert!(matches!(
                write_commitment(kind, dir.path(), &[1u8; 32]),
                Err(SealError::ReadOnlyCommitment { .. })
            ));
        }
        assert!(!CacheKey::PAux.path(dir.path()).exists());
    }

    #[test]
    fn write_into_missing_dir_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            set_comm_c(&missing, &[1u8; 32]),
            Err(SealError::CommitmentWrite { .. })
        ));
    }

    #[test]
    fn malformed_p_aux_is_absent() {
        let dir = tempdir().unwrap();
        std::fs::write(CacheKey::PAux.path(dir.path()), b"short").unwrap();
        assert_eq!(get_comm_c(dir.path()), None);
        assert_eq!(get_comm_r(dir.path()), None);
    }

    #[test]
    fn cc_comm_d_depends_only_on_size() {
        let small = size_2kib();
        assert_eq!(cc_comm_d(small), cc_comm_d(small));
        assert_ne!(cc_comm_d(small), cc_comm_d(SectorSize(SECTOR_SIZE_32_GIB)));
        assert_eq!(cc_comm_d(SectorSize(3000)), None);

        let dir = tempdir().unwrap();
        let zeros = build_disk_tree(
            CacheKey::CommDTree.store_config(dir.path()),
            small.nodes(),
            |_| Node::default(),
        )
        .unwrap();
        assert_eq!(cc_comm_d(small), Some(zeros.root().0));
    }

    #[test]
    fn comm_d_is_the_stored_tree_root() {
        let dir = tempdir().unwrap();
        assert_eq!(get_comm_d(dir.path()), None);

        let tree = build_disk_tree(CacheKey::CommDTree.store_config(dir.path()), 8, node).unwrap();
        assert_eq!(get_comm_d(dir.path()), Some(tree.root().0));

        std::fs::write(CacheKey::CommDTree.path(dir.path()), [0u8; 64]).unwrap();
        assert_eq!(get_comm_d(dir.path()), None);
    }

    #[test]
    fn from_tree_derives_leafs_from_sector_size() {
        let dir = tempdir().unwrap();
        let size = size_2kib();
        let tree = build_disk_tree(
            CacheKey::CommCTree.store_config(dir.path()),
            size.nodes(),
            node,
        )
        .unwrap();

        // No t_aux at all.
        assert_eq!(comm_c_from_tree(dir.path(), size).unwrap(), tree.root().0);

        let t_aux = TemporaryAux {
            sector_size: size,
            layers: 2,
            leafs: size.nodes(),
        };
        persist_bincode(&CacheKey::TAux.path(dir.path()), &t_aux).unwrap();
        assert_eq!(comm_c_from_tree(dir.path(), size).unwrap(), tree.root().0);

        let disagreeing = TemporaryAux {
            leafs: size.nodes() / 2,
            ..t_aux
        };
        persist_bincode(&CacheKey::TAux.path(dir.path()), &disagreeing).unwrap();
        assert!(matches!(
            comm_c_from_tree(dir.path(), size),
            Err(SealError::MissingArtifact { .. })
        ));
    }

    #[test]
    fn from_tree_recovers_a_damaged_root() {
        let dir = tempdir().unwrap();
        let size = size_2kib();
        let tree = build_disk_tree(
            CacheKey::CommRLastTree.store_config(dir.path()),
            size.nodes(),
            node,
        )
        .unwrap();
        let root = tree.root().0;
        drop(tree);

        let path = CacheKey::CommRLastTree.path(dir.path());
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        std::fs::write(&path, &bytes).unwrap();

        assert_eq!(comm_r_last_from_tree(dir.path(), size).unwrap(), root);
    }
}
