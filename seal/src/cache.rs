use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, trace};

use crate::cache_key::{sector_cache_dir, CacheKey};
use crate::error::SealError;
use crate::merkle::is_consistent;
use crate::types::{PersistentAux, TemporaryAux};
use crate::util::{read_bincode, remove_if_exists};

fn missing(path: &Path, reason: impl Into<String>) -> SealError {
    SealError::MissingArtifact {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

// Checks for the replica, p_aux, t_aux and every tree store, and that each
// store has the size of a tree over the leaves t_aux records.
pub fn validate_cache_for_commit(
    cache_path: &Path,
    replica_path: &Path,
) -> std::result::Result<TemporaryAux, SealError> {
    info!("validate_cache_for_commit:start");

    let replica_len = fs::metadata(replica_path)
        .map_err(|e| missing(replica_path, format!("missing replica: {}", e)))?
        .len();
    if replica_len == 0 {
        return Err(missing(replica_path, "replica exists, but is empty"));
    }

    let p_aux_path = CacheKey::PAux.path(cache_path);
    let p_aux: PersistentAux =
        read_bincode(&p_aux_path).map_err(|e| missing(&p_aux_path, format!("{:#}", e)))?;
    if p_aux.comm_c.is_none() || p_aux.comm_r_last.is_none() {
        return Err(missing(&p_aux_path, "p_aux lacks comm_c or comm_r_last"));
    }

    let t_aux_path = CacheKey::TAux.path(cache_path);
    let t_aux: TemporaryAux =
        read_bincode(&t_aux_path).map_err(|e| missing(&t_aux_path, format!("{:#}", e)))?;

    if replica_len != t_aux.sector_size.0 {
        return Err(missing(
            replica_path,
            format!(
                "replica has {} bytes, expected {}",
                replica_len, t_aux.sector_size.0
            ),
        ));
    }

    for key in [
        CacheKey::CommDTree,
        CacheKey::CommCTree,
        CacheKey::CommRLastTree,
    ] {
        let path = key.path(cache_path);
        let consistent = is_consistent(&key.store_config(cache_path), t_aux.leafs)
            .map_err(|e| missing(&path, format!("{:#}", e)))?;
        if !consistent {
            return Err(missing(&path, "store is inconsistent"));
        }
        trace!("verify_store: {:?} is consistent", path);
    }

    info!("validate_cache_for_commit:finish");
    Ok(t_aux)
}

// Discards the trees that are only needed to produce the commit proof.
// tree_r_last, the replica and p_aux stay behind.
pub fn clear_cache(cache_path: &Path) -> Result<()> {
    info!("clear_cache:start");

    remove_if_exists(&CacheKey::CommDTree.path(cache_path))?;
    remove_if_exists(&CacheKey::CommCTree.path(cache_path))?;

    info!("clear_cache:finish");
    Ok(())
}

/// Removes the per-sector directories PC2 creates under `output_dir`.
/// Directories that do not exist are skipped, so repeated calls succeed.
pub fn cleanup_batch(num_sectors: usize, output_dir: &Path) -> Result<()> {
    info!(
        "pc2_cleanup:start: {} sectors under {:?}",
        num_sectors,
        output_dir.display()
    );

    for index in 0..num_sectors {
        let dir = sector_cache_dir(output_dir, index);
        match fs::remove_dir_all(&dir) {
            Ok(()) => trace!("removed {:?}", dir),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("could not remove {:?}", dir)),
        }
    }

    info!("pc2_cleanup:finish");
    Ok(())
}
