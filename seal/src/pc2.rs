use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use log::{info, trace};
use memmap2::{Mmap, MmapOptions};
use rayon::prelude::*;
use tempfile::NamedTempFile;

use crate::cache_key::{sector_cache_dir, CacheKey};
use crate::constants::{DEV_ZERO, NODE_SIZE};
use crate::device::BlockDevice;
use crate::hasher::{encode, hash_column};
use crate::merkle::{build_disk_tree, read_node, Node};
use crate::slot::SlotLayout;
use crate::types::{Commitment, PersistentAux, TemporaryAux};
use crate::util::persist_bincode;

/// Unsealed bytes of one sector: either a mapped data file or zeros for a
/// committed-capacity sector.
enum SectorData {
    Mapped(Mmap),
    Zero,
}

impl SectorData {
    #[inline]
    fn node(&self, index: usize) -> Commitment {
        match self {
            SectorData::Mapped(m) => read_node(m, index),
            SectorData::Zero => [0u8; 32],
        }
    }
}

fn open_sector_data(path: &Path, sector_bytes: usize) -> Result<SectorData> {
    // `/dev/zero` is not a regular file, so it is never mapped.
    if path == Path::new(DEV_ZERO) {
        trace!("using unreplicated data file /dev/zero");
        return Ok(SectorData::Zero);
    }

    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("could not open data file={:?}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("could not stat data file={:?}", path.display()))?
        .len();
    ensure!(
        len >= sector_bytes as u64,
        "data file {:?} has {} bytes, need at least {}",
        path.display(),
        len,
        sector_bytes
    );

    let data = unsafe {
        MmapOptions::new()
            .len(sector_bytes)
            .map(&file)
            .with_context(|| format!("could not mmap data file={:?}", path.display()))?
    };
    Ok(SectorData::Mapped(data))
}

/// Encodes the replica straight into a mapped temporary file next to
/// `replica_path` and moves it into place once flushed.
fn write_replica(
    replica_path: &Path,
    sector_bytes: usize,
    data: &SectorData,
    key_layer: &[u8],
) -> Result<Mmap> {
    let dir = replica_path
        .parent()
        .with_context(|| format!("replica path {:?} has no parent", replica_path))?;
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("could not create temp file in {:?}", dir))?;
    tmp.as_file()
        .set_len(sector_bytes as u64)
        .with_context(|| format!("could not size replica for {:?}", replica_path))?;

    let mut out = unsafe {
        MmapOptions::new()
            .map_mut(tmp.as_file())
            .with_context(|| format!("could not mmap replica for {:?}", replica_path))?
    };
    out.par_chunks_mut(NODE_SIZE)
        .enumerate()
        .for_each(|(node, chunk)| {
            chunk.copy_from_slice(&encode(&data.node(node), &read_node(key_layer, node)));
        });
    out.flush()
        .with_context(|| format!("could not flush replica for {:?}", replica_path))?;
    let replica = out.make_read_only()?;

    tmp.persist(replica_path)
        .with_context(|| format!("could not persist {:?}", replica_path))?;
    Ok(replica)
}

/// Builds tree_d, tree_c and tree_r_last for every sector of the batch and
/// writes them, the sealed replica and the aux files into
/// `output_dir/<index>`.
pub fn seal_pre_commit_phase2(
    device: &BlockDevice,
    layout: &SlotLayout,
    output_dir: &Path,
    data_paths: &[PathBuf],
) -> Result<()> {
    info!(
        "seal_pre_commit_phase2:start: block_offset {}, {} sectors, output_dir {:?}",
        layout.block_offset,
        layout.num_sectors,
        output_dir.display()
    );

    ensure!(
        data_paths.len() == layout.num_sectors,
        "{} data files for {} sectors",
        data_paths.len(),
        layout.num_sectors
    );

    fs::create_dir_all(output_dir)
        .with_context(|| format!("could not create output_dir={:?}", output_dir.display()))?;

    let slot = device.map_slot(layout)?;

    data_paths
        .par_iter()
        .enumerate()
        .try_for_each(|(index, data_path)| {
            let cache_path = sector_cache_dir(output_dir, index);
            seal_sector(&slot, layout, index, data_path, &cache_path)
                .with_context(|| format!("sector {} of batch failed", index))
        })?;

    info!("seal_pre_commit_phase2:finish");
    Ok(())
}

fn seal_sector(
    slot: &[u8],
    layout: &SlotLayout,
    index: usize,
    data_path: &Path,
    cache_path: &Path,
) -> Result<()> {
    let sector_bytes = layout.sector_size.0 as usize;
    let nodes = layout.sector_size.nodes();

    fs::create_dir_all(cache_path)
        .with_context(|| format!("could not create cache_path={:?}", cache_path.display()))?;

    let data = open_sector_data(data_path, sector_bytes)?;

    trace!("building tree_d for sector {}", index);
    build_disk_tree(CacheKey::CommDTree.store_config(cache_path), nodes, |i| {
        Node(data.node(i))
    })?;

    let layers: Vec<&[u8]> = (0..layout.layers)
        .map(|layer| &slot[layout.layer_range(index, layer)])
        .collect();

    trace!("building tree_c for sector {} over {} layers", index, layers.len());
    let tree_c = build_disk_tree(CacheKey::CommCTree.store_config(cache_path), nodes, |node| {
        let column: Vec<Commitment> = layers.iter().map(|l| read_node(l, node)).collect();
        Node(hash_column(&column))
    })?;

    trace!("encoding replica for sector {}", index);
    let key_layer = layers[layers.len() - 1];
    let replica_path = CacheKey::SealedFile.path(cache_path);
    let replica = write_replica(&replica_path, sector_bytes, &data, key_layer)?;
    drop(data);

    trace!("building tree_r_last for sector {}", index);
    let tree_r_last = build_disk_tree(
        CacheKey::CommRLastTree.store_config(cache_path),
        nodes,
        |node| Node(read_node(&replica, node)),
    )?;

    let p_aux = PersistentAux {
        comm_c: Some(tree_c.root().0),
        comm_r_last: Some(tree_r_last.root().0),
    };
    persist_bincode(&CacheKey::PAux.path(cache_path), &p_aux)?;

    let t_aux = TemporaryAux {
        sector_size: layout.sector_size,
        layers: layout.layers,
        leafs: nodes,
    };
    persist_bincode(&CacheKey::TAux.path(cache_path), &t_aux)?;

    trace!("sector {} sealed into {:?}", index, cache_path.display());
    Ok(())
}
