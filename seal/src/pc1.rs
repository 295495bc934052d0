use anyhow::{ensure, Result};
use log::{info, trace};
use rayon::prelude::*;

use crate::constants::{DRG_DEGREE, EXP_DEGREE, NODE_SIZE};
use crate::device::BlockDevice;
use crate::hasher::label;
use crate::parents::ParentsGraph;
use crate::slot::SlotLayout;
use crate::types::ReplicaId;

const EMPTY: &[u8] = &[];

#[inline]
fn node_bytes(layer: &[u8], node: usize) -> &[u8] {
    &layer[node * NODE_SIZE..(node + 1) * NODE_SIZE]
}

/// Computes every layer of labels for each sector of the batch and writes
/// them into the batch's slot on the device.
pub fn seal_pre_commit_phase1(
    device: &BlockDevice,
    layout: &SlotLayout,
    replica_ids: &[ReplicaId],
    parents: &ParentsGraph,
) -> Result<()> {
    info!(
        "seal_pre_commit_phase1:start: block_offset {}, {} sectors of {}",
        layout.block_offset, layout.num_sectors, layout.sector_size
    );

    ensure!(
        replica_ids.len() == layout.num_sectors,
        "{} replica ids for {} sectors",
        replica_ids.len(),
        layout.num_sectors
    );
    ensure!(
        parents.nodes() == layout.sector_size.nodes(),
        "parents graph has {} nodes, sector has {}",
        parents.nodes(),
        layout.sector_size.nodes()
    );

    let mut slot = device.map_slot_mut(layout)?;
    let stride = layout.sector_stride();
    trace!(
        "seal phase 1: {} layers, sector stride {} bytes",
        layout.layers,
        stride
    );

    slot.par_chunks_mut(stride)
        .zip(replica_ids.par_iter())
        .for_each(|(sector, replica_id)| label_sector(sector, layout, replica_id, parents));

    slot.flush()?;

    info!("seal_pre_commit_phase1:finish");
    Ok(())
}

fn label_sector(
    sector: &mut [u8],
    layout: &SlotLayout,
    replica_id: &ReplicaId,
    parents: &ParentsGraph,
) {
    let layer_stride = layout.layer_stride();
    let layer_bytes = layout.sector_size.0 as usize;
    let nodes = layout.sector_size.nodes();

    for layer in 1..=layout.layers {
        let (done, rest) = sector.split_at_mut((layer - 1) * layer_stride);
        let current = &mut rest[..layer_bytes];
        let previous = if layer > 1 {
            let start = (layer - 2) * layer_stride;
            Some(&done[start..start + layer_bytes])
        } else {
            None
        };

        let first = label(replica_id, layer as u32, 0, &[], &[]);
        current[..NODE_SIZE].copy_from_slice(&first);

        for node in 1..nodes {
            let drg_ids = parents.drg_parents(node);
            let mut drg = [EMPTY; DRG_DEGREE];
            for (entry, &p) in drg.iter_mut().zip(drg_ids.iter()) {
                *entry = node_bytes(current, p as usize);
            }

            let mut exp_labels = [EMPTY; EXP_DEGREE];
            let exp: &[&[u8]] = match previous {
                Some(prev) => {
                    for (entry, &p) in exp_labels.iter_mut().zip(parents.exp_parents(node).iter()) {
                        *entry = node_bytes(prev, p as usize);
                    }
                    &exp_labels
                }
                None => &[],
            };

            let value = label(replica_id, layer as u32, node as u64, &drg, exp);
            current[node * NODE_SIZE..(node + 1) * NODE_SIZE].copy_from_slice(&value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::constants::{PARENT_COUNT, SECTOR_SIZE_2_KIB};
    use crate::merkle::read_node;
    use crate::parents::write_parents_file;
    use crate::types::SectorSize;
    use tempfile::tempdir;

    #[test]
    fn labels_are_deterministic_and_sector_specific() -> Result<()> {
        let dir = tempdir()?;
        let size = SectorSize(SECTOR_SIZE_2_KIB);
        let nodes = size.nodes();
        let records: Vec<[u32; PARENT_COUNT]> = (0..nodes)
            .map(|i| [i.saturating_sub(1) as u32; PARENT_COUNT])
            .collect();
        let parents_path = dir.path().join("parents.cache");
        write_parents_file(&parents_path, &records)?;
        let parents = ParentsGraph::open(&parents_path, nodes)?;

        let device = BlockDevice::open(&DeviceConfig {
            path: dir.path().join("device"),
            blocks: 16,
        })?;
        let layout = SlotLayout::new(2, 2, size)?;
        let ids = [[1u8; 32], [2u8; 32]];
        seal_pre_commit_phase1(&device, &layout, &ids, &parents)?;

        let slot = device.map_slot(&layout)?;
        let first = &slot[layout.layer_range(0, 0)];
        let second = &slot[layout.layer_range(1, 0)];
        assert_eq!(read_node(first, 0), label(&ids[0], 1, 0, &[], &[]));
        assert_ne!(read_node(first, 5), read_node(second, 5));

        let n0 = read_node(first, 0);
        let node1 = label(&ids[0], 1, 1, &[&n0[..]; DRG_DEGREE], &[]);
        assert_eq!(read_node(first, 1), node1);

        let last = &slot[layout.layer_range(0, 1)];
        assert_ne!(read_node(last, 1), read_node(first, 1));
        Ok(())
    }
}
