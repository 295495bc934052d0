use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use log::trace;
use memmap2::{Mmap, MmapOptions};

use crate::constants::{DRG_DEGREE, EXP_DEGREE, PARENTS_RECORD_SIZE, PARENT_COUNT};

/// Read-only view of a parents cache file: one record of `DRG_DEGREE` base
/// parents followed by `EXP_DEGREE` expander parents per node, each a
/// little-endian `u32`.
#[derive(Debug)]
pub struct ParentsGraph {
    data: Mmap,
    nodes: usize,
}

impl ParentsGraph {
    /// Opens and validates the graph for a sector of `nodes` nodes.
    pub fn open<P: AsRef<Path>>(path: P, nodes: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .with_context(|| format!("could not open parents file={:?}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("could not stat parents file={:?}", path.display()))?
            .len();
        ensure!(
            len == (nodes * PARENTS_RECORD_SIZE) as u64,
            "parents file {:?} has {} bytes, expected {} for {} nodes",
            path.display(),
            len,
            nodes * PARENTS_RECORD_SIZE,
            nodes
        );

        let data = unsafe {
            MmapOptions::new()
                .map(&file)
                .with_context(|| format!("could not mmap parents file={:?}", path.display()))?
        };
        let graph = ParentsGraph { data, nodes };
        graph.validate()?;

        trace!("loaded parents graph {:?} with {} nodes", path.display(), nodes);
        Ok(graph)
    }

    fn validate(&self) -> Result<()> {
        for node in 1..self.nodes {
            let parents = self.parents(node);
            for &p in &parents[..DRG_DEGREE] {
                ensure!(
                    (p as usize) < node,
                    "corrupt parents file: base parent {} of node {} is not an earlier node",
                    p,
                    node
                );
            }
            for &p in &parents[DRG_DEGREE..] {
                ensure!(
                    (p as usize) < self.nodes,
                    "corrupt parents file: expander parent {} of node {} is out of range",
                    p,
                    node
                );
            }
        }
        Ok(())
    }

    #[inline]
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn parents(&self, node: usize) -> [u32; PARENT_COUNT] {
        let record = &self.data[node * PARENTS_RECORD_SIZE..(node + 1) * PARENTS_RECORD_SIZE];
        let mut parents = [0u32; PARENT_COUNT];
        for (parent, bytes) in parents.iter_mut().zip(record.chunks_exact(4)) {
            *parent = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        parents
    }

    pub fn drg_parents(&self, node: usize) -> [u32; DRG_DEGREE] {
        let mut out = [0u32; DRG_DEGREE];
        out.copy_from_slice(&self.parents(node)[..DRG_DEGREE]);
        out
    }

    pub fn exp_parents(&self, node: usize) -> [u32; EXP_DEGREE] {
        let mut out = [0u32; EXP_DEGREE];
        out.copy_from_slice(&self.parents(node)[DRG_DEGREE..]);
        out
    }
}

/// Serialises a parents file from per-node records. Used to provision
/// small graphs for tests and tooling.
pub fn write_parents_file<P: AsRef<Path>>(path: P, records: &[[u32; PARENT_COUNT]]) -> Result<()> {
    let path = path.as_ref();
    let mut bytes = Vec::with_capacity(records.len() * PARENTS_RECORD_SIZE);
    for record in records {
        for parent in record {
            bytes.extend_from_slice(&parent.to_le_bytes());
        }
    }
    std::fs::write(path, &bytes)
        .with_context(|| format!("could not write parents file={:?}", path.display()))
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn chain(nodes: usize) -> Vec<[u32; PARENT_COUNT]> {
        (0..nodes)
            .map(|i| {
                let prev = i.saturating_sub(1) as u32;
                let mut record = [prev; PARENT_COUNT];
                for (k, p) in record[DRG_DEGREE..].iter_mut().enumerate() {
                    *p = ((i + k) % nodes) as u32;
                }
                record
            })
            .collect()
    }

    #[test]
    fn reads_back_records() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("parents.cache");
        write_parents_file(&path, &chain(8))?;

        let graph = ParentsGraph::open(&path, 8)?;
        assert_eq!(graph.nodes(), 8);
        assert_eq!(graph.drg_parents(5), [4; DRG_DEGREE]);
        assert_eq!(graph.exp_parents(7)[1], 0);
        Ok(())
    }

    #[test]
    fn rejects_wrong_length() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("parents.cache");
        write_parents_file(&path, &chain(4))?;
        assert!(ParentsGraph::open(&path, 8).is_err());
        Ok(())
    }

    #[test]
    fn rejects_forward_base_parent() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("parents.cache");
        let mut records = chain(4);
        records[2][0] = 3;
        write_parents_file(&path, &records)?;
        assert!(ParentsGraph::open(&path, 4).is_err());
        Ok(())
    }
}
