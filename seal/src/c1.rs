use std::fs::{self, OpenOptions};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use log::{info, trace};
use memmap2::MmapOptions;

use crate::cache_key::CacheKey;
use crate::constants::NODE_SIZE;
use crate::device::BlockDevice;
use crate::hasher::{comm_r, derive_challenge, encode, hash_column, label};
use crate::merkle::{open_disk_tree, read_node, DiskTree, MerkleProof};
use crate::parents::ParentsGraph;
use crate::slot::SlotLayout;
use crate::types::{
    ColumnProof, Commitment, PersistentAux, ReplicaId, SealCommitPhase1Output, Seed,
    TemporaryAux, Ticket, VanillaSealProof,
};
use crate::util::{read_bincode, short_hex, write_atomic};

/// Public values a vanilla proof is checked against.
pub struct PublicInputs<'a> {
    pub replica_id: &'a ReplicaId,
    pub comm_d: &'a Commitment,
    pub comm_c: &'a Commitment,
    pub comm_r_last: &'a Commitment,
    pub layers: usize,
}

struct ColumnReader<'a> {
    labels: &'a [u8],
    layout: &'a SlotLayout,
    tree_c: &'a DiskTree,
}

impl ColumnReader<'_> {
    fn column(&self, node: usize) -> Result<ColumnProof> {
        let labels = (0..self.layout.layers)
            .map(|layer| read_node(&self.labels[self.layout.layer_range(0, layer)], node))
            .collect();
        Ok(ColumnProof {
            node: node as u64,
            labels,
            inclusion_proof: MerkleProof::generate(self.tree_c, node)?,
        })
    }
}

/// Produces and self-verifies the vanilla proofs for one sector, then writes
/// them to `commit-phase1-output` in the sector's cache path.
#[allow(clippy::too_many_arguments)]
pub fn seal_commit_phase1(
    device: &BlockDevice,
    layout: &SlotLayout,
    t_aux: &TemporaryAux,
    replica_id: &ReplicaId,
    seed: &Seed,
    ticket: &Ticket,
    cache_path: &Path,
    parents: &ParentsGraph,
    replica_path: &Path,
) -> Result<SealCommitPhase1Output> {
    info!(
        "seal_commit_phase1:start: replica_id {}, block_offset {}",
        short_hex(replica_id),
        layout.block_offset
    );

    ensure!(layout.num_sectors == 1, "commit runs on exactly one sector");
    ensure!(
        t_aux.sector_size == layout.sector_size && t_aux.layers == layout.layers,
        "cache was built for {} with {} layers",
        t_aux.sector_size,
        t_aux.layers
    );
    let nodes = layout.sector_size.nodes();
    ensure!(
        parents.nodes() == nodes,
        "parents graph has {} nodes, sector has {}",
        parents.nodes(),
        nodes
    );

    let p_aux: PersistentAux = read_bincode(&CacheKey::PAux.path(cache_path))?;
    let comm_c = p_aux.comm_c.context("p_aux holds no comm_c")?;
    let comm_r_last = p_aux.comm_r_last.context("p_aux holds no comm_r_last")?;

    let tree_d = open_disk_tree(&CacheKey::CommDTree.store_config(cache_path), nodes)?;
    let tree_c = open_disk_tree(&CacheKey::CommCTree.store_config(cache_path), nodes)?;
    let tree_r_last = open_disk_tree(&CacheKey::CommRLastTree.store_config(cache_path), nodes)?;
    let comm_d = tree_d.root().0;
    ensure!(
        tree_c.root().0 == comm_c,
        "tree_c root does not match p_aux comm_c"
    );
    ensure!(
        tree_r_last.root().0 == comm_r_last,
        "tree_r_last root does not match p_aux comm_r_last"
    );

    let replica_file = OpenOptions::new()
        .read(true)
        .open(replica_path)
        .with_context(|| format!("could not open replica_path={:?}", replica_path.display()))?;
    let replica = unsafe {
        MmapOptions::new()
            .map(&replica_file)
            .with_context(|| format!("could not mmap replica_path={:?}", replica_path.display()))?
    };
    ensure!(
        replica.len() == nodes * NODE_SIZE,
        "replica has {} bytes, expected {}",
        replica.len(),
        nodes * NODE_SIZE
    );

    let labels = device.map_slot(layout)?;
    let columns = ColumnReader {
        labels: &labels,
        layout,
        tree_c: &tree_c,
    };

    let challenge_count = layout.sector_size.minimum_challenges()?;
    trace!("generating {} challenge proofs", challenge_count);

    let mut vanilla_proofs = Vec::with_capacity(challenge_count);
    for index in 0..challenge_count as u32 {
        let challenge = derive_challenge(replica_id, seed, index, nodes) as usize;

        let comm_r_last_proof = MerkleProof::generate(&tree_r_last, challenge)?;
        ensure!(
            read_node(&replica, challenge) == comm_r_last_proof.leaf(),
            "replica node {} does not match tree_r_last",
            challenge
        );

        let drg_parents: Vec<ColumnProof> = parents
            .drg_parents(challenge)
            .iter()
            .map(|&p| columns.column(p as usize))
            .collect::<Result<_>>()?;
        let exp_parents: Vec<ColumnProof> = parents
            .exp_parents(challenge)
            .iter()
            .map(|&p| columns.column(p as usize))
            .collect::<Result<_>>()?;

        vanilla_proofs.push(VanillaSealProof {
            challenge: challenge as u64,
            comm_d_proof: MerkleProof::generate(&tree_d, challenge)?,
            comm_r_last_proof,
            column: columns.column(challenge)?,
            drg_parents,
            exp_parents,
        });
    }

    let public_inputs = PublicInputs {
        replica_id,
        comm_d: &comm_d,
        comm_c: &comm_c,
        comm_r_last: &comm_r_last,
        layers: layout.layers,
    };
    for proof in &vanilla_proofs {
        ensure!(
            verify_vanilla_proof(proof, &public_inputs, parents),
            "Invalid vanilla proof generated for challenge {}",
            proof.challenge
        );
    }

    let out = SealCommitPhase1Output {
        vanilla_proofs,
        comm_r: comm_r(&comm_c, &comm_r_last),
        comm_d,
        replica_id: *replica_id,
        seed: *seed,
        ticket: *ticket,
    };

    let out_path = CacheKey::CommitPhase1Output.path(cache_path);
    let bytes = serde_json::to_vec(&out).context("could not serialize commit phase1 output")?;
    write_atomic(&out_path, &bytes)?;

    info!("seal_commit_phase1:finish: {:?}", out_path.display());
    Ok(out)
}

/// Reads back what [`seal_commit_phase1`] wrote into `cache_path`.
pub fn read_commit_phase1_output(cache_path: &Path) -> Result<SealCommitPhase1Output> {
    let path = CacheKey::CommitPhase1Output.path(cache_path);
    let bytes = fs::read(&path).with_context(|| format!("could not read file={:?}", path))?;
    serde_json::from_slice(&bytes).with_context(|| format!("could not deserialize file={:?}", path))
}

fn verify_column(column: &ColumnProof, comm_c: &Commitment, layers: usize) -> bool {
    column.labels.len() == layers
        && column.inclusion_proof.index == column.node
        && column.inclusion_proof.leaf() == hash_column(&column.labels)
        && column.inclusion_proof.verify(comm_c)
}

/// Checks one challenge: inclusion of the data, replica and column nodes,
/// every label of the column against its parents, and the encoding.
pub fn verify_vanilla_proof(
    proof: &VanillaSealProof,
    public: &PublicInputs<'_>,
    parents: &ParentsGraph,
) -> bool {
    let challenge = proof.challenge;
    let node = challenge as usize;
    if node == 0 || node >= parents.nodes() {
        return false;
    }

    if proof.comm_d_proof.index != challenge || !proof.comm_d_proof.verify(public.comm_d) {
        trace!("comm_d inclusion failed for {}", challenge);
        return false;
    }
    if proof.comm_r_last_proof.index != challenge
        || !proof.comm_r_last_proof.verify(public.comm_r_last)
    {
        trace!("comm_r_last inclusion failed for {}", challenge);
        return false;
    }
    if proof.column.node != challenge || !verify_column(&proof.column, public.comm_c, public.layers)
    {
        trace!("column inclusion failed for {}", challenge);
        return false;
    }

    let drg_ids = parents.drg_parents(node);
    let exp_ids = parents.exp_parents(node);
    let parents_match = proof.drg_parents.len() == drg_ids.len()
        && proof.exp_parents.len() == exp_ids.len()
        && proof
            .drg_parents
            .iter()
            .zip(drg_ids.iter())
            .chain(proof.exp_parents.iter().zip(exp_ids.iter()))
            .all(|(col, &id)| {
                col.node == id as u64 && verify_column(col, public.comm_c, public.layers)
            });
    if !parents_match {
        trace!("parent columns failed for {}", challenge);
        return false;
    }

    for layer in 1..=public.layers {
        let drg: Vec<&[u8]> = proof
            .drg_parents
            .iter()
            .map(|col| &col.labels[layer - 1][..])
            .collect();
        let exp: Vec<&[u8]> = if layer > 1 {
            proof
                .exp_parents
                .iter()
                .map(|col| &col.labels[layer - 2][..])
                .collect()
        } else {
            Vec::new()
        };
        let expected = label(public.replica_id, layer as u32, challenge, &drg, &exp);
        if expected != proof.column.labels[layer - 1] {
            trace!("label mismatch at layer {} for {}", layer, challenge);
            return false;
        }
    }

    let key = &proof.column.labels[public.layers - 1];
    encode(&proof.comm_d_proof.leaf(), key) == proof.comm_r_last_proof.leaf()
}
