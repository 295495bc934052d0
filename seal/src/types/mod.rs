mod sector_size;

pub use sector_size::*;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::merkle::MerkleProof;

pub type Commitment = [u8; 32];
pub type ReplicaId = [u8; 32];
pub type Ticket = [u8; 32];
pub type Seed = [u8; 32];

/// Length in bytes of every commitment, replica id, seed and ticket.
pub const COMMITMENT_LEN: usize = 32;

/// The four per-sector commitments plus the committed-capacity `comm_d`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitmentKind {
    C,
    RLast,
    R,
    D,
    /// `comm_d` of a sector that carries no data. Computed from the sector
    /// size alone.
    CcD,
}

impl CommitmentKind {
    /// Whether the commitment store accepts writes of this kind.
    pub fn is_writable(self) -> bool {
        matches!(self, CommitmentKind::C | CommitmentKind::RLast)
    }
}

impl fmt::Display for CommitmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommitmentKind::C => "comm_c",
            CommitmentKind::RLast => "comm_r_last",
            CommitmentKind::R => "comm_r",
            CommitmentKind::D => "comm_d",
            CommitmentKind::CcD => "cc_comm_d",
        };
        write!(f, "{}", name)
    }
}

/// Persisted as `p_aux`. Each value is either written or absent; a value
/// that was never written is never read back.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentAux {
    pub comm_c: Option<Commitment>,
    pub comm_r_last: Option<Commitment>,
}

/// Persisted as `t_aux`: the geometry the trees of a cache directory were
/// built with, used to validate the cache before commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryAux {
    pub sector_size: SectorSize,
    pub layers: usize,
    /// Leaf count shared by tree_d, tree_c and tree_r_last.
    pub leafs: usize,
}

/// The column of labels of one node across all layers, with its opening in
/// tree_c.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnProof {
    pub node: u64,
    pub labels: Vec<Commitment>,
    pub inclusion_proof: MerkleProof,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VanillaSealProof {
    pub challenge: u64,
    pub comm_d_proof: MerkleProof,
    pub comm_r_last_proof: MerkleProof,
    pub column: ColumnProof,
    pub drg_parents: Vec<ColumnProof>,
    pub exp_parents: Vec<ColumnProof>,
}

/// Written by C1 as `commit-phase1-output` in the sector's cache path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealCommitPhase1Output {
    pub vanilla_proofs: Vec<VanillaSealProof>,
    pub comm_r: Commitment,
    pub comm_d: Commitment,
    pub replica_id: ReplicaId,
    pub seed: Seed,
    pub ticket: Ticket,
}
