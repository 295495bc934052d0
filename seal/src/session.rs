use std::path::{Path, PathBuf};

use crate::backend::SealingBackend;
use crate::cache_key::{sector_cache_dir, CacheKey};
use crate::error::Result;
use crate::sealer::Sealer;
use crate::types::{ReplicaId, SectorSize, Seed, Ticket};

/// Everything one sector needs to pass through the three stages. Nothing
/// here is persisted; the orchestrator owns the session's durability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealSession {
    pub block_offset: u64,
    pub num_sectors: usize,
    pub sector_size: SectorSize,
    /// Index of this sector within its batch.
    pub sector_slot: usize,
    pub replica_id: ReplicaId,
    pub seed: Seed,
    pub ticket: Ticket,
    pub cache_path: PathBuf,
    pub parents_path: PathBuf,
    pub replica_path: PathBuf,
}

impl SealSession {
    /// A session whose cache and replica paths are where stage 2 puts them
    /// under `output_dir`.
    #[allow(clippy::too_many_arguments)]
    pub fn in_output_dir(
        output_dir: &Path,
        block_offset: u64,
        num_sectors: usize,
        sector_slot: usize,
        sector_size: SectorSize,
        replica_id: ReplicaId,
        seed: Seed,
        ticket: Ticket,
        parents_path: PathBuf,
    ) -> Self {
        let cache_path = sector_cache_dir(output_dir, sector_slot);
        let replica_path = CacheKey::SealedFile.path(&cache_path);
        SealSession {
            block_offset,
            num_sectors,
            sector_size,
            sector_slot,
            replica_id,
            seed,
            ticket,
            cache_path,
            parents_path,
            replica_path,
        }
    }

    /// Runs stage 1 for the whole batch. `replica_ids` must include this
    /// session's id at `sector_slot`.
    pub fn pc1<B: SealingBackend>(&self, sealer: &Sealer<B>, replica_ids: &[u8]) -> Result<()> {
        sealer.pc1(
            self.block_offset,
            self.num_sectors,
            replica_ids,
            &self.parents_path,
            self.sector_size,
        )
    }

    pub fn pc2<B: SealingBackend>(
        &self,
        sealer: &Sealer<B>,
        output_dir: &Path,
        data_paths: &[PathBuf],
    ) -> Result<()> {
        sealer.pc2(
            self.block_offset,
            self.num_sectors,
            output_dir,
            data_paths,
            self.sector_size,
        )
    }

    pub fn c1<B: SealingBackend>(&self, sealer: &Sealer<B>) -> Result<()> {
        sealer.c1(
            self.block_offset,
            self.num_sectors,
            self.sector_slot,
            &self.replica_id,
            &self.seed,
            &self.ticket,
            &self.cache_path,
            &self.parents_path,
            &self.replica_path,
            self.sector_size,
        )
    }

    pub fn cleanup<B: SealingBackend>(&self, sealer: &Sealer<B>, output_dir: &Path) -> Result<()> {
        sealer.pc2_cleanup(self.num_sectors, output_dir, self.sector_size)
    }
}
