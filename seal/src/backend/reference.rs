use std::path::{Path, PathBuf};

use log::info;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::SealingBackend;
use crate::c1::seal_commit_phase1;
use crate::commitments;
use crate::cache::{self, cleanup_batch};
use crate::cache_key::CacheKey;
use crate::config::SealConfig;
use crate::device::BlockDevice;
use crate::error::{Result, SealError, Stage};
use crate::parents::ParentsGraph;
use crate::pc1::seal_pre_commit_phase1;
use crate::pc2::seal_pre_commit_phase2;
use crate::slot::{self, SlotLayout};
use crate::types::{
    Commitment, CommitmentKind, ReplicaId, SectorSize, Seed, TemporaryAux, Ticket,
};
use crate::util::read_bincode;

/// In-process implementation of every stage over a file-backed device.
#[derive(Debug)]
pub struct ReferenceBackend {
    sector_size: SectorSize,
    device: Option<BlockDevice>,
    pool: ThreadPool,
}

impl ReferenceBackend {
    pub fn from_config(sector_size: SectorSize, config: &SealConfig) -> Result<Self> {
        sector_size.ensure_supported()?;

        let device = config
            .device
            .as_ref()
            .map(BlockDevice::open)
            .transpose()
            .map_err(SealError::stage(Stage::Init))?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads.unwrap_or(0))
            .thread_name(|i| format!("seal-worker-{}", i))
            .build()
            .map_err(|e| SealError::Stage {
                stage: Stage::Init,
                source: e.into(),
            })?;

        info!(
            "reference backend ready: sector size {}, {} workers, device {:?}",
            sector_size,
            pool.current_num_threads(),
            device.as_ref().map(|d| d.path().display().to_string())
        );
        Ok(ReferenceBackend {
            sector_size,
            device,
            pool,
        })
    }

    fn device(&self) -> Result<&BlockDevice> {
        self.device.as_ref().ok_or(SealError::NoDevice)
    }

    /// The device, after checking that `layout` lies inside it. Mapping a
    /// slot past the end of the file would fault instead of failing.
    fn device_for(&self, layout: &SlotLayout) -> Result<&BlockDevice> {
        let device = self.device()?;
        let max = slot::max_block_offset(Some(device.blocks()), layout.sector_size)?;
        layout.ensure_within(max)?;
        Ok(device)
    }

    fn open_parents(&self, parents_path: &Path, stage: Stage) -> Result<ParentsGraph> {
        ParentsGraph::open(parents_path, self.sector_size.nodes()).map_err(SealError::stage(stage))
    }
}

impl SealingBackend for ReferenceBackend {
    fn init(sector_size: SectorSize, config_file: Option<&Path>) -> Result<Self> {
        let config = SealConfig::load_optional(config_file)?;
        Self::from_config(sector_size, &config)
    }

    fn max_block_offset(&self, sector_size: SectorSize) -> Result<u64> {
        slot::max_block_offset(self.device.as_ref().map(|d| d.blocks()), sector_size)
    }

    fn slot_size(&self, num_sectors: usize, sector_size: SectorSize) -> Result<u64> {
        slot::slot_size(num_sectors, sector_size)
    }

    fn pc1(
        &self,
        layout: &SlotLayout,
        replica_ids: &[ReplicaId],
        parents_path: &Path,
    ) -> Result<()> {
        let device = self.device_for(layout)?;
        let parents = self.open_parents(parents_path, Stage::Pc1)?;
        self.pool
            .install(|| seal_pre_commit_phase1(device, layout, replica_ids, &parents))
            .map_err(SealError::stage(Stage::Pc1))
    }

    fn pc2(&self, layout: &SlotLayout, output_dir: &Path, data_paths: &[PathBuf]) -> Result<()> {
        let device = self.device_for(layout)?;
        self.pool
            .install(|| seal_pre_commit_phase2(device, layout, output_dir, data_paths))
            .map_err(SealError::stage(Stage::Pc2))
    }

    fn pc2_cleanup(
        &self,
        num_sectors: usize,
        output_dir: &Path,
        _sector_size: SectorSize,
    ) -> Result<()> {
        cleanup_batch(num_sectors, output_dir).map_err(SealError::stage(Stage::Pc2Cleanup))
    }

    fn c1(
        &self,
        layout: &SlotLayout,
        sector_slot: usize,
        replica_id: &ReplicaId,
        seed: &Seed,
        ticket: &Ticket,
        cache_path: &Path,
        parents_path: &Path,
        replica_path: &Path,
    ) -> Result<()> {
        let device = self.device_for(layout)?;
        let parents = self.open_parents(parents_path, Stage::C1)?;
        let sector = layout.sector(sector_slot);

        self.pool
            .install(|| {
                let t_aux: TemporaryAux = read_bincode(&CacheKey::TAux.path(cache_path))?;
                seal_commit_phase1(
                    device,
                    &sector,
                    &t_aux,
                    replica_id,
                    seed,
                    ticket,
                    cache_path,
                    &parents,
                    replica_path,
                )
            })
            .map(|_| ())
            .map_err(SealError::stage(Stage::C1))
    }

    fn validate_cache_for_commit(&self, cache_path: &Path, replica_path: &Path) -> Result<()> {
        let t_aux = cache::validate_cache_for_commit(cache_path, replica_path)?;
        if t_aux.sector_size != self.sector_size {
            return Err(SealError::MissingArtifact {
                path: cache_path.to_path_buf(),
                reason: format!(
                    "cache was built for {}, backend serves {}",
                    t_aux.sector_size, self.sector_size
                ),
            });
        }
        Ok(())
    }

    fn comm_c_from_tree(&self, cache_path: &Path, sector_size: SectorSize) -> Result<Commitment> {
        commitments::comm_c_from_tree(cache_path, sector_size)
    }

    fn comm_r_last_from_tree(
        &self,
        cache_path: &Path,
        sector_size: SectorSize,
    ) -> Result<Commitment> {
        commitments::comm_r_last_from_tree(cache_path, sector_size)
    }

    fn read_commitment(
        &self,
        kind: CommitmentKind,
        cache_path: &Path,
        sector_size: SectorSize,
    ) -> Option<Commitment> {
        commitments::read_commitment(kind, cache_path, sector_size)
    }

    fn write_commitment(
        &self,
        kind: CommitmentKind,
        cache_path: &Path,
        value: &Commitment,
    ) -> Result<()> {
        commitments::write_commitment(kind, cache_path, value)
    }
}
