use std::path::{Path, PathBuf};

use log::info;

use crate::backend::{ReferenceBackend, SealingBackend};
use crate::cache;
use crate::error::{Result, SealError, Stage};
use crate::slot::SlotLayout;
use crate::types::{Commitment, CommitmentKind, ReplicaId, SectorSize, COMMITMENT_LEN};
use crate::util::short_hex;

fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(SealError::InvalidInputShape {
            what,
            expected,
            actual,
        })
    }
}

fn ensure_batch(num_sectors: usize) -> Result<()> {
    if num_sectors == 0 {
        return Err(SealError::InvalidInputShape {
            what: "num_sectors",
            expected: 1,
            actual: 0,
        });
    }
    Ok(())
}

fn to_array(what: &'static str, bytes: &[u8]) -> Result<[u8; COMMITMENT_LEN]> {
    bytes.try_into().map_err(|_| SealError::InvalidInputShape {
        what,
        expected: COMMITMENT_LEN,
        actual: bytes.len(),
    })
}

/// Handle returned by [`Sealer::init`] and required by every operation.
///
/// A handle serves one sector size. It does no locking of its own: batches
/// may run concurrently only on disjoint slots and cache paths.
#[derive(Debug)]
pub struct Sealer<B: SealingBackend = ReferenceBackend> {
    sector_size: SectorSize,
    backend: B,
}

impl<B: SealingBackend> Sealer<B> {
    pub fn init(sector_size: SectorSize, config_file: Option<&Path>) -> Result<Self> {
        info!("init: sector size {}, config {:?}", sector_size, config_file);
        sector_size.ensure_supported()?;
        let backend = B::init(sector_size, config_file)?;
        Ok(Sealer {
            sector_size,
            backend,
        })
    }

    /// Wraps an already initialised backend.
    pub fn with_backend(sector_size: SectorSize, backend: B) -> Result<Self> {
        sector_size.ensure_supported()?;
        Ok(Sealer {
            sector_size,
            backend,
        })
    }

    #[inline]
    pub fn sector_size(&self) -> SectorSize {
        self.sector_size
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn check_size(&self, requested: SectorSize) -> Result<()> {
        requested.ensure_supported()?;
        if requested != self.sector_size {
            return Err(SealError::SectorSizeMismatch {
                initialized: self.sector_size.0,
                requested: requested.0,
            });
        }
        Ok(())
    }

    /// Exclusive upper bound for `block_offset + slot_size(..)`.
    pub fn max_block_offset(&self, sector_size: SectorSize) -> Result<u64> {
        self.check_size(sector_size)?;
        self.backend.max_block_offset(sector_size)
    }

    pub fn slot_size(&self, num_sectors: usize, sector_size: SectorSize) -> Result<u64> {
        self.check_size(sector_size)?;
        self.backend.slot_size(num_sectors, sector_size)
    }

    /// Stage 1. `replica_ids` holds one 32-byte id per sector, back to back.
    /// A failure leaves the slot in an undefined state; redo the whole slot.
    pub fn pc1(
        &self,
        block_offset: u64,
        num_sectors: usize,
        replica_ids: &[u8],
        parents_path: &Path,
        sector_size: SectorSize,
    ) -> Result<()> {
        self.check_size(sector_size)?;
        ensure_batch(num_sectors)?;
        ensure_len("replica_ids", num_sectors * COMMITMENT_LEN, replica_ids.len())?;

        let ids: Vec<ReplicaId> = replica_ids
            .chunks_exact(COMMITMENT_LEN)
            .map(|id| to_array("replica_ids", id))
            .collect::<Result<_>>()?;
        let layout = SlotLayout::new(block_offset, num_sectors, sector_size)?;

        info!("pc1:start: offset {}, {} sectors", block_offset, num_sectors);
        self.backend.pc1(&layout, &ids, parents_path)?;
        info!("pc1:finish");
        Ok(())
    }

    /// Stage 2. Call [`Sealer::pc2_cleanup`] before retrying a failed batch.
    pub fn pc2(
        &self,
        block_offset: u64,
        num_sectors: usize,
        output_dir: &Path,
        data_paths: &[PathBuf],
        sector_size: SectorSize,
    ) -> Result<()> {
        self.check_size(sector_size)?;
        ensure_batch(num_sectors)?;
        ensure_len("data_paths", num_sectors, data_paths.len())?;
        let layout = SlotLayout::new(block_offset, num_sectors, sector_size)?;

        info!(
            "pc2:start: offset {}, {} sectors into {:?}",
            block_offset, num_sectors, output_dir
        );
        self.backend.pc2(&layout, output_dir, data_paths)?;
        info!("pc2:finish");
        Ok(())
    }

    /// Removes everything [`Sealer::pc2`] wrote for the batch. Safe to call
    /// any number of times, whether or not stage 2 ran.
    pub fn pc2_cleanup(
        &self,
        num_sectors: usize,
        output_dir: &Path,
        sector_size: SectorSize,
    ) -> Result<()> {
        self.check_size(sector_size)?;
        self.backend.pc2_cleanup(num_sectors, output_dir, sector_size)
    }

    /// Stage 3 for one sector of a batch. The cache is validated first; if it
    /// is incomplete nothing is written.
    #[allow(clippy::too_many_arguments)]
    pub fn c1(
        &self,
        block_offset: u64,
        num_sectors: usize,
        sector_slot: usize,
        replica_id: &[u8],
        seed: &[u8],
        ticket: &[u8],
        cache_path: &Path,
        parents_path: &Path,
        replica_path: &Path,
        sector_size: SectorSize,
    ) -> Result<()> {
        self.check_size(sector_size)?;
        ensure_batch(num_sectors)?;
        if sector_slot >= num_sectors {
            return Err(SealError::InvalidSectorSlot {
                slot: sector_slot,
                num_sectors,
            });
        }
        let replica_id = to_array("replica_id", replica_id)?;
        let seed = to_array("seed", seed)?;
        let ticket = to_array("ticket", ticket)?;
        let layout = SlotLayout::new(block_offset, num_sectors, sector_size)?;

        info!(
            "c1:start: replica_id {}, slot {} of {} at offset {}",
            short_hex(&replica_id),
            sector_slot,
            num_sectors,
            block_offset
        );
        self.validate_cache_for_commit(cache_path, replica_path)?;

        self.backend.c1(
            &layout,
            sector_slot,
            &replica_id,
            &seed,
            &ticket,
            cache_path,
            parents_path,
            replica_path,
        )?;
        info!("c1:finish");
        Ok(())
    }

    /// Checks that a cache path holds everything stage 3 needs, built for this
    /// handle's sector size.
    pub fn validate_cache_for_commit(&self, cache_path: &Path, replica_path: &Path) -> Result<()> {
        self.backend.validate_cache_for_commit(cache_path, replica_path)
    }

    /// Drops the trees only stage 3 needs. Run after a successful [`Sealer::c1`].
    pub fn clear_cache(&self, cache_path: &Path) -> Result<()> {
        cache::clear_cache(cache_path).map_err(SealError::stage(Stage::ClearCache))
    }

    pub fn comm_c_from_tree(&self, cache_path: &Path, sector_size: SectorSize) -> Result<Commitment> {
        self.check_size(sector_size)?;
        self.backend.comm_c_from_tree(cache_path, sector_size)
    }

    pub fn comm_r_last_from_tree(
        &self,
        cache_path: &Path,
        sector_size: SectorSize,
    ) -> Result<Commitment> {
        self.check_size(sector_size)?;
        self.backend.comm_r_last_from_tree(cache_path, sector_size)
    }

    /// `None` when the value is absent or its file is malformed.
    pub fn read_commitment(&self, kind: CommitmentKind, cache_path: &Path) -> Option<Commitment> {
        self.backend.read_commitment(kind, cache_path, self.sector_size)
    }

    /// Only [`CommitmentKind::C`] and [`CommitmentKind::RLast`] are writable.
    pub fn write_commitment(
        &self,
        kind: CommitmentKind,
        cache_path: &Path,
        value: &[u8],
    ) -> Result<()> {
        let value = to_array("commitment", value)?;
        self.backend.write_commitment(kind, cache_path, &value)
    }

    pub fn cc_comm_d(&self, sector_size: SectorSize) -> Option<Commitment> {
        if !sector_size.is_supported() {
            return None;
        }
        self.backend
            .read_commitment(CommitmentKind::CcD, Path::new(""), sector_size)
    }
}
