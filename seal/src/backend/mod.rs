//! Engines that execute the sealing stages.
//!
//! [`ReferenceBackend`] runs every stage in process against a file-backed
//! device. With the `native` feature, [`NativeBackend`] hands the same calls
//! to the external supraseal engine. Callers go through [`crate::Sealer`],
//! which validates arguments before any backend sees them, so backends may
//! assume shapes and sector sizes are consistent.
//!
//! Each backend owns the layout of its cache directories, so cache
//! validation and the commitment store are backend operations too.

mod reference;

#[cfg(feature = "native")]
mod native;

pub use reference::ReferenceBackend;

#[cfg(feature = "native")]
pub use native::NativeBackend;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::slot::SlotLayout;
use crate::types::{Commitment, CommitmentKind, ReplicaId, SectorSize, Seed, Ticket};

pub trait SealingBackend: Send + Sync + Sized {
    /// Prepares the backend for sectors of `sector_size`. `config_file` is
    /// backend specific.
    fn init(sector_size: SectorSize, config_file: Option<&Path>) -> Result<Self>;

    fn max_block_offset(&self, sector_size: SectorSize) -> Result<u64>;

    fn slot_size(&self, num_sectors: usize, sector_size: SectorSize) -> Result<u64>;

    fn pc1(&self, layout: &SlotLayout, replica_ids: &[ReplicaId], parents_path: &Path)
        -> Result<()>;

    fn pc2(&self, layout: &SlotLayout, output_dir: &Path, data_paths: &[PathBuf]) -> Result<()>;

    fn pc2_cleanup(
        &self,
        num_sectors: usize,
        output_dir: &Path,
        sector_size: SectorSize,
    ) -> Result<()>;

    /// Writes the commit phase 1 output for sector `sector_slot` of the
    /// batch described by `layout` into `cache_path`.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<()>;

    /// Checks that `cache_path` holds everything [`SealingBackend::c1`]
    /// reads. An incomplete cache is a `MissingArtifact` error.
    fn validate_cache_for_commit(&self, cache_path: &Path, replica_path: &Path) -> Result<()>;

    fn comm_c_from_tree(&self, cache_path: &Path, sector_size: SectorSize) -> Result<Commitment>;

    fn comm_r_last_from_tree(&self, cache_path: &Path, sector_size: SectorSize)
        -> Result<Commitment>;

    /// `None` when the value is absent or its file is malformed.
    fn read_commitment(
        &self,
        kind: CommitmentKind,
        cache_path: &Path,
        sector_size: SectorSize,
    ) -> Option<Commitment>;

    fn write_commitment(
        &self,
        kind: CommitmentKind,
        cache_path: &Path,
        value: &Commitment,
    ) -> Result<()>;
}
