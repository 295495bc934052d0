//! Bindings to the supraseal engine.
//!
//! The engine keeps process-wide state: it is initialised once for a single
//! sector size and owns the NVMe devices named in its own configuration file.

use std::ffi::CString;
use std::fs;
use std::os::raw::{c_char, c_int};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use log::{info, warn};
use once_cell::sync::OnceCell;

use super::SealingBackend;
use crate::error::{Result, SealError, Stage};
use crate::slot::SlotLayout;
use crate::types::{Commitment, CommitmentKind, ReplicaId, SectorSize, Seed, Ticket};

mod ffi {
    use std::os::raw::{c_char, c_int};

    extern "C" {
        pub fn supra_seal_init(sector_size: usize, config_file: *const c_char);

        pub fn pc1(
            block_offset: u64,
            num_sectors: usize,
            replica_ids: *const u8,
            parents_filename: *const c_char,
            sector_size: usize,
        ) -> c_int;

        pub fn pc2(
            block_offset: usize,
            num_sectors: usize,
            output_dir: *const c_char,
            data_filenames: *const *const c_char,
            sector_size: usize,
        ) -> c_int;

        pub fn pc2_cleanup(
            num_sectors: usize,
            output_dir: *const c_char,
            sector_size: usize,
        ) -> c_int;

        pub fn c1(
            block_offset: usize,
            num_sectors: usize,
            sector_slot: usize,
            replica_id: *const u8,
            seed: *const u8,
            ticket: *const u8,
            cache_path: *const c_char,
            parents_filename: *const c_char,
            replica_path: *const c_char,
            sector_size: usize,
        ) -> c_int;

        pub fn get_max_block_offset(sector_size: usize) -> usize;

        pub fn get_slot_size(num_sectors: usize, sector_size: usize) -> usize;

        pub fn get_comm_c_from_tree(
            comm_c: *mut u8,
            cache_path: *const c_char,
            sector_size: usize,
        ) -> bool;

        pub fn get_comm_c(comm_c: *mut u8, cache_path: *const c_char) -> bool;

        pub fn set_comm_c(comm_c: *const u8, cache_path: *const c_char) -> bool;

        pub fn get_comm_r_last_from_tree(
            comm_r_last: *mut u8,
            cache_path: *const c_char,
            sector_size: usize,
        ) -> bool;

        pub fn get_comm_r_last(comm_r_last: *mut u8, cache_path: *const c_char) -> bool;

        pub fn set_comm_r_last(comm_r_last: *const u8, cache_path: *const c_char) -> bool;

        pub fn get_comm_r(comm_r: *mut u8, cache_path: *const c_char) -> bool;

        pub fn get_comm_d(comm_d: *mut u8, cache_path: *const c_char) -> bool;

        pub fn get_cc_comm_d(comm_d: *mut u8, sector_size: usize) -> bool;
    }
}

/// Sector size the engine was initialised with in this process.
static INITIALIZED: OnceCell<SectorSize> = OnceCell::new();

fn c_path(path: &Path) -> anyhow::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("path {:?} contains a NUL byte", path))
}

fn check(stage: Stage, status: c_int) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(SealError::Stage {
            stage,
            source: anyhow!("supraseal returned status {}", status),
        })
    }
}

fn missing(path: &Path, reason: impl Into<String>) -> SealError {
    SealError::MissingArtifact {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Handle on the process-wide supraseal engine.
#[derive(Debug)]
pub struct NativeBackend {
    sector_size: SectorSize,
}

impl SealingBackend for NativeBackend {
    fn init(sector_size: SectorSize, config_file: Option<&Path>) -> Result<Self> {
        sector_size.ensure_supported()?;

        let initialized = INITIALIZED.get_or_try_init(|| -> Result<SectorSize> {
            let config = config_file
                .map(c_path)
                .transpose()
                .map_err(SealError::stage(Stage::Init))?;
            let config_ptr = config.as_ref().map_or(std::ptr::null(), |c| c.as_ptr());
            unsafe { ffi::supra_seal_init(sector_size.0 as usize, config_ptr) };
            info!("supraseal initialised for {}", sector_size);
            Ok(sector_size)
        })?;

        if *initialized != sector_size {
            return Err(SealError::SectorSizeMismatch {
                initialized: initialized.0,
                requested: sector_size.0,
            });
        }
        Ok(NativeBackend { sector_size })
    }

    fn max_block_offset(&self, sector_size: SectorSize) -> Result<u64> {
        sector_size.ensure_supported()?;
        match unsafe { ffi::get_max_block_offset(sector_size.0 as usize) } {
            0 => Err(SealError::NoDevice),
            offset => Ok(offset as u64),
        }
    }

    fn slot_size(&self, num_sectors: usize, sector_size: SectorSize) -> Result<u64> {
        sector_size.ensure_supported()?;
        Ok(unsafe { ffi::get_slot_size(num_sectors, sector_size.0 as usize) } as u64)
    }

    fn pc1(
        &self,
        layout: &SlotLayout,
        replica_ids: &[ReplicaId],
        parents_path: &Path,
    ) -> Result<()> {
        let parents = c_path(parents_path).map_err(SealError::stage(Stage::Pc1))?;
        let ids: Vec<u8> = replica_ids.iter().flatten().copied().collect();
        let status = unsafe {
            ffi::pc1(
                layout.block_offset,
                layout.num_sectors,
                ids.as_ptr(),
                parents.as_ptr(),
                self.sector_size.0 as usize,
            )
        };
        check(Stage::Pc1, status)
    }

    fn pc2(&self, layout: &SlotLayout, output_dir: &Path, data_paths: &[PathBuf]) -> Result<()> {
        let output = c_path(output_dir).map_err(SealError::stage(Stage::Pc2))?;
        let data = data_paths
            .iter()
            .map(|p| c_path(p))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(SealError::stage(Stage::Pc2))?;
        let data_ptrs: Vec<*const c_char> = data.iter().map(|c| c.as_ptr()).collect();

        let status = unsafe {
            ffi::pc2(
                layout.block_offset as usize,
                layout.num_sectors,
                output.as_ptr(),
                data_ptrs.as_ptr(),
                self.sector_size.0 as usize,
            )
        };
        check(Stage::Pc2, status)
    }

    fn pc2_cleanup(
        &self,
        num_sectors: usize,
        output_dir: &Path,
        sector_size: SectorSize,
    ) -> Result<()> {
        let output = c_path(output_dir).map_err(SealError::stage(Stage::Pc2Cleanup))?;
        let status =
            unsafe { ffi::pc2_cleanup(num_sectors, output.as_ptr(), sector_size.0 as usize) };
        check(Stage::Pc2Cleanup, status)
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
        let paths = [cache_path, parents_path, replica_path]
            .iter()
            .map(|p| c_path(p))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(SealError::stage(Stage::C1))?;

        let status = unsafe {
            ffi::c1(
                layout.block_offset as usize,
                layout.num_sectors,
                sector_slot,
                replica_id.as_ptr(),
                seed.as_ptr(),
                ticket.as_ptr(),
                paths[0].as_ptr(),
                paths[1].as_ptr(),
                paths[2].as_ptr(),
                self.sector_size.0 as usize,
            )
        };
        check(Stage::C1, status)
    }

    // The engine's cache layout is its own; what c1 needs from it is a
    // full-size replica and both commitments readable from p_aux.
    fn validate_cache_for_commit(&self, cache_path: &Path, replica_path: &Path) -> Result<()> {
        let replica_len = fs::metadata(replica_path)
            .map_err(|e| missing(replica_path, format!("missing replica: {}", e)))?
            .len();
        if replica_len != self.sector_size.0 {
            return Err(missing(
                replica_path,
                format!(
                    "replica has {} bytes, expected {}",
                    replica_len, self.sector_size.0
                ),
            ));
        }

        for kind in [CommitmentKind::C, CommitmentKind::RLast] {
            if self
                .read_commitment(kind, cache_path, self.sector_size)
                .is_none()
            {
                return Err(missing(cache_path, format!("engine has no {}", kind)));
            }
        }
        Ok(())
    }

    fn comm_c_from_tree(&self, cache_path: &Path, sector_size: SectorSize) -> Result<Commitment> {
        let path = c_path(cache_path).map_err(|e| missing(cache_path, format!("{:#}", e)))?;
        let mut comm_c = [0u8; 32];
        let found = unsafe {
            ffi::get_comm_c_from_tree(comm_c.as_mut_ptr(), path.as_ptr(), sector_size.0 as usize)
        };
        if !found {
            return Err(missing(cache_path, "could not compute comm_c from tree_c"));
        }
        Ok(comm_c)
    }

    fn comm_r_last_from_tree(
        &self,
        cache_path: &Path,
        sector_size: SectorSize,
    ) -> Result<Commitment> {
        let path = c_path(cache_path).map_err(|e| missing(cache_path, format!("{:#}", e)))?;
        let mut comm_r_last = [0u8; 32];
        let found = unsafe {
            ffi::get_comm_r_last_from_tree(
                comm_r_last.as_mut_ptr(),
                path.as_ptr(),
                sector_size.0 as usize,
            )
        };
        if !found {
            return Err(missing(
                cache_path,
                "could not compute comm_r_last from tree_r_last",
            ));
        }
        Ok(comm_r_last)
    }

    fn read_commitment(
        &self,
        kind: CommitmentKind,
        cache_path: &Path,
        sector_size: SectorSize,
    ) -> Option<Commitment> {
        let mut out = [0u8; 32];
        if kind == CommitmentKind::CcD {
            let found = unsafe { ffi::get_cc_comm_d(out.as_mut_ptr(), sector_size.0 as usize) };
            return found.then_some(out);
        }

        let path = match c_path(cache_path) {
            Ok(path) => path,
            Err(e) => {
                warn!("cannot read {}: {:#}", kind, e);
                return None;
            }
        };
        let found = unsafe {
            match kind {
                CommitmentKind::C => ffi::get_comm_c(out.as_mut_ptr(), path.as_ptr()),
                CommitmentKind::RLast => ffi::get_comm_r_last(out.as_mut_ptr(), path.as_ptr()),
                CommitmentKind::R => ffi::get_comm_r(out.as_mut_ptr(), path.as_ptr()),
                CommitmentKind::D => ffi::get_comm_d(out.as_mut_ptr(), path.as_ptr()),
                CommitmentKind::CcD => false,
            }
        };
        found.then_some(out)
    }

    fn write_commitment(
        &self,
        kind: CommitmentKind,
        cache_path: &Path,
        value: &Commitment,
    ) -> Result<()> {
        let write_error = |source: anyhow::Error| SealError::CommitmentWrite {
            kind,
            path: cache_path.to_path_buf(),
            source,
        };
        let path = c_path(cache_path).map_err(write_error)?;
        let written = unsafe {
            match kind {
                CommitmentKind::C => ffi::set_comm_c(value.as_ptr(), path.as_ptr()),
                CommitmentKind::RLast => ffi::set_comm_r_last(value.as_ptr(), path.as_ptr()),
                _ => return Err(SealError::ReadOnlyCommitment { kind }),
            }
        };
        if !written {
            return Err(write_error(anyhow!("supraseal could not write p_aux")));
        }
        Ok(())
    }
}
