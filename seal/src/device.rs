use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, trace};
use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::config::DeviceConfig;
use crate::constants::BLOCK_SIZE;
use crate::slot::SlotLayout;

/// File-backed block device. Slots are mapped on demand; the device itself
/// does no bookkeeping of which ranges are in use.
#[derive(Debug)]
pub struct BlockDevice {
    file: File,
    path: PathBuf,
    blocks: u64,
}

impl BlockDevice {
    /// Opens the device file, creating it or growing it to the configured
    /// capacity. Existing contents are kept.
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        let path = &config.path;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("could not open device={:?}", path.display()))?;

        let want = config.blocks * BLOCK_SIZE as u64;
        let have = file
            .metadata()
            .with_context(|| format!("could not stat device={:?}", path.display()))?
            .len();
        if have < want {
            file.set_len(want)
                .with_context(|| format!("could not size device={:?}", path.display()))?;
        }

        info!(
            "opened device {:?} with {} blocks of {} bytes",
            path.display(),
            config.blocks,
            BLOCK_SIZE
        );
        Ok(BlockDevice {
            file,
            path: path.clone(),
            blocks: config.blocks,
        })
    }

    #[inline]
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn byte_range(&self, layout: &SlotLayout) -> (u64, usize) {
        (
            layout.block_offset * BLOCK_SIZE as u64,
            layout.blocks() as usize * BLOCK_SIZE,
        )
    }

    /// Writable mapping of the whole slot. The caller must have checked the
    /// layout against the device capacity.
    pub fn map_slot_mut(&self, layout: &SlotLayout) -> Result<MmapMut> {
        let (offset, len) = self.byte_range(layout);
        trace!("mapping slot rw: offset {} bytes, len {} bytes", offset, len);
        unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(len)
                .map_mut(&self.file)
                .with_context(|| {
                    format!(
                        "could not mmap slot at block {} of device={:?}",
                        layout.block_offset,
                        self.path.display()
                    )
                })
        }
    }

    pub fn map_slot(&self, layout: &SlotLayout) -> Result<Mmap> {
        let (offset, len) = self.byte_range(layout);
        trace!("mapping slot ro: offset {} bytes, len {} bytes", offset, len);
        unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(len)
                .map(&self.file)
                .with_context(|| {
                    format!(
                        "could not mmap slot at block {} of device={:?}",
                        layout.block_offset,
                        self.path.display()
                    )
                })
        }
    }
}
