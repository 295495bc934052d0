//! Slot arithmetic: how a batch of sectors is laid out on the device.
//!
//! Sector `k` of a batch starting at `block_offset` owns
//! `slot_size(1, size)` blocks starting at `block_offset + k * slot_size(1, size)`.
//! Inside that range each layer starts on a block boundary.

use std::ops::Range;

use crate::constants::BLOCK_SIZE;
use crate::error::{Result, SealError};
use crate::types::SectorSize;

/// Blocks needed by a batch of `num_sectors` sectors. Purely a capacity
/// calculation; it does not look at the device.
pub fn slot_size(num_sectors: usize, sector_size: SectorSize) -> Result<u64> {
    let layers = sector_size.layers()? as u64;
    Ok(num_sectors as u64 * layers * sector_size.blocks_per_layer())
}

/// Exclusive upper bound of usable block offsets on a device of
/// `device_blocks` blocks. Callers must check
/// `offset + slot_size(n, size) <= max_block_offset(size)` before allocating.
pub fn max_block_offset(device_blocks: Option<u64>, sector_size: SectorSize) -> Result<u64> {
    sector_size.ensure_supported()?;
    let blocks = device_blocks.ok_or(SealError::NoDevice)?;
    let per_sector = slot_size(1, sector_size)?;
    // Round down so the bound always lands on a whole sector slot.
    Ok(blocks - blocks % per_sector)
}

/// Geometry of one batch within the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotLayout {
    pub block_offset: u64,
    pub num_sectors: usize,
    pub sector_size: SectorSize,
    pub layers: usize,
}

impl SlotLayout {
    pub fn new(block_offset: u64, num_sectors: usize, sector_size: SectorSize) -> Result<Self> {
        let layers = sector_size.layers()?;
        Ok(SlotLayout {
            block_offset,
            num_sectors,
            sector_size,
            layers,
        })
    }

    /// Blocks covered by the whole batch.
    pub fn blocks(&self) -> u64 {
        self.num_sectors as u64 * self.sector_blocks()
    }

    /// Blocks owned by a single sector of the batch.
    pub fn sector_blocks(&self) -> u64 {
        self.layers as u64 * self.sector_size.blocks_per_layer()
    }

    /// Byte stride between consecutive sectors in a mapping of the slot.
    pub fn sector_stride(&self) -> usize {
        self.sector_blocks() as usize * BLOCK_SIZE
    }

    /// Byte stride between consecutive layers of a sector.
    pub fn layer_stride(&self) -> usize {
        self.sector_size.blocks_per_layer() as usize * BLOCK_SIZE
    }

    /// Bytes of `layer` (0-based) of sector `sector`, relative to the start
    /// of the slot mapping. Only the first `sector_size` bytes hold labels.
    pub fn layer_range(&self, sector: usize, layer: usize) -> Range<usize> {
        let start = sector * self.sector_stride() + layer * self.layer_stride();
        start..start + self.sector_size.0 as usize
    }

    /// The sub-slot holding only sector `sector_slot` of this batch.
    pub fn sector(&self, sector_slot: usize) -> SlotLayout {
        SlotLayout {
            block_offset: self.block_offset + sector_slot as u64 * self.sector_blocks(),
            num_sectors: 1,
            ..*self
        }
    }

    /// Fails unless the batch fits below `max_block_offset`.
    pub fn ensure_within(&self, max_block_offset: u64) -> Result<()> {
        let end = self.block_offset.checked_add(self.blocks());
        match end {
            Some(end) if end <= max_block_offset => Ok(()),
            _ => Err(SealError::SlotOutOfBounds {
                offset: self.block_offset,
                blocks: self.blocks(),
                capacity: max_block_offset,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::{SECTOR_SIZE_2_KIB, SECTOR_SIZE_32_GIB, SUPPORTED_SECTOR_SIZES};

    #[test]
    fn slot_size_is_linear() {
        for &size in SUPPORTED_SECTOR_SIZES.iter() {
            let size = SectorSize(size);
            let one = slot_size(1, size).unwrap();
            for n in [0usize, 1, 2, 7, 128] {
                assert_eq!(slot_size(n, size).unwrap(), n as u64 * one);
            }
        }
    }

    #[test]
    fn small_sectors_take_one_block_per_layer() {
        assert_eq!(slot_size(1, SectorSize(SECTOR_SIZE_2_KIB)).unwrap(), 2);
        assert_eq!(
            slot_size(1, SectorSize(SECTOR_SIZE_32_GIB)).unwrap(),
            11 * (SECTOR_SIZE_32_GIB / 4096)
        );
    }

    #[test]
    fn max_block_offset_needs_device_and_supported_size() {
        let size = SectorSize(SECTOR_SIZE_2_KIB);
        assert!(matches!(
            max_block_offset(None, size),
            Err(SealError::NoDevice)
        ));
        assert!(matches!(
            max_block_offset(Some(100), SectorSize(1000)),
            Err(SealError::UnsupportedSectorSize(1000))
        ));
        assert_eq!(max_block_offset(Some(101), size).unwrap(), 100);
    }

    #[test]
    fn layout_ranges_do_not_overlap() {
        let layout = SlotLayout::new(10, 3, SectorSize(SECTOR_SIZE_2_KIB)).unwrap();
        assert_eq!(layout.blocks(), 6);
        assert_eq!(layout.layer_range(0, 0), 0..2048);
        assert_eq!(layout.layer_range(0, 1), 4096..4096 + 2048);
        assert_eq!(layout.layer_range(2, 1), 5 * 4096..5 * 4096 + 2048);
        assert_eq!(layout.sector(2).block_offset, 14);

        assert!(layout.ensure_within(16).is_ok());
        assert!(matches!(
            layout.ensure_within(15),
            Err(SealError::SlotOutOfBounds { .. })
        ));
    }
}
