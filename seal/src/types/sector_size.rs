use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BLOCK_SIZE, LAYERS, NODE_SIZE, POREP_MINIMUM_CHALLENGES, SUPPORTED_SECTOR_SIZES,
};
use crate::error::SealError;

/// Raw capacity of one sector in bytes. Only the sizes listed in
/// `SUPPORTED_SECTOR_SIZES` are accepted by the pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectorSize(pub u64);

impl SectorSize {
    pub fn is_supported(self) -> bool {
        SUPPORTED_SECTOR_SIZES.contains(&self.0)
    }

    pub fn ensure_supported(self) -> Result<Self, SealError> {
        if self.is_supported() {
            Ok(self)
        } else {
            Err(SealError::UnsupportedSectorSize(self.0))
        }
    }

    /// Number of 32-byte nodes in the sector.
    #[inline]
    pub fn nodes(self) -> usize {
        self.0 as usize / NODE_SIZE
    }

    pub fn layers(self) -> Result<usize, SealError> {
        LAYERS
            .read()
            .expect("LAYERS poisoned")
            .get(&self.0)
            .copied()
            .ok_or(SealError::UnsupportedSectorSize(self.0))
    }

    pub fn minimum_challenges(self) -> Result<usize, SealError> {
        POREP_MINIMUM_CHALLENGES
            .from_sector_size(self.0)
            .ok_or(SealError::UnsupportedSectorSize(self.0))
    }

    /// Device blocks occupied by one layer of one sector. Layers always start
    /// on a block boundary, so sectors smaller than a block still take one.
    #[inline]
    pub fn blocks_per_layer(self) -> u64 {
        (self.0 + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64
    }
}

impl From<SectorSize> for u64 {
    fn from(size: SectorSize) -> Self {
        size.0
    }
}

impl fmt::Display for SectorSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
        let mut value = self.0;
        let mut unit = 0;
        while value >= 1024 && value % 1024 == 0 && unit < UNITS.len() - 1 {
            value /= 1024;
            unit += 1;
        }
        write!(f, "{}{}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::{SECTOR_SIZE_2_KIB, SECTOR_SIZE_32_GIB, SECTOR_SIZE_64_GIB};

    #[test]
    fn geometry_of_supported_sizes() {
        let small = SectorSize(SECTOR_SIZE_2_KIB);
        assert_eq!(small.nodes(), 64);
        assert_eq!(small.layers().unwrap(), 2);
        assert_eq!(small.blocks_per_layer(), 1);

        let large = SectorSize(SECTOR_SIZE_32_GIB);
        assert_eq!(large.layers().unwrap(), 11);
        assert_eq!(large.blocks_per_layer(), SECTOR_SIZE_32_GIB / 4096);
        assert_eq!(large.minimum_challenges().unwrap(), 176);
    }

    #[test]
    fn rejects_unsupported_sizes() {
        let odd = SectorSize(3000);
        assert!(!odd.is_supported());
        assert!(matches!(
            odd.ensure_supported(),
            Err(SealError::UnsupportedSectorSize(3000))
        ));
        assert!(odd.layers().is_err());
    }

    #[test]
    fn display_uses_binary_units() {
        assert_eq!(SectorSize(SECTOR_SIZE_2_KIB).to_string(), "2KiB");
        assert_eq!(SectorSize(SECTOR_SIZE_64_GIB).to_string(), "64GiB");
        assert_eq!(SectorSize(3000).to_string(), "3000B");
    }
}
