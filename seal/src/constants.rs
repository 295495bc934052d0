use std::collections::HashMap;
use std::sync::RwLock;

use lazy_static::lazy_static;

pub const SECTOR_SIZE_2_KIB: u64 = 1 << 11;
pub const SECTOR_SIZE_4_KIB: u64 = 1 << 12;
pub const SECTOR_SIZE_16_KIB: u64 = 1 << 14;
pub const SECTOR_SIZE_32_KIB: u64 = 1 << 15;
pub const SECTOR_SIZE_8_MIB: u64 = 1 << 23;
pub const SECTOR_SIZE_16_MIB: u64 = 1 << 24;
pub const SECTOR_SIZE_512_MIB: u64 = 1 << 29;
pub const SECTOR_SIZE_1_GIB: u64 = 1 << 30;
pub const SECTOR_SIZE_32_GIB: u64 = 1 << 35;
pub const SECTOR_SIZE_64_GIB: u64 = 1 << 36;

pub const SUPPORTED_SECTOR_SIZES: [u64; 10] = [
    SECTOR_SIZE_2_KIB,
    SECTOR_SIZE_4_KIB,
    SECTOR_SIZE_16_KIB,
    SECTOR_SIZE_32_KIB,
    SECTOR_SIZE_8_MIB,
    SECTOR_SIZE_16_MIB,
    SECTOR_SIZE_512_MIB,
    SECTOR_SIZE_1_GIB,
    SECTOR_SIZE_32_GIB,
    SECTOR_SIZE_64_GIB,
];

/// Size in bytes of a single tree node / label.
pub const NODE_SIZE: usize = 32;

/// Device page size; slots are always a whole number of blocks.
pub const BLOCK_SIZE: usize = 4096;

/// Base (same layer) parents per node in the parents file.
pub const DRG_DEGREE: usize = 6;

/// Expander (previous layer) parents per node in the parents file.
pub const EXP_DEGREE: usize = 8;

pub const PARENT_COUNT: usize = DRG_DEGREE + EXP_DEGREE;

/// Bytes taken by one node's record in the parents file.
pub const PARENTS_RECORD_SIZE: usize = PARENT_COUNT * std::mem::size_of::<u32>();

/// Path recognised as the data source of a committed-capacity sector.
pub const DEV_ZERO: &str = "/dev/zero";

pub struct PorepMinimumChallenges(RwLock<HashMap<u64, usize>>);

impl PorepMinimumChallenges {
    pub fn from_sector_size(&self, sector_size: u64) -> Option<usize> {
        self.0
            .read()
            .expect("POREP_MINIMUM_CHALLENGES poisoned")
            .get(&sector_size)
            .copied()
    }
}

lazy_static! {
    pub static ref LAYERS: RwLock<HashMap<u64, usize>> = RwLock::new(
        [
            (SECTOR_SIZE_2_KIB, 2),
            (SECTOR_SIZE_4_KIB, 2),
            (SECTOR_SIZE_16_KIB, 2),
            (SECTOR_SIZE_32_KIB, 2),
            (SECTOR_SIZE_8_MIB, 2),
            (SECTOR_SIZE_16_MIB, 2),
            (SECTOR_SIZE_512_MIB, 2),
            (SECTOR_SIZE_1_GIB, 2),
            (SECTOR_SIZE_32_GIB, 11),
            (SECTOR_SIZE_64_GIB, 11),
        ]
        .iter()
        .copied()
        .collect()
    );
    pub static ref POREP_MINIMUM_CHALLENGES: PorepMinimumChallenges = PorepMinimumChallenges(
        RwLock::new(
            [
                (SECTOR_SIZE_2_KIB, 2),
                (SECTOR_SIZE_4_KIB, 2),
                (SECTOR_SIZE_16_KIB, 2),
                (SECTOR_SIZE_32_KIB, 2),
                (SECTOR_SIZE_8_MIB, 2),
                (SECTOR_SIZE_16_MIB, 2),
                (SECTOR_SIZE_512_MIB, 2),
                (SECTOR_SIZE_1_GIB, 2),
                (SECTOR_SIZE_32_GIB, 176),
                (SECTOR_SIZE_64_GIB, 176),
            ]
            .iter()
            .copied()
            .collect()
        )
    );
}
