//! Slot-based sealing pipeline.
//!
//! A batch of sectors is assigned a slot of device blocks, encoded in place
//! (pc1), turned into commitment trees and a sealed replica per sector
//! (pc2), and finally opened at seed-derived challenges (c1). Every
//! operation goes through a [`Sealer`] handle.

mod backend;
mod c1;
mod cache;
mod cache_key;
mod commitments;
mod config;
mod constants;
mod device;
mod error;
mod hasher;
mod merkle;
mod parents;
mod pc1;
mod pc2;
mod sealer;
mod session;
mod slot;
mod types;
mod util;


pub use backend::*;
pub use c1::{read_commit_phase1_output, verify_vanilla_proof, PublicInputs};
pub use cache::validate_cache_for_commit;
pub use cache_key::{sector_cache_dir, CacheKey};
pub use commitments::{
    cc_comm_d, comm_c_from_tree, comm_r_last_from_tree, get_comm_c, get_comm_d, get_comm_r,
    get_comm_r_last, read_commitment, set_comm_c, set_comm_r_last, write_commitment,
};
pub use config::{DeviceConfig, SealConfig};
pub use constants::*;
pub use error::{status, Result, SealError, Stage};
pub use hasher::comm_r;
pub use merkle::MerkleProof;
pub use parents::{write_parents_file, ParentsGraph};
pub use sealer::Sealer;
pub use session::SealSession;
pub use slot::{max_block_offset, slot_size, SlotLayout};
pub use types::*;
