use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use crate::types::{Commitment, ReplicaId, Seed};

/// Depth of the largest supported tree (64GiB / 32 bytes = 2^31 leaves).
const MAX_TREE_DEPTH: usize = 31;

/// Roots of all-zero subtrees; entry `h` is the root of a tree of height `h`.
static ZERO_COMMITMENTS: Lazy<Vec<Commitment>> = Lazy::new(|| {
    let mut roots = Vec::with_capacity(MAX_TREE_DEPTH + 1);
    let mut current = [0u8; 32];
    roots.push(current);
    for _ in 0..MAX_TREE_DEPTH {
        current = hash_nodes(&current, &current);
        roots.push(current);
    }
    roots
});

/// Keeps digests inside the 254-bit range the proof system accepts.
#[inline]
pub fn trim_to_fr32(mut digest: Commitment) -> Commitment {
    digest[31] &= 0b0011_1111;
    digest
}

#[inline]
fn finish(hasher: Sha256) -> Commitment {
    trim_to_fr32(hasher.finalize().into())
}

#[inline]
pub fn hash_nodes(left: &Commitment, right: &Commitment) -> Commitment {
    finish(Sha256::new().chain_update(left).chain_update(right))
}

pub fn hash_column(labels: &[Commitment]) -> Commitment {
    let mut hasher = Sha256::new();
    for label in labels {
        hasher.update(label);
    }
    finish(hasher)
}

/// `comm_r` is a function of `comm_c` and `comm_r_last` only.
#[inline]
pub fn comm_r(comm_c: &Commitment, comm_r_last: &Commitment) -> Commitment {
    hash_nodes(comm_c, comm_r_last)
}

/// Label of `node` in `layer` (1-based). `drg_parents` hold labels of the
/// same layer, `exp_parents` labels of the previous layer (empty for the
/// first layer and for node 0).
pub fn label(
    replica_id: &ReplicaId,
    layer: u32,
    node: u64,
    drg_parents: &[&[u8]],
    exp_parents: &[&[u8]],
) -> Commitment {
    let mut hasher = Sha256::new()
        .chain_update(replica_id)
        .chain_update(layer.to_be_bytes())
        .chain_update(node.to_be_bytes());
    for parent in drg_parents.iter().chain(exp_parents) {
        hasher.update(parent);
    }
    finish(hasher)
}

/// Node index of challenge `index` for the given seed. Node 0 is never
/// challenged since its label has no parents.
pub fn derive_challenge(replica_id: &ReplicaId, seed: &Seed, index: u32, nodes: usize) -> u64 {
    let digest = Sha256::new()
        .chain_update(replica_id)
        .chain_update(seed)
        .chain_update(index.to_be_bytes())
        .finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    1 + u64::from_le_bytes(head) % (nodes as u64 - 1)
}

/// Root of a tree over `leafs` zero nodes; `leafs` must be a power of two.
pub fn zero_commitment(leafs: usize) -> Option<Commitment> {
    if !leafs.is_power_of_two() {
        return None;
    }
    ZERO_COMMITMENTS
        .get(leafs.trailing_zeros() as usize)
        .copied()
}

/// `data + key mod 2^254`, both little-endian.
pub fn encode(data: &Commitment, key: &Commitment) -> Commitment {
    let mut out = [0u8; 32];
    let mut carry = 0u16;
    for i in 0..32 {
        let sum = data[i] as u16 + key[i] as u16 + carry;
        out[i] = sum as u8;
        carry = sum >> 8;
    }
    trim_to_fr32(out)
}

#[cfg(test)]
mod test {
    use super::*;

    // Inverse of `encode` for data below 2^254.
    fn decode(replica: &Commitment, key: &Commitment) -> Commitment {
        let mut out = [0u8; 32];
        let mut borrow = 0i16;
        for i in 0..32 {
            let mut diff = replica[i] as i16 - key[i] as i16 - borrow;
            borrow = 0;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            }
            out[i] = diff as u8;
        }
        trim_to_fr32(out)
    }

    #[test]
    fn digests_are_trimmed() {
        let digest = hash_nodes(&[0xff; 32], &[0xee; 32]);
        assert_eq!(digest[31] & 0b1100_0000, 0);
    }

    #[test]
    fn zero_commitment_is_built_from_zero_subtrees() {
        assert_eq!(zero_commitment(1), Some([0u8; 32]));
        let two = hash_nodes(&[0u8; 32], &[0u8; 32]);
        assert_eq!(zero_commitment(2), Some(two));
        assert_eq!(zero_commitment(4), Some(hash_nodes(&two, &two)));
        assert_eq!(zero_commitment(3), None);
    }

    #[test]
    fn encoding_is_reversible_for_fr32_data() {
        let mut data = [0x5au8; 32];
        data[31] = 0x3f;
        let key = trim_to_fr32([0xc3; 32]);
        let replica = encode(&data, &key);
        assert_ne!(replica, data);
        assert_eq!(decode(&replica, &key), data);
    }

    #[test]
    fn challenges_skip_node_zero() {
        let replica_id = [7u8; 32];
        let seed = [9u8; 32];
        for i in 0..64 {
            let c = derive_challenge(&replica_id, &seed, i, 64);
            assert!((1..64).contains(&c));
        }
    }
}
