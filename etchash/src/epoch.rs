//! Epoch parameters for Etchash
//!
//! Ethereum Classic mines with Ethash until the ECIP-1099 activation block,
//! after which the epoch length doubles from 30,000 to 60,000 blocks. Cache and
//! dataset sizes follow the new epoch number, while the seed hash keeps being
//! derived from the legacy 30,000-block schedule.

use crate::light::keccak256;

/// Blocks per epoch before ECIP-1099
pub const EPOCH_LENGTH_DEFAULT: u64 = 30_000;

/// Blocks per epoch from the ECIP-1099 activation block onwards
pub const EPOCH_LENGTH_ECIP1099: u64 = 60_000;

/// Highest epoch supported by the size schedule
pub const MAX_EPOCH: u64 = 2048;

pub const HASH_BYTES: u64 = 64;
pub const MIX_BYTES: u64 = 128;

const CACHE_BYTES_INIT: u64 = 1 << 24;
const CACHE_BYTES_GROWTH: u64 = 1 << 17;
const DATASET_BYTES_INIT: u64 = 1 << 30;
const DATASET_BYTES_GROWTH: u64 = 1 << 23;

/// Epoch length in effect at `height`.
pub fn epoch_length(height: u64, ecip1099_block: Option<u64>) -> u64 {
    match ecip1099_block {
        Some(fork) if height >= fork => EPOCH_LENGTH_ECIP1099,
        _ => EPOCH_LENGTH_DEFAULT,
    }
}

pub fn epoch(height: u64, epoch_length: u64) -> u64 {
    height / epoch_length
}

/// Seed hash for an epoch.
///
/// The seed is Keccak-256 applied repeatedly to 32 zero bytes, once per
/// legacy epoch that precedes the first block of `epoch`. For 60,000-block
/// epochs this lands on the legacy epoch `2 * epoch`.
pub fn seed_hash(epoch: u64, epoch_length: u64) -> [u8; 32] {
    let first_block = epoch * epoch_length + 1;
    let mut seed = [0u8; 32];
    for _ in 0..first_block / EPOCH_LENGTH_DEFAULT {
        seed = keccak256(&seed);
    }
    seed
}

/// Light cache size in bytes: largest `HASH_BYTES * prime` below the linear
/// growth bound.
pub fn cache_size(epoch: u64) -> u64 {
    let mut size = CACHE_BYTES_INIT + CACHE_BYTES_GROWTH * epoch - HASH_BYTES;
    while !is_prime(size / HASH_BYTES) {
        size -= 2 * HASH_BYTES;
    }
    size
}

/// Full dataset size in bytes: largest `MIX_BYTES * prime` below the linear
/// growth bound.
pub fn dataset_size(epoch: u64) -> u64 {
    let mut size = DATASET_BYTES_INIT + DATASET_BYTES_GROWTH * epoch - MIX_BYTES;
    while !is_prime(size / MIX_BYTES) {
        size -= 2 * MIX_BYTES;
    }
    size
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut i = 5u64;
    while i * i <= n {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}

/// Resolved parameters for the epoch containing a given height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochParams {
    pub number: u64,
    pub length: u64,
    pub seed_hash: [u8; 32],
    pub cache_size: u64,
    pub dataset_size: u64,
}

impl EpochParams {
    pub fn for_height(height: u64, ecip1099_block: Option<u64>) -> Self {
        let length = epoch_length(height, ecip1099_block);
        let number = epoch(height, length);
        Self {
            number,
            length,
            seed_hash: seed_hash(number, length),
            cache_size: cache_size(number),
            dataset_size: dataset_size(number),
        }
    }
}
