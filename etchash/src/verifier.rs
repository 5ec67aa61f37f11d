//! Etchash proof-of-work verifier
//!
//! One `Etchash` instance is built per process for a fixed ECIP-1099
//! activation block. Light caches are generated on first use of an epoch and
//! the most recent few are kept. Concurrent first use of an epoch blocks on
//! a single generation instead of racing.

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;

use crate::epoch::{EpochParams, EPOCH_LENGTH_DEFAULT, MAX_EPOCH};
use crate::light::LightCache;

/// Caches kept in memory (current, previous, next)
const CACHES_KEPT: usize = 3;

/// 2^256
static MAX_HASH: Lazy<BigUint> = Lazy::new(|| BigUint::one() << 256);

/// A proof-of-work instance to check: header data plus the difficulty it has
/// to meet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub height: u64,
    pub hash_no_nonce: [u8; 32],
    pub difficulty: BigUint,
    pub nonce: u64,
    pub mix_digest: [u8; 32],
}

/// Anything able to decide whether a candidate meets its difficulty.
pub trait PowVerifier: Send + Sync {
    fn verify(&self, candidate: &Candidate) -> bool;

    /// Hint that shares for `height` are about to arrive.
    fn prepare(&self, _height: u64) {}
}

/// Target for a difficulty: 2^256 / difficulty.
pub fn target_for_difficulty(difficulty: &BigUint) -> Option<BigUint> {
    if difficulty.is_zero() {
        return None;
    }
    Some(&*MAX_HASH / difficulty)
}

/// Difficulty for a target: 2^256 / target (inverse of the above).
pub fn difficulty_for_target(target: &BigUint) -> Option<BigUint> {
    if target.is_zero() {
        return None;
    }
    Some(&*MAX_HASH / target)
}

/// Whether a 32-byte big-endian result is at or below `2^256 / difficulty`.
pub fn meets_difficulty(result: &[u8; 32], difficulty: &BigUint) -> bool {
    match target_for_difficulty(difficulty) {
        Some(target) => BigUint::from_bytes_be(result) <= target,
        None => false,
    }
}

type CacheSlot = Arc<OnceCell<Arc<LightCache>>>;

pub struct Etchash {
    ecip1099_block: Option<u64>,
    caches: Mutex<Vec<(u64, u64, CacheSlot)>>,
}

impl Etchash {
    /// `ecip1099_block` is the height at which epochs become 60,000 blocks
    /// long; `None` keeps the legacy schedule forever.
    pub fn new(ecip1099_block: Option<u64>) -> Self {
        log::info!("etchash_verifier_init ecip1099_block={:?}", ecip1099_block);
        Self {
            ecip1099_block,
            caches: Mutex::new(Vec::with_capacity(CACHES_KEPT)),
        }
    }

    pub fn ecip1099_block(&self) -> Option<u64> {
        self.ecip1099_block
    }

    pub fn epoch_params(&self, height: u64) -> EpochParams {
        EpochParams::for_height(height, self.ecip1099_block)
    }

    /// Light cache for the epoch containing `height`, generated on first use.
    pub fn cache_for(&self, height: u64) -> Arc<LightCache> {
        let params = self.epoch_params(height);
        let slot = self.slot(&params);
        slot.get_or_init(|| Arc::new(LightCache::generate(&params))).clone()
    }

    /// Generate the cache for `height` ahead of the first share that needs it.
    pub fn prepare(&self, height: u64) {
        let _ = self.cache_for(height);
    }

    fn slot(&self, params: &EpochParams) -> CacheSlot {
        let mut caches = self.caches.lock();
        // Epoch numbers repeat across the fork, so the key includes the length
        if let Some((_, _, slot)) = caches
            .iter()
            .find(|(epoch, length, _)| *epoch == params.number && *length == params.length)
        {
            return slot.clone();
        }

        if caches.len() >= CACHES_KEPT {
            let evicted = caches.remove(0);
            log::debug!("etchash_cache_evicted epoch={} epoch_length={}", evicted.0, evicted.1);
        }
        let slot: CacheSlot = Arc::new(OnceCell::new());
        caches.push((params.number, params.length, slot.clone()));
        slot
    }

    /// Full verification: recompute the mix digest and result, require the
    /// mix digest to match and the result to meet the candidate difficulty.
    pub fn verify_candidate(&self, candidate: &Candidate) -> bool {
        if candidate.height >= EPOCH_LENGTH_DEFAULT * MAX_EPOCH {
            log::debug!("etchash_verify_height_out_of_range height={}", candidate.height);
            return false;
        }
        if candidate.difficulty.is_zero() {
            return false;
        }

        let cache = self.cache_for(candidate.height);
        let (mix_digest, result) = cache.compute(&candidate.hash_no_nonce, candidate.nonce);

        if mix_digest != candidate.mix_digest {
            return false;
        }
        meets_difficulty(&result, &candidate.difficulty)
    }
}

impl PowVerifier for Etchash {
    fn verify(&self, candidate: &Candidate) -> bool {
        self.verify_candidate(candidate)
    }

    fn prepare(&self, height: u64) {
        Etchash::prepare(self, height)
    }
}
