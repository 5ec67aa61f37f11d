//! Light-client hashing: cache generation and hashimoto over on-demand
//! dataset items.
//!
//! Verification never materialises the full DAG. Each of the 64 dataset
//! accesses is recomputed from the light cache (256 parent lookups per item).

use std::time::Instant;

use tiny_keccak::{Hasher, Keccak};

use crate::epoch::{EpochParams, HASH_BYTES, MIX_BYTES};

const WORD_BYTES: usize = 4;
const HASH_WORDS: usize = HASH_BYTES as usize / WORD_BYTES;
const MIX_WORDS: usize = MIX_BYTES as usize / WORD_BYTES;
const MIX_HASHES: usize = (MIX_BYTES / HASH_BYTES) as usize;

const DATASET_PARENTS: u32 = 256;
const CACHE_ROUNDS: usize = 3;
const ACCESSES: u32 = 64;

const FNV_PRIME: u32 = 0x0100_0193;

pub(crate) fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(input);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

pub(crate) fn keccak512(input: &[u8]) -> [u8; 64] {
    let mut hasher = Keccak::v512();
    hasher.update(input);
    let mut output = [0u8; 64];
    hasher.finalize(&mut output);
    output
}

#[inline]
fn fnv(a: u32, b: u32) -> u32 {
    a.wrapping_mul(FNV_PRIME) ^ b
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn bytes_to_words(bytes: &[u8], out: &mut [u32]) {
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(WORD_BYTES)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

/// Verification cache for one epoch, stored as little-endian 32-bit words.
pub struct LightCache {
    pub epoch: u64,
    pub dataset_size: u64,
    words: Vec<u32>,
}

impl LightCache {
    /// Generate the cache for the given epoch parameters. Takes on the order
    /// of a second in release builds; callers keep the result around.
    pub fn generate(params: &EpochParams) -> Self {
        let start = Instant::now();
        log::info!(
            "etchash_cache_generating epoch={} epoch_length={} cache_bytes={}",
            params.number,
            params.length,
            params.cache_size
        );

        let words = make_cache(params.cache_size, &params.seed_hash);

        log::info!(
            "etchash_cache_generated epoch={} elapsed_ms={}",
            params.number,
            start.elapsed().as_millis()
        );

        Self {
            epoch: params.number,
            dataset_size: params.dataset_size,
            words,
        }
    }

    /// Build a cache with explicit sizes. Only the hashing tests use
    /// non-schedule sizes.
    pub fn with_size(epoch: u64, cache_size: u64, dataset_size: u64, seed: &[u8; 32]) -> Self {
        Self {
            epoch,
            dataset_size,
            words: make_cache(cache_size, seed),
        }
    }

    fn items(&self) -> usize {
        self.words.len() / HASH_WORDS
    }

    fn item(&self, index: usize) -> &[u32] {
        &self.words[index * HASH_WORDS..(index + 1) * HASH_WORDS]
    }

    /// Compute (mix_digest, result) for a header hash and nonce.
    pub fn compute(&self, hash_no_nonce: &[u8; 32], nonce: u64) -> ([u8; 32], [u8; 32]) {
        hashimoto_light(self.dataset_size, self, hash_no_nonce, nonce)
    }
}

fn make_cache(size: u64, seed: &[u8; 32]) -> Vec<u32> {
    let n = (size / HASH_BYTES) as usize;
    let mut rows: Vec<[u8; 64]> = Vec::with_capacity(n);

    rows.push(keccak512(seed));
    for i in 1..n {
        let next = keccak512(&rows[i - 1]);
        rows.push(next);
    }

    // RandMemoHash
    for _ in 0..CACHE_ROUNDS {
        for i in 0..n {
            let src = (i + n - 1) % n;
            let dst = u32::from_le_bytes([rows[i][0], rows[i][1], rows[i][2], rows[i][3]]) as usize % n;
            let mut xored = [0u8; 64];
            for (k, byte) in xored.iter_mut().enumerate() {
                *byte = rows[src][k] ^ rows[dst][k];
            }
            rows[i] = keccak512(&xored);
        }
    }

    let mut words = vec![0u32; n * HASH_WORDS];
    for (i, row) in rows.iter().enumerate() {
        bytes_to_words(row, &mut words[i * HASH_WORDS..(i + 1) * HASH_WORDS]);
    }
    words
}

/// Recompute a single 64-byte dataset item from the light cache.
fn calc_dataset_item(cache: &LightCache, index: u32) -> [u32; HASH_WORDS] {
    let n = cache.items();

    let mut mix = [0u32; HASH_WORDS];
    mix.copy_from_slice(cache.item(index as usize % n));
    mix[0] ^= index;
    let hashed = keccak512(&words_to_bytes(&mix));
    bytes_to_words(&hashed, &mut mix);

    for j in 0..DATASET_PARENTS {
        let parent = fnv(index ^ j, mix[j as usize % HASH_WORDS]) as usize % n;
        let parent_item = cache.item(parent);
        for (m, p) in mix.iter_mut().zip(parent_item) {
            *m = fnv(*m, *p);
        }
    }

    let hashed = keccak512(&words_to_bytes(&mix));
    bytes_to_words(&hashed, &mut mix);
    mix
}

/// Hashimoto with dataset items derived from the light cache.
///
/// Returns `(mix_digest, result)`. The nonce is appended to the header hash in
/// little-endian order.
pub fn hashimoto_light(
    dataset_size: u64,
    cache: &LightCache,
    hash_no_nonce: &[u8; 32],
    nonce: u64,
) -> ([u8; 32], [u8; 32]) {
    let rows = (dataset_size / MIX_BYTES) as u32;

    let mut seed_input = [0u8; 40];
    seed_input[..32].copy_from_slice(hash_no_nonce);
    seed_input[32..].copy_from_slice(&nonce.to_le_bytes());
    let seed = keccak512(&seed_input);

    let mut seed_words = [0u32; HASH_WORDS];
    bytes_to_words(&seed, &mut seed_words);
    let seed_head = seed_words[0];

    let mut mix = [0u32; MIX_WORDS];
    for (i, word) in mix.iter_mut().enumerate() {
        *word = seed_words[i % HASH_WORDS];
    }

    let mut fetched = [0u32; MIX_WORDS];
    for i in 0..ACCESSES {
        let parent = fnv(i ^ seed_head, mix[i as usize % MIX_WORDS]) % rows;
        for j in 0..MIX_HASHES {
            let item = calc_dataset_item(cache, parent * MIX_HASHES as u32 + j as u32);
            fetched[j * HASH_WORDS..(j + 1) * HASH_WORDS].copy_from_slice(&item);
        }
        for (m, f) in mix.iter_mut().zip(fetched.iter()) {
            *m = fnv(*m, *f);
        }
    }

    // Compress 32 words into 8
    let mut mix_digest = [0u8; 32];
    for (i, chunk) in mix.chunks_exact(4).enumerate() {
        let folded = fnv(fnv(fnv(chunk[0], chunk[1]), chunk[2]), chunk[3]);
        mix_digest[i * 4..i * 4 + 4].copy_from_slice(&folded.to_le_bytes());
    }

    let mut final_input = [0u8; 96];
    final_input[..64].copy_from_slice(&seed);
    final_input[64..].copy_from_slice(&mix_digest);
    let result = keccak256(&final_input);

    (mix_digest, result)
}
