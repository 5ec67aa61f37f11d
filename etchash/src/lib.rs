//! # Etchash - Ethereum Classic proof-of-work verification
//!
//! Light-client Ethash with the ECIP-1099 epoch schedule.
//!
//! ## Architecture
//!
//! ```text
//! height → [EpochParams] → [LightCache] → hashimoto_light → (mix_digest, result)
//!                                                               ↓
//!                                               result <= 2^256 / difficulty
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use etchash::{Candidate, Etchash, PowVerifier};
//!
//! let hasher = Etchash::new(Some(11_700_000));
//! hasher.prepare(height);
//! let valid = hasher.verify(&candidate);
//! ```

pub mod epoch;
pub mod light;
pub mod verifier;

pub use epoch::{EpochParams, EPOCH_LENGTH_DEFAULT, EPOCH_LENGTH_ECIP1099, MAX_EPOCH};
pub use light::{hashimoto_light, LightCache};
pub use verifier::{
    difficulty_for_target, meets_difficulty, target_for_difficulty, Candidate, Etchash,
    PowVerifier,
};
