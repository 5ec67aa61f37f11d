pub mod blockchain;
pub mod config;
pub mod error;
pub mod hasher;
pub mod metrics;
pub mod shares;

// NOTE: stratum / getwork front-ends live outside this crate and call
// `ShareProcessor::submit` with the parsed `[nonce, hash, mix]` triple.
