/// Share Validator - classifies a submission against the current work
///
/// A submission is checked twice with Etchash: first at the pool share
/// difficulty, then, only if that passes, at the network difficulty of the
/// work it names. Both checks run on the blocking pool.

use etchash::Candidate;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::blockchain::{BlockTemplate, WorkDescriptor};
use crate::error::{ProxyError, Result};
use crate::hasher::HasherProvider;
use crate::metrics::prometheus as metrics;

/// `[nonce, hash_no_nonce, mix_digest]` exactly as the miner sent them
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmitParams {
    pub nonce: String,
    pub hash_no_nonce: String,
    pub mix_digest: String,
}

impl SubmitParams {
    pub fn new(nonce: &str, hash_no_nonce: &str, mix_digest: &str) -> Self {
        Self {
            nonce: nonce.to_string(),
            hash_no_nonce: hash_no_nonce.to_string(),
            mix_digest: mix_digest.to_string(),
        }
    }

    pub fn from_slice(params: &[String]) -> Option<Self> {
        match params {
            [nonce, hash_no_nonce, mix_digest] => Some(Self::new(nonce, hash_no_nonce, mix_digest)),
            _ => None,
        }
    }

    pub fn as_array(&self) -> [&str; 3] {
        [&self.nonce, &self.hash_no_nonce, &self.mix_digest]
    }

    /// `nonce:hash:mix`, the identity of a proof of work
    pub fn pow_key(&self) -> String {
        self.as_array().join(":")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Stale,
    Invalid,
    Share,
    Block,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Stale => "stale",
            Outcome::Invalid => "invalid",
            Outcome::Share => "share",
            Outcome::Block => "block",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one submission, with the work it resolved to
#[derive(Debug, Clone)]
pub enum Verification {
    Stale,
    Invalid(Arc<WorkDescriptor>),
    Share(Arc<WorkDescriptor>),
    Block(Arc<WorkDescriptor>),
}

impl Verification {
    pub fn outcome(&self) -> Outcome {
        match self {
            Verification::Stale => Outcome::Stale,
            Verification::Invalid(_) => Outcome::Invalid,
            Verification::Share(_) => Outcome::Share,
            Verification::Block(_) => Outcome::Block,
        }
    }

    /// Why the submission earns nothing, for the rejected outcomes
    pub fn rejection(&self, params: &SubmitParams) -> Option<ProxyError> {
        match self {
            Verification::Stale => Some(ProxyError::StaleWork(params.hash_no_nonce.clone())),
            Verification::Invalid(_) => Some(ProxyError::InvalidProof),
            Verification::Share(_) | Verification::Block(_) => None,
        }
    }
}

/// Parse a hex nonce, with or without `0x`. Returns `None` if it is not a
/// 64-bit hex number. Only hex digits are accepted, so no sign prefix.
pub fn parse_nonce(nonce_hex: &str) -> Option<u64> {
    let digits = nonce_hex.replace("0x", "");
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(&digits, 16).ok()
}

/// Decode a hex hash into 32 bytes, right-aligned. Longer input keeps its
/// last 32 bytes; undecodable input is the zero hash.
pub fn parse_hash(hash_hex: &str) -> [u8; 32] {
    let digits = hash_hex
        .strip_prefix("0x")
        .or_else(|| hash_hex.strip_prefix("0X"))
        .unwrap_or(hash_hex);
    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };

    let mut out = [0u8; 32];
    if let Ok(bytes) = hex::decode(padded) {
        let tail = &bytes[bytes.len().saturating_sub(32)..];
        out[32 - tail.len()..].copy_from_slice(tail);
    }
    out
}

pub struct ShareValidator {
    hasher: HasherProvider,
    share_difficulty: BigUint,
}

impl ShareValidator {
    pub fn new(hasher: HasherProvider, share_difficulty: u64) -> Self {
        Self {
            hasher,
            share_difficulty: BigUint::from(share_difficulty),
        }
    }

    pub fn hasher(&self) -> &HasherProvider {
        &self.hasher
    }

    /// Classify a submission.
    ///
    /// Fails only when no verifier exists for the configured network; that
    /// check comes before anything else, so such submissions are never even
    /// looked up.
    pub async fn validate(
        &self,
        login: &str,
        ip: &str,
        template: Option<&BlockTemplate>,
        params: &SubmitParams,
    ) -> Result<Verification> {
        let verifier = self.hasher.get()?;

        let descriptor = match template.and_then(|t| t.lookup(&params.hash_no_nonce)) {
            Some(d) => d,
            None => return Ok(Verification::Stale),
        };

        let nonce = match parse_nonce(&params.nonce) {
            Some(n) => n,
            None => {
                metrics::inc_malformed_nonces();
                tracing::warn!(
                    "Malformed nonce {:?} from {}@{}, checking as 0",
                    params.nonce,
                    login,
                    ip
                );
                0
            }
        };

        let hash_no_nonce = parse_hash(&params.hash_no_nonce);
        let mix_digest = parse_hash(&params.mix_digest);

        let share = Candidate {
            height: descriptor.height,
            hash_no_nonce,
            difficulty: self.share_difficulty.clone(),
            nonce,
            mix_digest,
        };
        let block = Candidate {
            difficulty: descriptor.difficulty.clone(),
            ..share.clone()
        };

        let checked = tokio::task::spawn_blocking(move || {
            if !verifier.verify(&share) {
                return (false, false);
            }
            (true, verifier.verify(&block))
        })
        .await;

        let (share_ok, block_ok) = match checked {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("PoW verification task failed for {}@{}: {}", login, ip, e);
                (false, false)
            }
        };

        Ok(match (share_ok, block_ok) {
            (false, _) => Verification::Invalid(descriptor),
            (true, false) => Verification::Share(descriptor),
            (true, true) => Verification::Block(descriptor),
        })
    }
}
