/// Network selection and the process-wide proof-of-work verifier.
///
/// The verifier is built once at startup from the configured network name.
/// An unknown name is not fatal: the provider keeps the error and every share
/// is turned away without verification.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use etchash::{Etchash, PowVerifier};

use crate::error::{ProxyError, Result};

/// ECIP-1099 activation on Ethereum Classic mainnet
pub const ECIP1099_BLOCK_CLASSIC: u64 = 11_700_000;

/// ECIP-1099 activation on the Mordor testnet
pub const ECIP1099_BLOCK_MORDOR: u64 = 2_520_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Classic,
    Mordor,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Classic => "classic",
            Network::Mordor => "mordor",
        }
    }

    /// Height at which epochs grow to 60,000 blocks.
    pub fn ecip1099_block(&self) -> u64 {
        match self {
            Network::Classic => ECIP1099_BLOCK_CLASSIC,
            Network::Mordor => ECIP1099_BLOCK_MORDOR,
        }
    }
}

impl FromStr for Network {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "classic" => Ok(Network::Classic),
            "mordor" => Ok(Network::Mordor),
            _ => Err(ProxyError::UnknownNetwork(s.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Owns the verifier for the configured network, or the reason there is none.
#[derive(Clone)]
pub struct HasherProvider {
    network: String,
    verifier: Option<Arc<dyn PowVerifier>>,
}

impl HasherProvider {
    pub fn new(network: &str) -> Self {
        match network.parse::<Network>() {
            Ok(net) => {
                tracing::info!(
                    "🔨 Etchash verifier for {} (ECIP-1099 at block {})",
                    net,
                    net.ecip1099_block()
                );
                Self::with_verifier(network, Arc::new(Etchash::new(Some(net.ecip1099_block()))))
            }
            Err(e) => {
                tracing::error!("❌ {} - every share will be rejected", e);
                Self {
                    network: network.to_string(),
                    verifier: None,
                }
            }
        }
    }

    /// Provider around an already built verifier.
    pub fn with_verifier(network: &str, verifier: Arc<dyn PowVerifier>) -> Self {
        Self {
            network: network.to_string(),
            verifier: Some(verifier),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn is_available(&self) -> bool {
        self.verifier.is_some()
    }

    pub fn get(&self) -> Result<Arc<dyn PowVerifier>> {
        self.verifier
            .clone()
            .ok_or_else(|| ProxyError::UnknownNetwork(self.network.clone()))
    }
}
