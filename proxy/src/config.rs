use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ProxyError, Result};

const DEFAULT_CONFIG_FILE: &str = "proxy_config.json";

const DEFAULT_SHARE_DIFFICULTY: u64 = 2_000_000_000;
const DEFAULT_HASHRATE_EXPIRATION_SECS: u64 = 3 * 3600;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BLOCK_REFRESH_MS: u64 = 120;

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Chain the proxy mines on: "classic" or "mordor"
    pub network: String,
    /// Pool share difficulty every miner works at
    pub share_difficulty: u64,
    /// How long per-miner hashrate samples are kept
    pub hashrate_expiration_secs: u64,
    /// Label of this proxy instance, stored with each miner's shares
    pub stratum_hostname: String,
    pub node_rpc_url: String,
    pub rpc_timeout_secs: u64,
    pub redis_url: String,
    pub redis_prefix: String,
    pub block_refresh_ms: u64,
    pub metrics_listen: String,
    /// Append-only journal of block records awaiting reconciliation
    pub block_journal_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: "classic".to_string(),
            share_difficulty: DEFAULT_SHARE_DIFFICULTY,
            hashrate_expiration_secs: DEFAULT_HASHRATE_EXPIRATION_SECS,
            stratum_hostname: "localhost".to_string(),
            node_rpc_url: "http://127.0.0.1:8545".to_string(),
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            redis_url: "redis://127.0.0.1/".to_string(),
            redis_prefix: "etc".to_string(),
            block_refresh_ms: DEFAULT_BLOCK_REFRESH_MS,
            metrics_listen: "0.0.0.0:9100".to_string(),
            block_journal_path: None,
        }
    }
}

impl Config {
    /// Defaults, then `ETC_PROXY_*` environment, then the JSON config file.
    pub fn load() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|key| std::env::var(key).ok());

        let path = std::env::var("ETC_PROXY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        if let Ok(txt) = std::fs::read_to_string(&path) {
            match cfg.apply_file(&txt) {
                Ok(()) => tracing::info!("✅ Loaded proxy config from {}", path),
                Err(e) => tracing::warn!("⚠️ Failed to parse proxy config {}: {}", path, e),
            }
        }

        cfg.apply_fallbacks();
        cfg
    }

    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(n) = var("ETC_PROXY_NETWORK") { self.network = n; }
        if let Some(d) = var("ETC_PROXY_SHARE_DIFFICULTY") {
            self.share_difficulty = d.parse().unwrap_or(DEFAULT_SHARE_DIFFICULTY);
        }
        if let Some(h) = var("ETC_PROXY_HASHRATE_EXPIRATION") {
            self.hashrate_expiration_secs = h.parse().unwrap_or(DEFAULT_HASHRATE_EXPIRATION_SECS);
        }
        if let Some(h) = var("ETC_PROXY_STRATUM_HOSTNAME") { self.stratum_hostname = h; }
        if let Some(u) = var("ETC_PROXY_NODE_RPC") { self.node_rpc_url = u; }
        if let Some(t) = var("ETC_PROXY_RPC_TIMEOUT") {
            self.rpc_timeout_secs = t.parse().unwrap_or(DEFAULT_RPC_TIMEOUT_SECS);
        }
        if let Some(r) = var("ETC_PROXY_REDIS_URL") {
            self.redis_url = r;
        } else if let Some(r) = var("REDIS_URL") {
            // legacy
            self.redis_url = r;
        }
        if let Some(p) = var("ETC_PROXY_REDIS_PREFIX") { self.redis_prefix = p; }
        if let Some(b) = var("ETC_PROXY_BLOCK_REFRESH_MS") {
            self.block_refresh_ms = b.parse().unwrap_or(DEFAULT_BLOCK_REFRESH_MS);
        }
        if let Some(m) = var("ETC_PROXY_METRICS") { self.metrics_listen = m; }
        if let Some(j) = var("ETC_PROXY_BLOCK_JOURNAL") { self.block_journal_path = Some(PathBuf::from(j)); }
    }

    /// Replace the configuration with the file contents. Fields missing from
    /// the file take their defaults.
    pub fn apply_file(&mut self, txt: &str) -> Result<()> {
        *self = serde_json::from_str::<Config>(txt)?;
        Ok(())
    }

    pub fn apply_fallbacks(&mut self) {
        if self.share_difficulty == 0 {
            self.share_difficulty = DEFAULT_SHARE_DIFFICULTY;
        }
        if self.hashrate_expiration_secs == 0 {
            self.hashrate_expiration_secs = DEFAULT_HASHRATE_EXPIRATION_SECS;
        }
        if self.rpc_timeout_secs == 0 {
            self.rpc_timeout_secs = DEFAULT_RPC_TIMEOUT_SECS;
        }
        if self.block_refresh_ms == 0 {
            self.block_refresh_ms = DEFAULT_BLOCK_REFRESH_MS;
        }
        if self.redis_prefix.is_empty() {
            self.redis_prefix = "etc".to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_rpc_url.is_empty() {
            return Err(ProxyError::Configuration("node_rpc_url is empty".to_string()));
        }
        if self.redis_url.is_empty() {
            return Err(ProxyError::Configuration("redis_url is empty".to_string()));
        }
        Ok(())
    }

    pub fn hashrate_expiration(&self) -> Duration {
        Duration::from_secs(self.hashrate_expiration_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn block_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.block_refresh_ms)
    }
}
