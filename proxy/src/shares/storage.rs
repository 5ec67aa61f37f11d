/// Redis share backend
///
/// Key layout (all under the configured prefix):
/// - `pow`                        zset, height -> `nonce:hash:mix`, duplicate guard
/// - `shares:roundCurrent`        hash, login -> accumulated share difficulty
/// - `shares:round<height>:<nonce>` the round closed by a block
/// - `hashrate`, `hashrate:<login>` zsets of share samples scored by time
/// - `miners:<login>`             hash, per miner counters and last share
/// - `blocks:candidates`          zset, height -> block record
/// - `stats`                      hash, pool-wide counters
///
/// Uses redis::aio::ConnectionManager for async operations

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use num_bigint::BigUint;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::validator::SubmitParams;
use crate::error::{ProxyError, Result};

/// Pow entries are kept this many heights back
const POW_BACKLOG: u64 = 8;

/// Persistence the share pipeline writes to.
///
/// `record_share` and `record_block` report `true` when the same proof of
/// work was already recorded, in which case nothing is credited again.
#[async_trait]
pub trait ShareBackend: Send + Sync {
    async fn record_stale(&self, login: &str, nonce_hex: &str) -> Result<()>;

    async fn record_invalid(&self, login: &str, nonce_hex: &str) -> Result<()>;

    async fn record_share(
        &self,
        login: &str,
        worker: &str,
        params: &SubmitParams,
        share_difficulty: u64,
        height: u64,
        hashrate_expiration: Duration,
        hostname: &str,
    ) -> Result<bool>;

    async fn record_block(
        &self,
        login: &str,
        worker: &str,
        params: &SubmitParams,
        share_difficulty: u64,
        network_difficulty: &BigUint,
        height: u64,
        hashrate_expiration: Duration,
        hostname: &str,
    ) -> Result<bool>;

    /// Whether the block candidate for this proof of work is stored.
    async fn block_recorded(&self, height: u64, params: &SubmitParams) -> Result<bool>;
}

/// Atomic block write. The pow guard runs inside the script, so a proof of
/// work is only ever registered together with its block candidate.
///
/// KEYS: pow, roundCurrent, round<height>:<nonce>, hashrate, hashrate:<login>,
///       miners:<login>, stats, finders, blocks:candidates
/// ARGV: pow key, height, pow cutoff, login, share difficulty, hashrate
///       member, miner hashrate member, ts, hashrate expiration, hostname,
///       network difficulty
///
/// Returns -1 when the proof of work was already registered, otherwise the
/// total share difficulty of the closed round.
const RECORD_BLOCK_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[3])
if redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1]) == 0 then
  return -1
end
redis.call('HINCRBY', KEYS[2], ARGV[4], ARGV[5])
redis.call('ZADD', KEYS[4], ARGV[8], ARGV[6])
redis.call('ZADD', KEYS[5], ARGV[8], ARGV[7])
redis.call('EXPIRE', KEYS[5], ARGV[9])
redis.call('HSET', KEYS[6], 'lastShare', ARGV[8])
redis.call('HSET', KEYS[6], 'hostname', ARGV[10])
redis.call('HSET', KEYS[7], 'lastBlockFound', ARGV[8])
redis.call('HDEL', KEYS[7], 'roundShares')
redis.call('ZINCRBY', KEYS[8], 1, ARGV[4])
redis.call('HINCRBY', KEYS[6], 'blocksFound', 1)
redis.call('RENAME', KEYS[2], KEYS[3])
local total = 0
local round = redis.call('HGETALL', KEYS[3])
for i = 2, #round, 2 do
  total = total + tonumber(round[i])
end
local candidate = ARGV[1] .. ':' .. ARGV[8] .. ':' .. ARGV[11] .. ':' .. string.format('%.0f', total)
redis.call('ZADD', KEYS[9], ARGV[2], candidate)
return total
"#;

/// One accepted share as it lands in the hashrate and miner keys
struct ShareSample<'a> {
    login: &'a str,
    worker: &'a str,
    difficulty: u64,
    hashrate_expiration: Duration,
    hostname: &'a str,
    ms: i64,
    ts: i64,
}

impl<'a> ShareSample<'a> {
    fn now(
        login: &'a str,
        worker: &'a str,
        difficulty: u64,
        hashrate_expiration: Duration,
        hostname: &'a str,
    ) -> Self {
        let now = Utc::now();
        Self {
            login,
            worker,
            difficulty,
            hashrate_expiration,
            hostname,
            ms: now.timestamp_millis(),
            ts: now.timestamp(),
        }
    }

    fn hashrate_member(&self) -> String {
        format!("{}:{}:{}:{}", self.difficulty, self.login, self.worker, self.ms)
    }

    fn miner_hashrate_member(&self) -> String {
        format!("{}:{}:{}", self.difficulty, self.worker, self.ms)
    }
}

pub struct RedisBackend {
    client: redis::Client,
    connection: Arc<RwLock<Option<redis::aio::ConnectionManager>>>,
    prefix: String,
    block_script: redis::Script,
}

impl RedisBackend {
    pub fn new(redis_url: &str, prefix: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| anyhow!("Failed to create Redis client: {}", e))?;

        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            prefix: prefix.to_string(),
            block_script: redis::Script::new(RECORD_BLOCK_SCRIPT),
        })
    }

    /// Get async connection (lazy initialization)
    async fn get_connection(&self) -> Result<redis::aio::ConnectionManager> {
        let mut conn_guard = self.connection.write().await;

        if let Some(conn) = conn_guard.as_ref() {
            return Ok(conn.clone());
        }

        let manager = self.client.get_connection_manager().await?;
        *conn_guard = Some(manager.clone());
        Ok(manager)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    fn key(&self, parts: &[&str]) -> String {
        format_key(&self.prefix, parts)
    }

    /// Register a proof of work at `height`; `true` if it was already there.
    async fn check_pow_exists(
        &self,
        conn: &mut redis::aio::ConnectionManager,
        height: u64,
        params: &SubmitParams,
    ) -> Result<bool> {
        let pow_key = self.key(&["pow"]);

        redis::cmd("ZREMRANGEBYSCORE")
            .arg(&pow_key)
            .arg("-inf")
            .arg(pow_cutoff(height))
            .query_async::<_, ()>(conn)
            .await?;

        let added: i64 = conn.zadd(&pow_key, params.pow_key(), height).await?;
        Ok(added == 0)
    }

    fn share_pipeline(&self, share: &ShareSample) -> redis::Pipeline {
        let miner_hashrate = self.key(&["hashrate", share.login]);
        let miner = self.key(&["miners", share.login]);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hincr(self.key(&["shares", "roundCurrent"]), share.login, share.difficulty)
            .ignore()
            .zadd(self.key(&["hashrate"]), share.hashrate_member(), share.ts)
            .ignore()
            .zadd(&miner_hashrate, share.miner_hashrate_member(), share.ts)
            .ignore()
            .cmd("EXPIRE")
            .arg(&miner_hashrate)
            .arg(share.hashrate_expiration.as_secs())
            .ignore()
            .hset(&miner, "lastShare", share.ts)
            .ignore()
            .hset(&miner, "hostname", share.hostname)
            .ignore()
            .hincr(self.key(&["stats"]), "roundShares", share.difficulty)
            .ignore();
        pipe
    }

    /// `(keys, args)` for `RECORD_BLOCK_SCRIPT`
    fn block_script_input(
        &self,
        share: &ShareSample,
        params: &SubmitParams,
        network_difficulty: &BigUint,
        height: u64,
    ) -> (Vec<String>, Vec<String>) {
        let keys = vec![
            self.key(&["pow"]),
            self.key(&["shares", "roundCurrent"]),
            self.key(&["shares", &format!("round{}", height), &params.nonce]),
            self.key(&["hashrate"]),
            self.key(&["hashrate", share.login]),
            self.key(&["miners", share.login]),
            self.key(&["stats"]),
            self.key(&["finders"]),
            self.key(&["blocks", "candidates"]),
        ];
        let args = vec![
            params.pow_key(),
            height.to_string(),
            pow_cutoff(height),
            share.login.to_string(),
            share.difficulty.to_string(),
            share.hashrate_member(),
            share.miner_hashrate_member(),
            share.ts.to_string(),
            share.hashrate_expiration.as_secs().to_string(),
            share.hostname.to_string(),
            network_difficulty.to_string(),
        ];
        (keys, args)
    }

    fn rejected_pipeline(&self, login: &str, field: &str, ts: i64) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hincr(self.key(&["miners", login]), field, 1)
            .ignore()
            .hset(self.key(&["miners", login]), format!("last{}", capitalize(field)), ts)
            .ignore()
            .hincr(self.key(&["stats"]), field, 1)
            .ignore();
        pipe
    }

    async fn count_rejected(&self, login: &str, field: &str, nonce_hex: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        self.rejected_pipeline(login, field, Utc::now().timestamp())
            .query_async::<_, ()>(&mut conn)
            .await?;

        tracing::debug!("Recorded {} for {} (nonce {})", field, login, nonce_hex);
        Ok(())
    }
}

#[async_trait]
impl ShareBackend for RedisBackend {
    async fn record_stale(&self, login: &str, nonce_hex: &str) -> Result<()> {
        self.count_rejected(login, "staleShares", nonce_hex).await
    }

    async fn record_invalid(&self, login: &str, nonce_hex: &str) -> Result<()> {
        self.count_rejected(login, "invalidShares", nonce_hex).await
    }

    async fn record_share(
        &self,
        login: &str,
        worker: &str,
        params: &SubmitParams,
        share_difficulty: u64,
        height: u64,
        hashrate_expiration: Duration,
        hostname: &str,
    ) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        if self.check_pow_exists(&mut conn, height, params).await? {
            return Ok(true);
        }

        let share = ShareSample::now(login, worker, share_difficulty, hashrate_expiration, hostname);
        self.share_pipeline(&share).query_async::<_, ()>(&mut conn).await?;

        Ok(false)
    }

    async fn record_block(
        &self,
        login: &str,
        worker: &str,
        params: &SubmitParams,
        share_difficulty: u64,
        network_difficulty: &BigUint,
        height: u64,
        hashrate_expiration: Duration,
        hostname: &str,
    ) -> Result<bool> {
        let mut conn = self.get_connection().await?;

        let share = ShareSample::now(login, worker, share_difficulty, hashrate_expiration, hostname);
        let (keys, args) = self.block_script_input(&share, params, network_difficulty, height);

        let mut invocation = self.block_script.prepare_invoke();
        for key in &keys {
            invocation.key(key);
        }
        for arg in &args {
            invocation.arg(arg);
        }

        let total_shares: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ProxyError::BackendWrite(format!("block candidate at {}: {}", height, e)))?;

        if total_shares < 0 {
            return Ok(true);
        }
        tracing::debug!("Block {} closed a round of {} shares", height, total_shares);
        Ok(false)
    }

    async fn block_recorded(&self, height: u64, params: &SubmitParams) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let members: Vec<String> = conn
            .zrangebyscore(self.key(&["blocks", "candidates"]), height, height)
            .await?;
        Ok(has_candidate(&members, params))
    }
}

/// Pow entries strictly below this score are trimmed
fn pow_cutoff(height: u64) -> String {
    // Three templates of backlog in memory, keep a little more here
    format!("({}", height.saturating_sub(POW_BACKLOG))
}

/// Whether one of the `blocks:candidates` members at a height is this proof
/// of work (`nonce:hash:mix:ts:difficulty:shares`)
pub fn has_candidate(members: &[String], params: &SubmitParams) -> bool {
    let prefix = format!("{}:", params.pow_key());
    members.iter().any(|m| m.starts_with(&prefix))
}

pub fn format_key(prefix: &str, parts: &[&str]) -> String {
    let mut key = prefix.to_string();
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
