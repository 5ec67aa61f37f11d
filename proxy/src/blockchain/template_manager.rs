/// Block Template Manager - current work and its recent backlog
///
/// The node hands out work through `eth_getWork`. Each refresh builds a new
/// immutable `BlockTemplate` and swaps it into the `WorkCache` whole, so a
/// share handler sees either the old snapshot or the new one. Work for the
/// last few heights stays resolvable so that shares racing a new block are
/// still judged on their own work.

use chrono::Utc;
use etchash::{difficulty_for_target, PowVerifier};
use num_bigint::BigUint;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;

use super::rpc_client::{parse_hex_biguint, parse_hex_u64, NodeRpc};
use crate::error::{ProxyError, Result};
use crate::metrics::prometheus as metrics;

/// Heights behind the newest one whose work is still accepted
pub const MAX_BACKLOG: u64 = 3;

/// One unit of work a miner may be hashing on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDescriptor {
    pub height: u64,
    /// Network difficulty of the block this work belongs to
    pub difficulty: BigUint,
    /// Pow hash (header hash without nonce), as handed to miners
    pub hash_no_nonce: String,
    /// Header of the template that introduced this work, for logs
    pub header: String,
}

#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub header: String,
    pub seed: String,
    pub target: String,
    pub height: u64,
    pub difficulty: BigUint,
    pub fetched_at: i64,
    headers: HashMap<String, Arc<WorkDescriptor>>,
}

impl BlockTemplate {
    pub fn new(header: &str, seed: &str, target: &str, height: u64, difficulty: BigUint) -> Self {
        let descriptor = Arc::new(WorkDescriptor {
            height,
            difficulty: difficulty.clone(),
            hash_no_nonce: header.to_string(),
            header: header.to_string(),
        });

        let mut headers = HashMap::new();
        headers.insert(header.to_string(), descriptor);

        Self {
            header: header.to_string(),
            seed: seed.to_string(),
            target: target.to_string(),
            height,
            difficulty,
            fetched_at: Utc::now().timestamp(),
            headers,
        }
    }

    /// Build a template from an `eth_getWork` reply
    /// (`[pow_hash, seed_hash, target, ...]`) at `height`, carrying over the
    /// previous template's work that is still within the backlog.
    pub fn from_work(reply: &[String], height: u64, previous: Option<&BlockTemplate>) -> Result<Self> {
        if reply.len() < 3 {
            return Err(ProxyError::RpcFailure(format!(
                "work reply has {} fields, expected at least 3",
                reply.len()
            )));
        }

        let target = parse_hex_biguint(&reply[2])
            .ok_or_else(|| ProxyError::RpcFailure(format!("work target is not hex: {}", reply[2])))?;
        let difficulty = difficulty_for_target(&target)
            .ok_or_else(|| ProxyError::RpcFailure("work target is zero".to_string()))?;

        let mut template = Self::new(&reply[0], &reply[1], &reply[2], height, difficulty);

        if let Some(previous) = previous {
            let oldest = height.saturating_sub(MAX_BACKLOG);
            for (key, descriptor) in &previous.headers {
                if descriptor.height > oldest && !template.headers.contains_key(key) {
                    template.headers.insert(key.clone(), descriptor.clone());
                }
            }
        }

        Ok(template)
    }

    /// Add older work to this template
    pub fn insert_work(&mut self, descriptor: WorkDescriptor) {
        self.headers
            .insert(descriptor.hash_no_nonce.clone(), Arc::new(descriptor));
    }

    pub fn lookup(&self, hash_no_nonce: &str) -> Option<Arc<WorkDescriptor>> {
        self.headers.get(hash_no_nonce).cloned()
    }

    pub fn backlog_len(&self) -> usize {
        self.headers.len()
    }
}

/// Holder of the current template snapshot
#[derive(Default)]
pub struct WorkCache {
    current: RwLock<Option<Arc<BlockTemplate>>>,
}

impl WorkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<BlockTemplate>> {
        self.current.read().clone()
    }

    pub fn lookup(&self, hash_no_nonce: &str) -> Option<Arc<WorkDescriptor>> {
        self.current().and_then(|t| t.lookup(hash_no_nonce))
    }

    pub fn replace(&self, template: BlockTemplate) -> Arc<BlockTemplate> {
        let template = Arc::new(template);
        *self.current.write() = Some(template.clone());
        template
    }
}

/// Anything that can be asked to fetch fresh work. Never awaited by callers.
pub trait TemplateRefresher: Send + Sync {
    fn refresh(&self);
}

pub struct BlockTemplateManager {
    rpc_client: Arc<dyn NodeRpc>,
    cache: Arc<WorkCache>,
    verifier: Option<Arc<dyn PowVerifier>>,
    update_interval: Duration,
    update_lock: Arc<Mutex<()>>,
}

impl BlockTemplateManager {
    pub fn new(
        rpc_client: Arc<dyn NodeRpc>,
        cache: Arc<WorkCache>,
        verifier: Option<Arc<dyn PowVerifier>>,
        update_interval: Duration,
    ) -> Self {
        tracing::info!(
            "BlockTemplateManager: interval={}ms, backlog={}",
            update_interval.as_millis(),
            MAX_BACKLOG
        );

        Self {
            rpc_client,
            cache,
            verifier,
            update_interval,
            update_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn cache(&self) -> Arc<WorkCache> {
        self.cache.clone()
    }

    /// Start template update loop
    pub fn start(&self) -> JoinHandle<()> {
        let rpc_client = self.rpc_client.clone();
        let cache = self.cache.clone();
        let verifier = self.verifier.clone();
        let update_lock = self.update_lock.clone();
        let update_interval = self.update_interval;

        tokio::spawn(async move {
            let mut interval = time::interval(update_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if let Err(e) = Self::update(&rpc_client, &cache, verifier.as_ref(), &update_lock).await {
                    metrics::inc_template_fetch_errors();
                    tracing::error!("Failed to fetch block template: {}", e);
                }
            }
        })
    }

    /// Fetch work now. Returns the new template, or `None` when the node is
    /// still on the same work.
    pub async fn force_update(&self) -> Result<Option<Arc<BlockTemplate>>> {
        Self::update(&self.rpc_client, &self.cache, self.verifier.as_ref(), &self.update_lock).await
    }

    async fn update(
        rpc_client: &Arc<dyn NodeRpc>,
        cache: &WorkCache,
        verifier: Option<&Arc<dyn PowVerifier>>,
        update_lock: &Mutex<()>,
    ) -> Result<Option<Arc<BlockTemplate>>> {
        let _guard = update_lock.lock().await;

        let current = cache.current();
        let reply = rpc_client.get_work().await?;

        // Same pow hash: the node has nothing new
        if current.as_ref().zip(reply.first()).map(|(t, h)| &t.header == h).unwrap_or(false) {
            return Ok(None);
        }

        let height = match reply.get(3).and_then(|h| parse_hex_u64(h)) {
            Some(h) => h,
            None => rpc_client.get_pending_block().await?.number,
        };

        let template = BlockTemplate::from_work(&reply, height, current.as_deref())?;
        let height_changed = current.as_ref().map(|t| t.height != height).unwrap_or(true);

        tracing::info!(
            "📋 New block to mine at height {} / {} / {}",
            height,
            short_hash(&template.header),
            template.difficulty
        );
        metrics::set_template_height(height);
        metrics::set_template_backlog(template.backlog_len());
        metrics::inc_template_updates();

        let template = cache.replace(template);

        if height_changed {
            if let Some(verifier) = verifier {
                let verifier = verifier.clone();
                tokio::task::spawn_blocking(move || verifier.prepare(height));
            }
        }

        Ok(Some(template))
    }
}

impl TemplateRefresher for BlockTemplateManager {
    fn refresh(&self) {
        let rpc_client = self.rpc_client.clone();
        let cache = self.cache.clone();
        let verifier = self.verifier.clone();
        let update_lock = self.update_lock.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = Self::update(&rpc_client, &cache, verifier.as_ref(), &update_lock).await {
                        metrics::inc_template_fetch_errors();
                        tracing::error!("Template refresh after block failed: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("Template refresh requested outside a runtime"),
        }
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..10).unwrap_or(hash)
}
