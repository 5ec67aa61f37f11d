/// Block record reconciliation
///
/// Once the node has accepted a block, that acceptance is what counts; the
/// Redis record is only a mirror of it. When writing the record fails, the
/// record is handed to `BlockReconciler`, journaled to disk and retried with
/// exponential backoff in the background. Records still pending in the
/// journal at startup are retried again.

use chrono::Utc;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::storage::ShareBackend;
use super::validator::SubmitParams;
use crate::error::ProxyError;
use crate::metrics::prometheus as metrics;

/// Everything needed to repeat a `record_block` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub login: String,
    pub worker: String,
    pub params: SubmitParams,
    pub share_difficulty: u64,
    #[serde(with = "decimal")]
    pub network_difficulty: BigUint,
    pub height: u64,
    pub hashrate_expiration_secs: u64,
    pub hostname: String,
    pub found_at: i64,
}

impl BlockRecord {
    pub fn hashrate_expiration(&self) -> Duration {
        Duration::from_secs(self.hashrate_expiration_secs)
    }

    fn journal_key(&self) -> String {
        format!("{}:{}", self.height, self.params.pow_key())
    }
}

/// Big integers as decimal strings in the journal
mod decimal {
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigUint::parse_bytes(s.as_bytes(), 10).ok_or_else(|| D::Error::custom("invalid decimal"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalStatus {
    Pending,
    Recovered,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    status: JournalStatus,
    ts: i64,
    record: BlockRecord,
}

/// Append-only JSON-lines file of block records and what became of them
pub struct BlockJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl BlockJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, status: JournalStatus, record: &BlockRecord) -> anyhow::Result<()> {
        let entry = JournalEntry {
            status,
            ts: Utc::now().timestamp(),
            record: record.clone(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Records whose latest entry is still `pending`, oldest first.
    /// Unreadable lines are skipped.
    pub async fn pending(&self) -> anyhow::Result<Vec<BlockRecord>> {
        let txt = match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, JournalEntry> = HashMap::new();
        for line in txt.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => {
                    let key = entry.record.journal_key();
                    if !latest.contains_key(&key) {
                        order.push(key.clone());
                    }
                    latest.insert(key, entry);
                }
                Err(e) => tracing::warn!("Skipping unreadable journal line in {}: {}", self.path.display(), e),
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|key| latest.remove(&key))
            .filter(|entry| entry.status == JournalStatus::Pending)
            .map(|entry| entry.record)
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Handle used by the share pipeline to hand over failed block records
#[derive(Clone)]
pub struct BlockReconciler {
    tx: mpsc::UnboundedSender<BlockRecord>,
}

impl BlockReconciler {
    /// Start the background reconciliation task.
    pub fn spawn(
        backend: Arc<dyn ShareBackend>,
        journal: Option<BlockJournal>,
        policy: RetryPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (reconciler, rx) = Self::channel();
        let handle = tokio::spawn(run(rx, backend, journal.map(Arc::new), policy));
        (reconciler, handle)
    }

    /// A reconciler whose records go to the returned receiver instead of a
    /// background task.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BlockRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, record: BlockRecord) {
        tracing::warn!(
            "🧾 Block {} by {} queued for reconciliation",
            record.height,
            record.login
        );
        if let Err(e) = self.tx.send(record) {
            tracing::error!(
                "❌ Reconciliation queue closed, block record lost: height={} login={}",
                e.0.height,
                e.0.login
            );
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<BlockRecord>,
    backend: Arc<dyn ShareBackend>,
    journal: Option<Arc<BlockJournal>>,
    policy: RetryPolicy,
) {
    if let Some(journal) = &journal {
        match journal.pending().await {
            Ok(records) => {
                if !records.is_empty() {
                    tracing::info!(
                        "🧾 Resuming {} pending block records from {}",
                        records.len(),
                        journal.path().display()
                    );
                }
                for record in records {
                    metrics::inc_reconcile_pending();
                    tokio::spawn(retry(backend.clone(), Some(journal.clone()), record, policy));
                }
            }
            Err(e) => tracing::error!("Failed to read block journal {}: {}", journal.path().display(), e),
        }
    }

    while let Some(record) = rx.recv().await {
        if let Some(journal) = &journal {
            if let Err(e) = journal.append(JournalStatus::Pending, &record).await {
                tracing::error!("Failed to journal block {}: {}", record.height, e);
            }
        }
        metrics::inc_reconcile_pending();
        tokio::spawn(retry(backend.clone(), journal.clone(), record, policy));
    }
}

/// Retry one record until it is written or the attempts run out.
/// Returns whether the record made it.
pub async fn retry(
    backend: Arc<dyn ShareBackend>,
    journal: Option<Arc<BlockJournal>>,
    record: BlockRecord,
    policy: RetryPolicy,
) -> bool {
    for attempt in 0..policy.max_attempts {
        tokio::time::sleep(policy.delay(attempt)).await;
        metrics::inc_reconcile_retries();

        let res = backend
            .record_block(
                &record.login,
                &record.worker,
                &record.params,
                record.share_difficulty,
                &record.network_difficulty,
                record.height,
                record.hashrate_expiration(),
                &record.hostname,
            )
            .await;

        // A registered proof of work only counts once its candidate is there
        let written = match res {
            Ok(true) => match backend.block_recorded(record.height, &record.params).await {
                Ok(true) => Ok(true),
                Ok(false) => Err(ProxyError::BackendWrite(
                    "proof of work registered without a block candidate".to_string(),
                )),
                Err(e) => Err(e),
            },
            other => other,
        };

        match written {
            Ok(existed) => {
                tracing::info!(
                    "✅ Block {} by {} reconciled on attempt {} (existed={})",
                    record.height,
                    record.login,
                    attempt + 1,
                    existed
                );
                finish(&journal, JournalStatus::Recovered, &record).await;
                metrics::inc_reconcile_recovered();
                metrics::dec_reconcile_pending();
                return true;
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️  Block {} record attempt {}/{} failed: {}",
                    record.height,
                    attempt + 1,
                    policy.max_attempts,
                    e
                );
            }
        }
    }

    tracing::error!(
        "❌ Block {} by {} NOT recorded after {} attempts",
        record.height,
        record.login,
        policy.max_attempts
    );
    finish(&journal, JournalStatus::Abandoned, &record).await;
    metrics::inc_reconcile_abandoned();
    metrics::dec_reconcile_pending();
    false
}

async fn finish(journal: &Option<Arc<BlockJournal>>, status: JournalStatus, record: &BlockRecord) {
    if let Some(journal) = journal {
        if let Err(e) = journal.append(status, record).await {
            tracing::error!("Failed to journal block {}: {}", record.height, e);
        }
    }
}
