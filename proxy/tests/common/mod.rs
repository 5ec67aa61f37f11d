//! In-memory collaborators shared by the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use etchash::{Candidate, PowVerifier};
use num_bigint::BigUint;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use etc_proxy::blockchain::{NodeRpc, PendingBlock, TemplateRefresher};
use etc_proxy::error::{ProxyError, Result};
use etc_proxy::shares::{ShareBackend, SubmitParams};

/// Ordered log of side effects across all collaborators
pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Passes a candidate iff its difficulty is at most `max_difficulty`,
/// i.e. a proof whose hash sits exactly at `2^256 / max_difficulty`.
pub struct ThresholdVerifier {
    pub max_difficulty: BigUint,
    pub seen: Mutex<Vec<BigUint>>,
    pub prepared: Mutex<Vec<u64>>,
}

impl ThresholdVerifier {
    pub fn new(max_difficulty: u64) -> Arc<Self> {
        Arc::new(Self {
            max_difficulty: BigUint::from(max_difficulty),
            seen: Mutex::new(Vec::new()),
            prepared: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<BigUint> {
        self.seen.lock().clone()
    }
}

impl PowVerifier for ThresholdVerifier {
    fn verify(&self, candidate: &Candidate) -> bool {
        self.seen.lock().push(candidate.difficulty.clone());
        candidate.difficulty <= self.max_difficulty
    }

    fn prepare(&self, height: u64) {
        self.prepared.lock().push(height);
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Stale { login: String, nonce: String },
    Invalid { login: String, nonce: String },
    Share { login: String, worker: String, difficulty: u64, height: u64, hostname: String },
    Block { login: String, worker: String, network_difficulty: BigUint, height: u64 },
}

/// Duplicate detection keyed on (height, nonce:hash:mix) like the Redis pow set
pub struct MemoryBackend {
    pub calls: Mutex<Vec<BackendCall>>,
    pow: Mutex<HashSet<(u64, String)>>,
    blocks: Mutex<HashSet<(u64, String)>>,
    pub fail_blocks: AtomicBool,
    pub fail_shares: AtomicBool,
    events: Events,
}

impl MemoryBackend {
    pub fn new(events: Events) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            pow: Mutex::new(HashSet::new()),
            blocks: Mutex::new(HashSet::new()),
            fail_blocks: AtomicBool::new(false),
            fail_shares: AtomicBool::new(false),
            events,
        })
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn seen_before(&self, height: u64, params: &SubmitParams) -> bool {
        !self.pow.lock().insert((height, params.pow_key()))
    }
}

#[async_trait]
impl ShareBackend for MemoryBackend {
    async fn record_stale(&self, login: &str, nonce_hex: &str) -> Result<()> {
        self.events.lock().push("record_stale".to_string());
        self.calls.lock().push(BackendCall::Stale {
            login: login.to_string(),
            nonce: nonce_hex.to_string(),
        });
        Ok(())
    }

    async fn record_invalid(&self, login: &str, nonce_hex: &str) -> Result<()> {
        self.events.lock().push("record_invalid".to_string());
        self.calls.lock().push(BackendCall::Invalid {
            login: login.to_string(),
            nonce: nonce_hex.to_string(),
        });
        Ok(())
    }

    async fn record_share(
        &self,
        login: &str,
        worker: &str,
        params: &SubmitParams,
        share_difficulty: u64,
        height: u64,
        _hashrate_expiration: Duration,
        hostname: &str,
    ) -> Result<bool> {
        self.events.lock().push("record_share".to_string());
        self.calls.lock().push(BackendCall::Share {
            login: login.to_string(),
            worker: worker.to_string(),
            difficulty: share_difficulty,
            height,
            hostname: hostname.to_string(),
        });
        if self.fail_shares.load(Ordering::SeqCst) {
            return Err(ProxyError::BackendWrite("share write failed".to_string()));
        }
        Ok(self.seen_before(height, params))
    }

    async fn record_block(
        &self,
        login: &str,
        worker: &str,
        params: &SubmitParams,
        _share_difficulty: u64,
        network_difficulty: &BigUint,
        height: u64,
        _hashrate_expiration: Duration,
        _hostname: &str,
    ) -> Result<bool> {
        self.events.lock().push("record_block".to_string());
        self.calls.lock().push(BackendCall::Block {
            login: login.to_string(),
            worker: worker.to_string(),
            network_difficulty: network_difficulty.clone(),
            height,
        });
        if self.fail_blocks.load(Ordering::SeqCst) {
            return Err(ProxyError::BackendWrite("block write failed".to_string()));
        }
        let existed = self.seen_before(height, params);
        if !existed {
            self.blocks.lock().insert((height, params.pow_key()));
        }
        Ok(existed)
    }

    async fn block_recorded(&self, height: u64, params: &SubmitParams) -> Result<bool> {
        Ok(self.blocks.lock().contains(&(height, params.pow_key())))
    }
}

// ---------------------------------------------------------------------------
// Node RPC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitBehavior {
    Accept,
    Reject,
    Fail,
}

pub struct MockRpc {
    pub work: Mutex<Vec<String>>,
    pub pending: Mutex<Option<PendingBlock>>,
    pub submit: Mutex<SubmitBehavior>,
    pub submitted: Mutex<Vec<SubmitParams>>,
    pub get_work_calls: AtomicUsize,
    pub pending_calls: AtomicUsize,
    events: Events,
}

impl MockRpc {
    pub fn new(events: Events, submit: SubmitBehavior) -> Arc<Self> {
        Arc::new(Self {
            work: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            submit: Mutex::new(submit),
            submitted: Mutex::new(Vec::new()),
            get_work_calls: AtomicUsize::new(0),
            pending_calls: AtomicUsize::new(0),
            events,
        })
    }

    pub fn set_work(&self, reply: &[&str]) {
        *self.work.lock() = reply.iter().map(|s| s.to_string()).collect();
    }

    pub fn submitted(&self) -> Vec<SubmitParams> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl NodeRpc for MockRpc {
    async fn get_work(&self) -> Result<Vec<String>> {
        self.get_work_calls.fetch_add(1, Ordering::SeqCst);
        let work = self.work.lock().clone();
        if work.is_empty() {
            return Err(ProxyError::RpcFailure("no work".to_string()));
        }
        Ok(work)
    }

    async fn get_pending_block(&self) -> Result<PendingBlock> {
        self.pending_calls.fetch_add(1, Ordering::SeqCst);
        self.pending
            .lock()
            .clone()
            .ok_or_else(|| ProxyError::RpcFailure("no pending block".to_string()))
    }

    async fn submit_block(&self, params: &SubmitParams) -> Result<bool> {
        self.events.lock().push("submit_block".to_string());
        self.submitted.lock().push(params.clone());
        match *self.submit.lock() {
            SubmitBehavior::Accept => Ok(true),
            SubmitBehavior::Reject => Ok(false),
            SubmitBehavior::Fail => Err(ProxyError::RpcFailure("connection refused".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Template refresh
// ---------------------------------------------------------------------------

pub struct RefreshCounter {
    pub count: AtomicUsize,
    events: Events,
}

impl RefreshCounter {
    pub fn new(events: Events) -> Arc<Self> {
        Arc::new(Self { count: AtomicUsize::new(0), events })
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl TemplateRefresher for RefreshCounter {
    fn refresh(&self) {
        self.events.lock().push("refresh".to_string());
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
