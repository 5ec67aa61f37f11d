/// Share Pipeline Integration Tests
///
/// Drives `ShareProcessor` end to end against in-memory collaborators and
/// validates:
/// 1. Classification: stale, invalid, share, block
/// 2. Backend side effects and duplicate handling
/// 3. Block submission gate: submit first, record only when accepted
/// 4. Reconciliation hand-off when the block write fails
/// 5. Unknown networks never reach verification
/// 6. Work backlog across template swaps

mod common;

use common::{
    events, BackendCall, MemoryBackend, MockRpc, RefreshCounter, SubmitBehavior, ThresholdVerifier,
};
use num_bigint::BigUint;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use etc_proxy::blockchain::{BlockTemplate, WorkCache};
use etc_proxy::hasher::HasherProvider;
use etc_proxy::shares::reconcile::retry;
use etc_proxy::shares::{
    BlockReconciler, BlockRecord, Outcome, ProcessorSettings, RetryPolicy, ShareBackend,
    ShareProcessor, ShareVerdict, SubmitParams,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SHARE_DIFFICULTY: u64 = 1_000;
const NETWORK_DIFFICULTY: u64 = 1_000_000;
const HEIGHT: u64 = 11_000_000;
const HEADER: &str = "0x5d3ab6f1e2c1b2a3f4e5d6c7b8a9f0e1d2c3b4a5968778695a4b3c2d1e0f1a2b";
const SEED: &str = "0xee5ec0c5a4e7b3f0a51c0cd2e7a4b3e5fd3c1a0b9c8d7e6f5a4b3c2d1e0f9a8b";
const MIX: &str = "0x1c2d3e4f5a6b7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2d";

/// Verifier thresholds: what the submitted proof is "worth"
const WORTH_NOTHING: u64 = SHARE_DIFFICULTY - 1;
const WORTH_A_SHARE: u64 = SHARE_DIFFICULTY * 10;
const WORTH_A_BLOCK: u64 = NETWORK_DIFFICULTY;

struct Harness {
    processor: ShareProcessor,
    backend: Arc<MemoryBackend>,
    rpc: Arc<MockRpc>,
    refresher: Arc<RefreshCounter>,
    verifier: Arc<ThresholdVerifier>,
    work: Arc<WorkCache>,
    reconciled: mpsc::UnboundedReceiver<BlockRecord>,
    events: common::Events,
}

impl Harness {
    fn new(network: &str, worth: u64, submit: SubmitBehavior) -> Self {
        let verifier = ThresholdVerifier::new(worth);
        let hasher = match network {
            "classic" | "mordor" => HasherProvider::with_verifier(network, verifier.clone()),
            other => HasherProvider::new(other),
        };
        Self::with_hasher(hasher, verifier, submit)
    }

    fn with_hasher(hasher: HasherProvider, verifier: Arc<ThresholdVerifier>, submit: SubmitBehavior) -> Self {
        let log = events();
        let backend = MemoryBackend::new(log.clone());
        let rpc = MockRpc::new(log.clone(), submit);
        let refresher = RefreshCounter::new(log.clone());
        let work = Arc::new(WorkCache::new());
        let (reconciler, reconciled) = BlockReconciler::channel();

        work.replace(template(HEADER, HEIGHT));

        let processor = ShareProcessor::new(
            hasher,
            backend.clone(),
            rpc.clone(),
            refresher.clone(),
            work.clone(),
            reconciler,
            ProcessorSettings {
                share_difficulty: SHARE_DIFFICULTY,
                hashrate_expiration: Duration::from_secs(10_800),
                stratum_hostname: "eu1".to_string(),
            },
        );

        Self {
            processor,
            backend,
            rpc,
            refresher,
            verifier,
            work,
            reconciled,
            events: log,
        }
    }

    async fn submit(&self, params: &SubmitParams) -> ShareVerdict {
        self.processor.submit("0xminer", "rig1", "10.0.0.7", params).await
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

fn template(header: &str, height: u64) -> BlockTemplate {
    BlockTemplate::new(header, SEED, "0x01", height, BigUint::from(NETWORK_DIFFICULTY))
}

fn params(nonce: &str) -> SubmitParams {
    SubmitParams::new(nonce, HEADER, MIX)
}

fn is_share(c: &BackendCall) -> bool {
    matches!(c, BackendCall::Share { .. })
}

fn is_block(c: &BackendCall) -> bool {
    matches!(c, BackendCall::Block { .. })
}

// ===========================================================================
// 1. Classification
// ===========================================================================

#[tokio::test]
async fn test_unknown_hash_is_stale() {
    let h = Harness::new("classic", WORTH_A_BLOCK, SubmitBehavior::Accept);

    let verdict = h
        .submit(&SubmitParams::new("0x01", "0xdeadbeef", MIX))
        .await;

    assert_eq!(verdict.outcome, Some(Outcome::Stale));
    assert_eq!(verdict.as_pair(), (false, false));
    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Stale {
            login: "0xminer".to_string(),
            nonce: "0x01".to_string()
        }]
    );
    assert!(h.verifier.calls().is_empty());
    assert!(h.rpc.submitted().is_empty());
}

#[tokio::test]
async fn test_no_template_is_stale() {
    let verifier = ThresholdVerifier::new(WORTH_A_BLOCK);
    let h = Harness::with_hasher(
        HasherProvider::with_verifier("classic", verifier.clone()),
        verifier,
        SubmitBehavior::Accept,
    );
    let empty = Arc::new(WorkCache::new());
    assert!(empty.current().is_none());
    assert!(empty.lookup(HEADER).is_none());

    // The harness cache has work, a fresh one does not: same processor
    // wiring, stale because nothing resolves.
    let processor = ShareProcessor::new(
        h.processor.hasher().clone(),
        h.backend.clone(),
        h.rpc.clone(),
        h.refresher.clone(),
        empty,
        BlockReconciler::channel().0,
        ProcessorSettings {
            share_difficulty: SHARE_DIFFICULTY,
            hashrate_expiration: Duration::from_secs(60),
            stratum_hostname: "eu1".to_string(),
        },
    );
    let verdict = processor.submit("0xminer", "rig1", "10.0.0.7", &params("0x01")).await;

    assert_eq!(verdict.outcome, Some(Outcome::Stale));
    assert_eq!(verdict.as_pair(), (false, false));
    assert_eq!(h.backend.count(|c| matches!(c, BackendCall::Stale { .. })), 1);
}

#[tokio::test]
async fn test_invalid_share_never_checks_network_difficulty() {
    let h = Harness::new("classic", WORTH_NOTHING, SubmitBehavior::Accept);

    let verdict = h.submit(&params("0x01")).await;

    assert_eq!(verdict.outcome, Some(Outcome::Invalid));
    assert_eq!(verdict.as_pair(), (false, false));
    assert_eq!(h.verifier.calls(), vec![BigUint::from(SHARE_DIFFICULTY)]);
    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Invalid {
            login: "0xminer".to_string(),
            nonce: "0x01".to_string()
        }]
    );
}

#[tokio::test]
async fn test_malformed_nonce_is_still_checked() {
    let h = Harness::new("classic", WORTH_NOTHING, SubmitBehavior::Accept);

    let verdict = h.submit(&params("0xnothex")).await;

    assert_eq!(verdict.outcome, Some(Outcome::Invalid));
    assert_eq!(h.verifier.calls().len(), 1);
    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Invalid {
            login: "0xminer".to_string(),
            nonce: "0xnothex".to_string()
        }]
    );
}

#[tokio::test]
async fn test_valid_share_below_network_difficulty() {
    let h = Harness::new("classic", WORTH_A_SHARE, SubmitBehavior::Accept);

    let verdict = h.submit(&params("0x01")).await;

    assert_eq!(verdict.outcome, Some(Outcome::Share));
    assert_eq!(verdict.as_pair(), (false, true));
    assert_eq!(
        h.verifier.calls(),
        vec![BigUint::from(SHARE_DIFFICULTY), BigUint::from(NETWORK_DIFFICULTY)]
    );
    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Share {
            login: "0xminer".to_string(),
            worker: "rig1".to_string(),
            difficulty: SHARE_DIFFICULTY,
            height: HEIGHT,
            hostname: "eu1".to_string(),
        }]
    );
    assert!(h.rpc.submitted().is_empty());
    assert_eq!(h.refresher.count(), 0);
}

// ===========================================================================
// 2. Duplicates and backend failures
// ===========================================================================

#[tokio::test]
async fn test_same_share_twice_is_credited_once() {
    let h = Harness::new("classic", WORTH_A_SHARE, SubmitBehavior::Accept);

    let first = h.submit(&params("0x01")).await;
    let second = h.submit(&params("0x01")).await;
    let other = h.submit(&params("0x02")).await;

    assert_eq!(first.as_pair(), (false, true));
    assert_eq!(second.as_pair(), (true, false));
    assert_eq!(second.outcome, Some(Outcome::Share));
    assert_eq!(other.as_pair(), (false, true));
    assert_eq!(h.backend.count(is_share), 3);
}

#[tokio::test]
async fn test_share_write_failure_still_credits() {
    let h = Harness::new("classic", WORTH_A_SHARE, SubmitBehavior::Accept);
    h.backend.fail_shares.store(true, Ordering::SeqCst);

    let verdict = h.submit(&params("0x01")).await;

    assert_eq!(verdict.outcome, Some(Outcome::Share));
    assert_eq!(verdict.as_pair(), (false, true));
    assert_eq!(h.backend.count(is_share), 1);
}

// ===========================================================================
// 3. Block submission gate
// ===========================================================================

#[tokio::test]
async fn test_accepted_block_submits_then_records() {
    let h = Harness::new("classic", WORTH_A_BLOCK, SubmitBehavior::Accept);
    let submitted = params("0x495732e0ed7a801c");

    let verdict = h.submit(&submitted).await;

    assert_eq!(verdict.outcome, Some(Outcome::Block));
    assert_eq!(verdict.as_pair(), (false, true));
    assert_eq!(h.rpc.submitted(), vec![submitted]);
    assert_eq!(h.refresher.count(), 1);
    assert_eq!(
        h.events(),
        vec!["submit_block".to_string(), "refresh".to_string(), "record_block".to_string()]
    );
    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Block {
            login: "0xminer".to_string(),
            worker: "rig1".to_string(),
            network_difficulty: BigUint::from(NETWORK_DIFFICULTY),
            height: HEIGHT,
        }]
    );
}

#[tokio::test]
async fn test_rejected_block_is_not_recorded() {
    let h = Harness::new("classic", WORTH_A_BLOCK, SubmitBehavior::Reject);

    let verdict = h.submit(&params("0x01")).await;

    assert_eq!(verdict.outcome, Some(Outcome::Block));
    assert_eq!(verdict.as_pair(), (false, false));
    assert_eq!(h.rpc.submitted().len(), 1);
    assert_eq!(h.backend.count(is_block), 0);
    assert_eq!(h.refresher.count(), 0);
}

#[tokio::test]
async fn test_rpc_failure_is_not_recorded() {
    let h = Harness::new("classic", WORTH_A_BLOCK, SubmitBehavior::Fail);

    let verdict = h.submit(&params("0x01")).await;

    assert_eq!(verdict.as_pair(), (false, false));
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.refresher.count(), 0);
    assert_eq!(h.events(), vec!["submit_block".to_string()]);
}

#[tokio::test]
async fn test_same_block_twice_is_duplicate() {
    let h = Harness::new("classic", WORTH_A_BLOCK, SubmitBehavior::Accept);

    let first = h.submit(&params("0x01")).await;
    let second = h.submit(&params("0x01")).await;

    assert_eq!(first.as_pair(), (false, true));
    assert_eq!(second.as_pair(), (true, false));
    assert_eq!(second.outcome, Some(Outcome::Block));
    assert_eq!(h.backend.count(is_block), 2);
}

// ===========================================================================
// 4. Reconciliation hand-off
// ===========================================================================

#[tokio::test]
async fn test_block_write_failure_goes_to_reconciler() {
    let mut h = Harness::new("classic", WORTH_A_BLOCK, SubmitBehavior::Accept);
    h.backend.fail_blocks.store(true, Ordering::SeqCst);
    let submitted = params("0x01");

    let verdict = h.submit(&submitted).await;

    assert_eq!(verdict.outcome, Some(Outcome::Block));
    assert_eq!(verdict.as_pair(), (false, true));

    let record = h.reconciled.try_recv().expect("record handed to reconciler");
    assert_eq!(record.login, "0xminer");
    assert_eq!(record.worker, "rig1");
    assert_eq!(record.params, submitted);
    assert_eq!(record.height, HEIGHT);
    assert_eq!(record.share_difficulty, SHARE_DIFFICULTY);
    assert_eq!(record.network_difficulty, BigUint::from(NETWORK_DIFFICULTY));
    assert_eq!(record.hashrate_expiration(), Duration::from_secs(10_800));
    assert_eq!(record.hostname, "eu1");
    assert!(h.reconciled.try_recv().is_err());
}

#[tokio::test]
async fn test_reconciled_block_lands_in_backend() {
    let mut h = Harness::new("classic", WORTH_A_BLOCK, SubmitBehavior::Accept);
    h.backend.fail_blocks.store(true, Ordering::SeqCst);
    h.submit(&params("0x01")).await;
    let record = h.reconciled.try_recv().expect("record handed to reconciler");
    assert!(!h.backend.block_recorded(HEIGHT, &record.params).await.unwrap());

    h.backend.fail_blocks.store(false, Ordering::SeqCst);
    let policy = RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_attempts: 3,
    };
    assert!(retry(h.backend.clone(), None, record.clone(), policy).await);
    assert!(h.backend.block_recorded(HEIGHT, &record.params).await.unwrap());
}

#[tokio::test]
async fn test_recorded_block_skips_reconciler() {
    let mut h = Harness::new("classic", WORTH_A_BLOCK, SubmitBehavior::Accept);

    h.submit(&params("0x01")).await;

    assert!(h.reconciled.try_recv().is_err());
}

// ===========================================================================
// 5. Unknown network
// ===========================================================================

#[tokio::test]
async fn test_unknown_network_rejects_everything() {
    let h = Harness::new("kotti", WORTH_A_BLOCK, SubmitBehavior::Accept);
    assert!(!h.processor.hasher().is_available());

    let known = h.submit(&params("0x01")).await;
    let unknown = h
        .submit(&SubmitParams::new("0x01", "0xdeadbeef", MIX))
        .await;

    for verdict in [known, unknown] {
        assert_eq!(verdict.outcome, None);
        assert_eq!(verdict.as_pair(), (false, false));
    }
    assert!(h.verifier.calls().is_empty());
    assert!(h.backend.calls().is_empty());
    assert!(h.rpc.submitted().is_empty());
}

// ===========================================================================
// 6. Backlog across template swaps
// ===========================================================================

#[tokio::test]
async fn test_previous_work_resolves_to_its_own_height() {
    let h = Harness::new("classic", WORTH_A_SHARE, SubmitBehavior::Accept);

    let previous = h.work.current().expect("harness template");
    let reply = vec![
        "0xnewheader".to_string(),
        SEED.to_string(),
        "0x0000000100000000000000000000000000000000000000000000000000000000".to_string(),
    ];
    let next = BlockTemplate::from_work(&reply, HEIGHT + 1, Some(&previous)).expect("template");
    h.work.replace(next);

    let verdict = h.submit(&params("0x01")).await;

    assert_eq!(verdict.as_pair(), (false, true));
    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Share {
            login: "0xminer".to_string(),
            worker: "rig1".to_string(),
            difficulty: SHARE_DIFFICULTY,
            height: HEIGHT,
            hostname: "eu1".to_string(),
        }]
    );
    // Network check used the old work's difficulty, not the new template's
    assert_eq!(h.verifier.calls()[1], BigUint::from(NETWORK_DIFFICULTY));
}

#[tokio::test]
async fn test_work_beyond_backlog_is_stale() {
    let h = Harness::new("classic", WORTH_A_SHARE, SubmitBehavior::Accept);

    let mut previous = h.work.current().expect("harness template");
    for step in 1..=3u64 {
        let reply = vec![
            format!("0xheader{}", step),
            SEED.to_string(),
            "0x0000000100000000000000000000000000000000000000000000000000000000".to_string(),
        ];
        let next = BlockTemplate::from_work(&reply, HEIGHT + step, Some(&previous)).expect("template");
        previous = h.work.replace(next);
    }

    let verdict = h.submit(&params("0x01")).await;

    assert_eq!(verdict.outcome, Some(Outcome::Stale));
    assert_eq!(h.backend.count(|c| matches!(c, BackendCall::Stale { .. })), 1);
}
