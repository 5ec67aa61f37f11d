use prometheus::{Encoder, IntCounter, IntGauge, TextEncoder};
use prometheus::core::Collector;
use std::sync::OnceLock;

static SHARES_ACCEPTED: OnceLock<IntCounter> = OnceLock::new();
static SHARES_DUPLICATE: OnceLock<IntCounter> = OnceLock::new();
static SHARES_STALE: OnceLock<IntCounter> = OnceLock::new();
static SHARES_INVALID: OnceLock<IntCounter> = OnceLock::new();
static SHARES_UNVERIFIED: OnceLock<IntCounter> = OnceLock::new();
static MALFORMED_NONCES: OnceLock<IntCounter> = OnceLock::new();

static BLOCKS_FOUND: OnceLock<IntCounter> = OnceLock::new();
static BLOCK_SUBMIT_ATTEMPTS: OnceLock<IntCounter> = OnceLock::new();
static BLOCK_SUBMIT_REJECTED: OnceLock<IntCounter> = OnceLock::new();
static BLOCK_SUBMIT_ERRORS: OnceLock<IntCounter> = OnceLock::new();
static BLOCK_RECORD_FAILURES: OnceLock<IntCounter> = OnceLock::new();

static RECONCILE_RETRIES: OnceLock<IntCounter> = OnceLock::new();
static RECONCILE_RECOVERED: OnceLock<IntCounter> = OnceLock::new();
static RECONCILE_ABANDONED: OnceLock<IntCounter> = OnceLock::new();
static RECONCILE_PENDING: OnceLock<IntGauge> = OnceLock::new();

static RPC_REQUESTS: OnceLock<IntCounter> = OnceLock::new();
static RPC_ERRORS: OnceLock<IntCounter> = OnceLock::new();
static TEMPLATE_UPDATES: OnceLock<IntCounter> = OnceLock::new();
static TEMPLATE_FETCH_ERRORS: OnceLock<IntCounter> = OnceLock::new();
static TEMPLATE_HEIGHT: OnceLock<IntGauge> = OnceLock::new();
static TEMPLATE_BACKLOG: OnceLock<IntGauge> = OnceLock::new();

static REDIS_ERRORS: OnceLock<IntCounter> = OnceLock::new();

fn counter(cell: &'static OnceLock<IntCounter>, name: &str, help: &str) -> &'static IntCounter {
    cell.get_or_init(|| IntCounter::new(name, help).unwrap())
}

fn gauge(cell: &'static OnceLock<IntGauge>, name: &str, help: &str) -> &'static IntGauge {
    cell.get_or_init(|| IntGauge::new(name, help).unwrap())
}

fn shares_accepted() -> &'static IntCounter {
    counter(&SHARES_ACCEPTED, "shares_accepted_total", "Total shares credited")
}

fn shares_duplicate() -> &'static IntCounter {
    counter(&SHARES_DUPLICATE, "shares_duplicate_total", "Total shares already recorded")
}

fn shares_stale() -> &'static IntCounter {
    counter(&SHARES_STALE, "shares_stale_total", "Total shares for unknown or expired work")
}

fn shares_invalid() -> &'static IntCounter {
    counter(&SHARES_INVALID, "shares_invalid_total", "Total shares failing share difficulty")
}

fn shares_unverified() -> &'static IntCounter {
    counter(
        &SHARES_UNVERIFIED,
        "shares_unverified_total",
        "Total shares rejected because no verifier is configured",
    )
}

fn malformed_nonces() -> &'static IntCounter {
    counter(&MALFORMED_NONCES, "malformed_nonces_total", "Total nonces that failed hex parsing")
}

fn blocks_found() -> &'static IntCounter {
    counter(&BLOCKS_FOUND, "blocks_found_total", "Total blocks accepted by the node")
}

fn block_submit_attempts() -> &'static IntCounter {
    counter(
        &BLOCK_SUBMIT_ATTEMPTS,
        "block_submit_attempts_total",
        "Total block submit attempts (block candidates)",
    )
}

fn block_submit_rejected() -> &'static IntCounter {
    counter(&BLOCK_SUBMIT_REJECTED, "block_submit_rejected_total", "Total block submits rejected by the node")
}

fn block_submit_errors() -> &'static IntCounter {
    counter(&BLOCK_SUBMIT_ERRORS, "block_submit_errors_total", "Total block submits that failed in transport")
}

fn block_record_failures() -> &'static IntCounter {
    counter(
        &BLOCK_RECORD_FAILURES,
        "block_record_failures_total",
        "Total accepted blocks whose backend write failed",
    )
}

fn reconcile_retries() -> &'static IntCounter {
    counter(&RECONCILE_RETRIES, "block_reconcile_retries_total", "Total block record retry attempts")
}

fn reconcile_recovered() -> &'static IntCounter {
    counter(&RECONCILE_RECOVERED, "block_reconcile_recovered_total", "Total block records written on retry")
}

fn reconcile_abandoned() -> &'static IntCounter {
    counter(
        &RECONCILE_ABANDONED,
        "block_reconcile_abandoned_total",
        "Total block records given up after the last retry",
    )
}

fn reconcile_pending() -> &'static IntGauge {
    gauge(&RECONCILE_PENDING, "block_reconcile_pending", "Block records awaiting a retry")
}

fn rpc_requests() -> &'static IntCounter {
    counter(&RPC_REQUESTS, "rpc_requests_total", "Total RPC requests to the node")
}

fn rpc_errors() -> &'static IntCounter {
    counter(&RPC_ERRORS, "rpc_errors_total", "Total RPC errors")
}

fn template_updates() -> &'static IntCounter {
    counter(&TEMPLATE_UPDATES, "block_template_updates_total", "Total template updates")
}

fn template_fetch_errors() -> &'static IntCounter {
    counter(&TEMPLATE_FETCH_ERRORS, "block_template_fetch_errors_total", "Total template fetch errors")
}

fn template_height() -> &'static IntGauge {
    gauge(&TEMPLATE_HEIGHT, "block_template_height", "Height of the current work")
}

fn template_backlog() -> &'static IntGauge {
    gauge(&TEMPLATE_BACKLOG, "block_template_backlog", "Work headers still accepted for shares")
}

fn redis_errors() -> &'static IntCounter {
    counter(&REDIS_ERRORS, "redis_errors_total", "Total Redis errors")
}

pub fn inc_shares_accepted() {
    shares_accepted().inc();
}
pub fn inc_shares_duplicate() {
    shares_duplicate().inc();
}
pub fn inc_shares_stale() {
    shares_stale().inc();
}
pub fn inc_shares_invalid() {
    shares_invalid().inc();
}
pub fn inc_shares_unverified() {
    shares_unverified().inc();
}
pub fn inc_malformed_nonces() {
    malformed_nonces().inc();
}
pub fn inc_blocks_found() {
    blocks_found().inc();
}
pub fn inc_block_submit_attempts() {
    block_submit_attempts().inc();
}
pub fn inc_block_submit_rejected() {
    block_submit_rejected().inc();
}
pub fn inc_block_submit_errors() {
    block_submit_errors().inc();
}
pub fn inc_block_record_failures() {
    block_record_failures().inc();
}
pub fn inc_reconcile_retries() {
    reconcile_retries().inc();
}
pub fn inc_reconcile_recovered() {
    reconcile_recovered().inc();
}
pub fn inc_reconcile_abandoned() {
    reconcile_abandoned().inc();
}
pub fn inc_reconcile_pending() {
    reconcile_pending().inc();
}
pub fn dec_reconcile_pending() {
    reconcile_pending().dec();
}
pub fn inc_rpc_requests() {
    rpc_requests().inc();
}
pub fn inc_rpc_errors() {
    rpc_errors().inc();
}
pub fn inc_template_updates() {
    template_updates().inc();
}
pub fn inc_template_fetch_errors() {
    template_fetch_errors().inc();
}
pub fn set_template_height(height: u64) {
    template_height().set(height as i64);
}
pub fn set_template_backlog(headers: usize) {
    template_backlog().set(headers as i64);
}
pub fn inc_redis_errors() {
    redis_errors().inc();
}

pub fn render() -> String {
    let enc = TextEncoder::new();
    let mut mfs = Vec::new();

    mfs.extend(shares_accepted().collect());
    mfs.extend(shares_duplicate().collect());
    mfs.extend(shares_stale().collect());
    mfs.extend(shares_invalid().collect());
    mfs.extend(shares_unverified().collect());
    mfs.extend(malformed_nonces().collect());
    mfs.extend(blocks_found().collect());
    mfs.extend(block_submit_attempts().collect());
    mfs.extend(block_submit_rejected().collect());
    mfs.extend(block_submit_errors().collect());
    mfs.extend(block_record_failures().collect());
    mfs.extend(reconcile_retries().collect());
    mfs.extend(reconcile_recovered().collect());
    mfs.extend(reconcile_abandoned().collect());
    mfs.extend(reconcile_pending().collect());
    mfs.extend(rpc_requests().collect());
    mfs.extend(rpc_errors().collect());
    mfs.extend(template_updates().collect());
    mfs.extend(template_fetch_errors().collect());
    mfs.extend(template_height().collect());
    mfs.extend(template_backlog().collect());
    mfs.extend(redis_errors().collect());

    let mut buf = Vec::new();
    let _ = enc.encode(&mfs, &mut buf);
    String::from_utf8_lossy(&buf).to_string()
}
