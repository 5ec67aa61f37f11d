/// Share Processing Pipeline - classification + the one side effect it implies
///
/// Complete flow:
/// 1. Resolve the work the share names (missing -> stale)
/// 2. Verify at share difficulty (fails -> invalid)
/// 3. Verify at network difficulty (fails -> share, passes -> block)
/// 4. Stale/invalid/share: one backend write
/// 5. Block: submit to the node first, record only once it is accepted
///
/// Nothing here returns an error to the caller. Failures are logged and end
/// up in the `ShareVerdict`.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::reconcile::{BlockReconciler, BlockRecord};
use super::storage::ShareBackend;
use super::validator::{Outcome, ShareValidator, SubmitParams, Verification};
use crate::blockchain::{BlockTemplate, NodeRpc, TemplateRefresher, WorkCache, WorkDescriptor};
use crate::config::Config;
use crate::error::ProxyError;
use crate::hasher::HasherProvider;
use crate::metrics::prometheus as metrics;

/// What happened to a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareVerdict {
    /// `None` when the share could not be classified at all
    pub outcome: Option<Outcome>,
    /// The same proof of work was already recorded
    pub duplicate: bool,
    /// The miner gets credit for this share
    pub credited: bool,
}

impl ShareVerdict {
    pub fn rejected(outcome: Option<Outcome>) -> Self {
        Self { outcome, duplicate: false, credited: false }
    }

    pub fn credited(outcome: Outcome) -> Self {
        Self { outcome: Some(outcome), duplicate: false, credited: true }
    }

    pub fn duplicate(outcome: Outcome) -> Self {
        Self { outcome: Some(outcome), duplicate: true, credited: false }
    }

    /// `(duplicate, credited)`, the answer a stratum session sends back
    pub fn as_pair(&self) -> (bool, bool) {
        (self.duplicate, self.credited)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub share_difficulty: u64,
    pub hashrate_expiration: Duration,
    pub stratum_hostname: String,
}

impl ProcessorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            share_difficulty: cfg.share_difficulty,
            hashrate_expiration: cfg.hashrate_expiration(),
            stratum_hostname: cfg.stratum_hostname.clone(),
        }
    }
}

/// Share processor - orchestrates validation, node submission and storage
pub struct ShareProcessor {
    validator: ShareValidator,
    backend: Arc<dyn ShareBackend>,
    rpc_client: Arc<dyn NodeRpc>,
    refresher: Arc<dyn TemplateRefresher>,
    work: Arc<WorkCache>,
    reconciler: BlockReconciler,
    settings: ProcessorSettings,
}

impl ShareProcessor {
    pub fn new(
        hasher: HasherProvider,
        backend: Arc<dyn ShareBackend>,
        rpc_client: Arc<dyn NodeRpc>,
        refresher: Arc<dyn TemplateRefresher>,
        work: Arc<WorkCache>,
        reconciler: BlockReconciler,
        settings: ProcessorSettings,
    ) -> Self {
        tracing::info!(
            "ShareProcessor: network={}, share_difficulty={}, hashrate_expiration={}s, hostname={}",
            hasher.network(),
            settings.share_difficulty,
            settings.hashrate_expiration.as_secs(),
            settings.stratum_hostname
        );

        Self {
            validator: ShareValidator::new(hasher, settings.share_difficulty),
            backend,
            rpc_client,
            refresher,
            work,
            reconciler,
            settings,
        }
    }

    pub fn hasher(&self) -> &HasherProvider {
        self.validator.hasher()
    }

    /// Process a submission against whatever work is current right now
    pub async fn submit(&self, login: &str, worker: &str, ip: &str, params: &SubmitParams) -> ShareVerdict {
        let template = self.work.current();
        self.process(login, worker, ip, template.as_deref(), params).await
    }

    /// Process a submission against a given template snapshot
    pub async fn process_share(
        &self,
        login: &str,
        worker: &str,
        ip: &str,
        template: &BlockTemplate,
        params: &SubmitParams,
    ) -> ShareVerdict {
        self.process(login, worker, ip, Some(template), params).await
    }

    async fn process(
        &self,
        login: &str,
        worker: &str,
        ip: &str,
        template: Option<&BlockTemplate>,
        params: &SubmitParams,
    ) -> ShareVerdict {
        let verification = match self.validator.validate(login, ip, template, params).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("Share from {}@{} not verified: {}", login, ip, e);
                metrics::inc_shares_unverified();
                return ShareVerdict::rejected(None);
            }
        };

        let rejection = verification.rejection(params);

        match verification {
            Verification::Stale => {
                if let Some(reason) = rejection {
                    tracing::info!("Share from {}@{} rejected: {}", login, ip, reason);
                }
                metrics::inc_shares_stale();
                if let Err(e) = self.backend.record_stale(login, &params.nonce).await {
                    metrics::inc_redis_errors();
                    tracing::error!("Failed to record stale share for {}: {}", login, e);
                }
                ShareVerdict::rejected(Some(Outcome::Stale))
            }
            Verification::Invalid(work) => {
                if let Some(reason) = rejection {
                    tracing::debug!(
                        "Share from {}@{} at height {} rejected: {}",
                        login,
                        ip,
                        work.height,
                        reason
                    );
                }
                metrics::inc_shares_invalid();
                if let Err(e) = self.backend.record_invalid(login, &params.nonce).await {
                    metrics::inc_redis_errors();
                    tracing::error!("Failed to record invalid share for {}: {}", login, e);
                }
                ShareVerdict::rejected(Some(Outcome::Invalid))
            }
            Verification::Share(work) => self.handle_share(login, worker, &work, params).await,
            Verification::Block(work) => self.handle_block_found(login, worker, ip, &work, params).await,
        }
    }

    async fn handle_share(
        &self,
        login: &str,
        worker: &str,
        work: &WorkDescriptor,
        params: &SubmitParams,
    ) -> ShareVerdict {
        let res = self
            .backend
            .record_share(
                login,
                worker,
                params,
                self.settings.share_difficulty,
                work.height,
                self.settings.hashrate_expiration,
                &self.settings.stratum_hostname,
            )
            .await;

        match res {
            Ok(true) => {
                metrics::inc_shares_duplicate();
                ShareVerdict::duplicate(Outcome::Share)
            }
            Ok(false) => {
                metrics::inc_shares_accepted();
                ShareVerdict::credited(Outcome::Share)
            }
            Err(e) => {
                metrics::inc_redis_errors();
                tracing::error!("Failed to insert share data into backend: {}", e);
                metrics::inc_shares_accepted();
                ShareVerdict::credited(Outcome::Share)
            }
        }
    }

    /// Submit first, record second. The node's answer decides the verdict.
    async fn handle_block_found(
        &self,
        login: &str,
        worker: &str,
        ip: &str,
        work: &WorkDescriptor,
        params: &SubmitParams,
    ) -> ShareVerdict {
        metrics::inc_block_submit_attempts();

        match self.rpc_client.submit_block(params).await {
            Err(e) => {
                metrics::inc_block_submit_errors();
                tracing::error!(
                    "Block submission failure at height {} for {}: {}",
                    work.height,
                    work.header,
                    e
                );
                return ShareVerdict::rejected(Some(Outcome::Block));
            }
            Ok(false) => {
                metrics::inc_block_submit_rejected();
                tracing::warn!(
                    "Block at height {} for {}: {}",
                    work.height,
                    work.header,
                    ProxyError::RpcRejected
                );
                return ShareVerdict::rejected(Some(Outcome::Block));
            }
            Ok(true) => {}
        }

        self.refresher.refresh();
        metrics::inc_blocks_found();
        tracing::info!("🎉 Block found by miner {}@{} at height {}", login, ip, work.height);

        let res = self
            .backend
            .record_block(
                login,
                worker,
                params,
                self.settings.share_difficulty,
                &work.difficulty,
                work.height,
                self.settings.hashrate_expiration,
                &self.settings.stratum_hostname,
            )
            .await;

        match res {
            Ok(true) => return ShareVerdict::duplicate(Outcome::Block),
            Ok(false) => tracing::info!("Inserted block {} to backend", work.height),
            Err(e) => {
                metrics::inc_redis_errors();
                metrics::inc_block_record_failures();
                tracing::error!("Failed to insert block candidate into backend: {}", e);
                self.reconciler.enqueue(self.block_record(login, worker, work, params));
            }
        }

        ShareVerdict::credited(Outcome::Block)
    }

    fn block_record(
        &self,
        login: &str,
        worker: &str,
        work: &WorkDescriptor,
        params: &SubmitParams,
    ) -> BlockRecord {
        BlockRecord {
            login: login.to_string(),
            worker: worker.to_string(),
            params: params.clone(),
            share_difficulty: self.settings.share_difficulty,
            network_difficulty: work.difficulty.clone(),
            height: work.height,
            hashrate_expiration_secs: self.settings.hashrate_expiration.as_secs(),
            hostname: self.settings.stratum_hostname.clone(),
            found_at: Utc::now().timestamp(),
        }
    }
}
