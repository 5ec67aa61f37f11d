// ETC pool proxy - share validation, block submission and bookkeeping
//
// Work: eth_getWork polling into the work cache
// Shares: Etchash verification, Redis bookkeeping, block reconciliation

use anyhow::{anyhow, Context};
use axum::{extract::State, http::{header, StatusCode}, response::IntoResponse, routing::get, Json};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use etc_proxy::blockchain::{BlockTemplateManager, NodeRpcClient, WorkCache};
use etc_proxy::config::Config;
use etc_proxy::hasher::HasherProvider;
use etc_proxy::metrics::prometheus as metrics;
use etc_proxy::shares::{
    BlockJournal, BlockReconciler, ProcessorSettings, RedisBackend, RetryPolicy, ShareProcessor,
};

#[derive(Clone)]
struct ApiState {
    storage: Arc<RedisBackend>,
    work: Arc<WorkCache>,
    processor: Arc<ShareProcessor>,
}

async fn api_health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let redis_ok = state.storage.ping().await.is_ok();
    let template = state.work.current();
    Json(json!({
        "status": "ok",
        "redis": redis_ok,
        "network": state.processor.hasher().network(),
        "verifier": state.processor.hasher().is_available(),
        "height": template.as_ref().map(|t| t.height),
        "backlog": template.as_ref().map(|t| t.backlog_len()),
    }))
}

async fn api_metrics() -> impl IntoResponse {
    let body = metrics::render();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

// ─── Main ───

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cfg = Config::load();
    cfg.validate()?;
    tracing::info!(
        "🚀 ETC proxy starting: network={}, node={}, redis={}",
        cfg.network,
        cfg.node_rpc_url,
        cfg.redis_url
    );

    // Built once; an unknown network leaves the proxy up but rejecting shares
    let hasher = HasherProvider::new(&cfg.network);

    let rpc_client = Arc::new(NodeRpcClient::new(&cfg.node_rpc_url, cfg.rpc_timeout()));
    let storage = Arc::new(RedisBackend::new(&cfg.redis_url, &cfg.redis_prefix)?);
    if let Err(e) = storage.ping().await {
        tracing::warn!("⚠️  Redis not reachable yet: {}", e);
    }

    let journal = cfg.block_journal_path.as_ref().map(BlockJournal::new);
    let (reconciler, _reconciler_task) =
        BlockReconciler::spawn(storage.clone(), journal, RetryPolicy::default());

    let work = Arc::new(WorkCache::new());
    let template_manager = Arc::new(BlockTemplateManager::new(
        rpc_client.clone(),
        work.clone(),
        hasher.get().ok(),
        cfg.block_refresh_interval(),
    ));
    if let Err(e) = template_manager.force_update().await {
        tracing::warn!("⚠️  Initial work fetch failed: {}", e);
    }
    let _template_task = template_manager.start();

    let processor = Arc::new(ShareProcessor::new(
        hasher,
        storage.clone(),
        rpc_client,
        template_manager,
        work.clone(),
        reconciler,
        ProcessorSettings::from_config(&cfg),
    ));

    let api_state = ApiState { storage, work, processor };
    let api = axum::Router::new()
        .route("/health", get(api_health))
        .route("/metrics", get(api_metrics))
        .with_state(api_state);

    let listener = tokio::net::TcpListener::bind(&cfg.metrics_listen)
        .await
        .with_context(|| format!("binding {}", cfg.metrics_listen))?;

    let shutdown_signal = async {
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => tracing::info!("SIGTERM - shutting down"),
                        _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT - shutting down"),
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Ctrl+C - shutting down");
        }
    };

    tracing::info!("📡 Metrics and health listening on {}", cfg.metrics_listen);
    axum::serve(listener, api)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| anyhow!("HTTP server error: {}", e))?;

    tracing::info!("🏁 ETC proxy shut down cleanly");
    Ok(())
}
