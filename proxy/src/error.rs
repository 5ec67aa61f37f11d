/// Proxy error taxonomy
///
/// Every failure the share pipeline can meet is one of these. The pipeline
/// itself never returns them to its caller: they are logged and folded into
/// the share verdict.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unknown network configuration: {0}")]
    UnknownNetwork(String),

    #[error("stale work: {0}")]
    StaleWork(String),

    #[error("proof of work does not meet share difficulty")]
    InvalidProof,

    #[error("node RPC failure: {0}")]
    RpcFailure(String),

    #[error("block rejected by node")]
    RpcRejected,

    #[error("backend write failed: {0}")]
    BackendWrite(String),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
