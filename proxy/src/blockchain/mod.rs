/// Node communication: JSON-RPC client and the work it hands out

pub mod rpc_client;
pub mod template_manager;

pub use rpc_client::{NodeRpc, NodeRpcClient, PendingBlock};
pub use template_manager::{
    BlockTemplate, BlockTemplateManager, TemplateRefresher, WorkCache, WorkDescriptor, MAX_BACKLOG,
};
