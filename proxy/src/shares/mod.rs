/// Mining shares module
///
/// Handles share verification, outcome dispatch, persistence and the
/// reconciliation of block records that failed to persist

pub mod validator;
pub mod storage;
pub mod processor;
pub mod reconcile;

pub use validator::{Outcome, ShareValidator, SubmitParams, Verification};
pub use storage::{RedisBackend, ShareBackend};
pub use processor::{ProcessorSettings, ShareProcessor, ShareVerdict};
pub use reconcile::{BlockJournal, BlockReconciler, BlockRecord, RetryPolicy};
