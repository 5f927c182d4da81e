use alloy::primitives::{Address, Bytes};
use std::future::Future;

use crate::domain::function::FunctionBinding;

/// Everything the execution engine needs to run one confidential call.
/// `old_states` are plaintext and never leave the TEE boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub contract: Address,
    pub tee: Address,
    pub requester: Address,
    pub function: FunctionBinding,
    pub old_states: Vec<Bytes>,
}

/// Port for the contract execution engine.
///
/// Implementations:
/// - `MockExecutionEngine` (scripted results, for tests and the demo)
pub trait ExecutionEngine: Send + Sync {
    /// Execute the call and return the new states as an ABI `bytes[]`,
    /// one entry per mutated storage location.
    fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> impl Future<Output = Result<Bytes, EngineError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("execution engine unavailable: {0}")]
    Unavailable(String),
}
