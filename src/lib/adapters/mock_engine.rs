use alloy::primitives::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Barrier, Mutex};

use crate::codec::abi::encode_value_array;
use crate::ports::engine::{EngineError, ExecutionEngine, ExecutionRequest};

/// Scripted `ExecutionEngine` for tests and the demo.
///
/// Results are configured per function name. A function with no scripted
/// result reverts, as does one scripted with `set_revert`. A held engine
/// parks every execution at a barrier, which lets tests interleave ledger
/// transactions.
pub struct MockExecutionEngine {
    results: Mutex<HashMap<String, Result<Vec<Bytes>, String>>>,
    requests: Mutex<Vec<ExecutionRequest>>,
    gate: Mutex<Option<Arc<Barrier>>>,
}

impl MockExecutionEngine {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// New states returned for every call to `function`.
    pub async fn set_result(&self, function: &str, new_states: Vec<Bytes>) {
        self.results
            .lock()
            .await
            .insert(function.to_string(), Ok(new_states));
    }

    pub async fn set_revert(&self, function: &str, reason: &str) {
        self.results
            .lock()
            .await
            .insert(function.to_string(), Err(reason.to_string()));
    }

    /// Park each execution at `gate` until enough callers arrive.
    pub async fn hold(&self, gate: Arc<Barrier>) {
        *self.gate.lock().await = Some(gate);
    }

    pub async fn release(&self) {
        *self.gate.lock().await = None;
    }

    /// Every request seen so far (for test assertions).
    pub async fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().await.clone()
    }
}

impl Default for MockExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine for MockExecutionEngine {
    async fn execute(&self, request: &ExecutionRequest) -> Result<Bytes, EngineError> {
        self.requests.lock().await.push(request.clone());

        let gate = self.gate.lock().await.clone();
        if let Some(gate) = gate {
            gate.wait().await;
        }

        match self.results.lock().await.get(&request.function.name) {
            Some(Ok(states)) => Ok(encode_value_array(states)),
            Some(Err(reason)) => Err(EngineError::Reverted(reason.clone())),
            None => Err(EngineError::Reverted(format!(
                "no result scripted for {}",
                request.function.name
            ))),
        }
    }
}
