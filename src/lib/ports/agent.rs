use std::future::Future;

use crate::domain::message::AgentMessage;

/// Port for the off-chain agent that relays requests to the ledger and
/// calls back into the orchestrator with the responses.
///
/// Implementations:
/// - `RecordingAgent` (collects messages, for tests and the demo)
pub trait AgentChannel: Send + Sync {
    fn deliver(
        &self,
        message: &AgentMessage,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("agent channel closed")]
    Closed,

    #[error("agent rejected message: {0}")]
    Rejected(String),
}
