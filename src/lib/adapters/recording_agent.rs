use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::domain::message::AgentMessage;
use crate::ports::agent::{AgentChannel, ChannelError};

/// `AgentChannel` that records every delivered message.
///
/// `close` makes further deliveries fail with `ChannelError::Closed`, which
/// is how tests exercise redelivery from the outbox.
pub struct RecordingAgent {
    messages: Mutex<Vec<AgentMessage>>,
    closed: AtomicBool,
}

impl RecordingAgent {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn messages(&self) -> Vec<AgentMessage> {
        self.messages.lock().await.clone()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

impl Default for RecordingAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentChannel for RecordingAgent {
    async fn deliver(&self, message: &AgentMessage) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.messages.lock().await.push(message.clone());
        Ok(())
    }
}
