use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// Outbound request to the off-chain agent. At most one message per digest
/// per stage is ever written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Ask the verifier contract for the current sealed states.
    RequestOldStates {
        digest: B256,
        tee: Address,
        verifier: Address,
        call_data: Bytes,
    },
    /// Ask the confidentiality service for participant public keys.
    RequestPublicKeys {
        digest: B256,
        addresses: Vec<Address>,
    },
    /// Broadcast the TEE-signed `set_states` transaction.
    SubmitSignedCall {
        digest: B256,
        nonce: u64,
        payload: Bytes,
    },
}

impl AgentMessage {
    pub fn digest(&self) -> B256 {
        match self {
            AgentMessage::RequestOldStates { digest, .. }
            | AgentMessage::RequestPublicKeys { digest, .. }
            | AgentMessage::SubmitSignedCall { digest, .. } => *digest,
        }
    }

    /// Protocol stage tag, used in outbox keys.
    pub fn stage(&self) -> u8 {
        match self {
            AgentMessage::RequestOldStates { .. } => 0,
            AgentMessage::RequestPublicKeys { .. } => 1,
            AgentMessage::SubmitSignedCall { .. } => 2,
        }
    }

    /// Outbox key: digest followed by the stage tag.
    pub fn outbox_key(&self) -> Vec<u8> {
        outbox_key(self.digest(), self.stage())
    }
}

pub fn outbox_key(digest: B256, stage: u8) -> Vec<u8> {
    let mut key = digest.to_vec();
    key.push(stage);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_json() {
        let msg = AgentMessage::RequestPublicKeys {
            digest: B256::repeat_byte(0x01),
            addresses: vec![Address::repeat_byte(0x02)],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "request_public_keys");
    }

    #[test]
    fn test_outbox_keys_distinct_per_stage() {
        let digest = B256::repeat_byte(0x01);
        let a = AgentMessage::RequestPublicKeys {
            digest,
            addresses: vec![],
        };
        let b = AgentMessage::SubmitSignedCall {
            digest,
            nonce: 0,
            payload: Bytes::new(),
        };
        assert_ne!(a.outbox_key(), b.outbox_key());
        assert_eq!(a.outbox_key().len(), 33);
    }
}
