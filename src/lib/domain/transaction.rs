use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

use super::function::{BindingError, FunctionBinding};
use super::policy::PolicyRecord;
use super::submission::Argument;

/// Lifecycle of a confidential transaction.
///
/// `PENDING → REQUESTING_OLD_STATES → (REQUESTING_PUBLIC_KEYS) → SYNCING → {SYNCED | SYNC_FAILED}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    RequestingOldStates,
    RequestingPublicKeys,
    Syncing,
    Synced,
    SyncFailed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Synced | Status::SyncFailed)
    }

    /// The complete transition table. Every other edge is rejected.
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Pending, RequestingOldStates)
                | (RequestingOldStates, RequestingPublicKeys)
                | (RequestingOldStates, Syncing)
                | (RequestingPublicKeys, Syncing)
                | (Syncing, Synced)
                | (Syncing, SyncFailed)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Pending => "PENDING",
            Status::RequestingOldStates => "REQUESTING_OLD_STATES",
            Status::RequestingPublicKeys => "REQUESTING_PUBLIC_KEYS",
            Status::Syncing => "SYNCING",
            Status::Synced => "SYNCED",
            Status::SyncFailed => "SYNC_FAILED",
        };
        f.write_str(name)
    }
}

/// Outcome string a confirmation report must carry for a successful sync.
pub const SYNCED_OUTCOME: &str = "SYNCED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },
}

/// An in-flight confidential call, keyed by its target digest.
///
/// Transitions consume the value and return the next one; the orchestrator
/// loads a transaction, applies them, and writes the result back inside one
/// ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidentialTransaction {
    pub digest: B256,
    /// Contract being called
    pub to: Address,
    /// Requester (signer of the opening submission)
    pub from: Address,
    pub policy_digest: B256,
    pub verifier: Address,
    pub code_hash: B256,
    pub function: FunctionBinding,
    pub status: Status,
    /// Every address that contributed arguments, in submission order
    pub participants: Vec<Address>,
    /// Addresses whose public keys were requested from the agent
    pub requested_addresses: Vec<Address>,
    /// SEC1-encoded public keys known for this transaction
    pub public_keys: BTreeMap<Address, Bytes>,
    /// Old states as returned by the verifier (sealed form)
    pub old_states: Vec<Bytes>,
}

impl ConfidentialTransaction {
    pub fn new(
        digest: B256,
        from: Address,
        policy: &PolicyRecord,
        policy_digest: B256,
        function: FunctionBinding,
    ) -> Self {
        Self {
            digest,
            to: policy.contract,
            from,
            policy_digest,
            verifier: policy.verifier,
            code_hash: policy.code_hash,
            function,
            status: Status::Pending,
            participants: Vec::new(),
            requested_addresses: Vec::new(),
            public_keys: BTreeMap::new(),
            old_states: Vec::new(),
        }
    }

    /// Move to `next` if the transition table allows it.
    pub fn with_status(mut self, next: Status) -> Result<Self, TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(self)
    }

    /// Bind a party's arguments. Stops at the first rejected argument; the
    /// caller discards the value on error so earlier bindings are not kept.
    pub fn merge_inputs(mut self, party: Address, inputs: &[Argument]) -> Result<Self, BindingError> {
        for arg in inputs {
            self.function.bind(&arg.name, &arg.value)?;
        }
        if !self.participants.contains(&party) {
            self.participants.push(party);
        }
        Ok(self)
    }

    /// Apply a confirmation report. Returns `None` when the transaction is
    /// already terminal, so redelivered reports are acknowledged without effect.
    pub fn finalize(self, outcome: &str) -> Result<Option<Self>, TransitionError> {
        if self.status.is_terminal() {
            return Ok(None);
        }
        let next = if outcome == SYNCED_OUTCOME {
            Status::Synced
        } else {
            Status::SyncFailed
        };
        self.with_status(next).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::function::tests::transfer_binding;
    use crate::domain::policy::tests::token_policy;

    const ALL: [Status; 6] = [
        Status::Pending,
        Status::RequestingOldStates,
        Status::RequestingPublicKeys,
        Status::Syncing,
        Status::Synced,
        Status::SyncFailed,
    ];

    fn test_transaction() -> ConfidentialTransaction {
        let policy = token_policy(Address::repeat_byte(0xAA));
        ConfidentialTransaction::new(
            B256::repeat_byte(0x10),
            Address::repeat_byte(0x0A),
            &policy,
            B256::repeat_byte(0x20),
            transfer_binding(),
        )
    }

    fn arg(name: &str, value: &str) -> Argument {
        Argument {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_transition_table_edges() {
        let allowed: Vec<(Status, Status)> = ALL
            .iter()
            .flat_map(|a| ALL.iter().map(move |b| (*a, *b)))
            .filter(|(a, b)| a.can_transition_to(*b))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (Status::Pending, Status::RequestingOldStates),
                (Status::RequestingOldStates, Status::RequestingPublicKeys),
                (Status::RequestingOldStates, Status::Syncing),
                (Status::RequestingPublicKeys, Status::Syncing),
                (Status::Syncing, Status::Synced),
                (Status::Syncing, Status::SyncFailed),
            ]
        );
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [Status::Synced, Status::SyncFailed] {
            assert!(terminal.is_terminal());
            assert!(ALL.iter().all(|next| !terminal.can_transition_to(*next)));
        }
    }

    #[test]
    fn test_with_status_rejects_skip() {
        let cpt = test_transaction();
        let result = cpt.with_status(Status::Syncing);
        assert_eq!(
            result.unwrap_err(),
            TransitionError::InvalidTransition {
                from: Status::Pending,
                to: Status::Syncing
            }
        );
    }

    #[test]
    fn test_merge_inputs_records_participant_once() {
        let party = Address::repeat_byte(0x0A);
        let cpt = test_transaction()
            .merge_inputs(party, &[arg("amount", "100")])
            .unwrap()
            .merge_inputs(party, &[arg("to", "0xBB")])
            .unwrap();

        assert_eq!(cpt.participants, vec![party]);
        assert!(cpt.function.is_complete());
    }

    #[test]
    fn test_merge_inputs_duplicate_rejected() {
        let cpt = test_transaction()
            .merge_inputs(Address::repeat_byte(0x0A), &[arg("amount", "100")])
            .unwrap();

        let result = cpt
            .clone()
            .merge_inputs(Address::repeat_byte(0x0B), &[arg("amount", "1")]);
        assert_eq!(
            result.unwrap_err(),
            BindingError::AlreadyBound("amount".to_string())
        );
        assert_eq!(cpt.function.value_of("amount"), Some("100"));
    }

    #[test]
    fn test_finalize_synced_then_noop() {
        let cpt = test_transaction()
            .with_status(Status::RequestingOldStates)
            .unwrap()
            .with_status(Status::Syncing)
            .unwrap();

        let synced = cpt.finalize("SYNCED").unwrap().unwrap();
        assert_eq!(synced.status, Status::Synced);
        assert!(synced.finalize("SYNCED").unwrap().is_none());
    }

    #[test]
    fn test_finalize_other_outcome_fails_sync() {
        let cpt = test_transaction()
            .with_status(Status::RequestingOldStates)
            .unwrap()
            .with_status(Status::Syncing)
            .unwrap();

        let failed = cpt.finalize("REVERTED").unwrap().unwrap();
        assert_eq!(failed.status, Status::SyncFailed);
    }

    #[test]
    fn test_finalize_from_pending_rejected() {
        let result = test_transaction().finalize("SYNCED");
        assert!(matches!(
            result,
            Err(TransitionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_status_json_names() {
        assert_eq!(
            serde_json::to_string(&Status::RequestingOldStates).unwrap(),
            "\"REQUESTING_OLD_STATES\""
        );
        assert_eq!(Status::SyncFailed.to_string(), "SYNC_FAILED");
    }

    #[test]
    fn test_transaction_json_roundtrip_with_keys() {
        let mut cpt = test_transaction();
        cpt.public_keys
            .insert(Address::repeat_byte(0x0A), Bytes::from(vec![0x02; 33]));

        let json = serde_json::to_vec(&cpt).unwrap();
        let decoded: ConfidentialTransaction = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, cpt);
    }
}
