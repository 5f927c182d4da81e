use alloy::primitives::{keccak256, Address, B256};
use serde::{Deserialize, Serialize};

use super::function::FunctionBinding;

/// Who a state slot's values are sealed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateOwner {
    /// Sealed to the TEE's own key.
    #[serde(rename = "tee")]
    Tee,
    /// Stored in plaintext.
    #[serde(rename = "all")]
    All,
    /// Sealed to the transaction requester.
    #[serde(rename = "msg.sender")]
    Sender,
    /// Mapping slot; each entry is sealed to the address used as its key.
    #[serde(rename = "key")]
    Key,
}

/// A storage slot declared by a confidentiality policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub owner: StateOwner,
}

/// The confidentiality rules for one contract: its private state slots and
/// the functions that may be called over them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub contract: String,
    #[serde(default)]
    pub states: Vec<StateDecl>,
    pub functions: Vec<FunctionBinding>,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("function {0} not declared by the policy")]
    UnknownFunction(String),

    #[error("state slot {0} not declared by the policy")]
    UnknownState(String),

    #[error("policy encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl PolicyDocument {
    /// A fresh, unbound copy of the named function.
    pub fn function(&self, name: &str) -> Result<FunctionBinding, PolicyError> {
        self.functions
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .map(|mut f| {
                for input in &mut f.inputs {
                    input.value = None;
                }
                f
            })
            .ok_or_else(|| PolicyError::UnknownFunction(name.to_string()))
    }

    pub fn state(&self, name: &str) -> Result<&StateDecl, PolicyError> {
        self.states
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| PolicyError::UnknownState(name.to_string()))
    }
}

/// A contract's registered confidentiality policy. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// Contract the policy applies to
    pub contract: Address,
    /// Address that signed the registration
    pub registrant: Address,
    /// Verifier contract that accepts `set_states` from the TEE
    pub verifier: Address,
    /// Confidentiality service contract (participant public key registry)
    pub service: Address,
    /// Hash of the contract code the policy was written for
    pub code_hash: B256,
    pub document: PolicyDocument,
}

impl PolicyRecord {
    /// Content digest of the record: keccak256 of its JSON encoding.
    pub fn digest(&self) -> Result<B256, PolicyError> {
        Ok(keccak256(serde_json::to_vec(self)?))
    }
}
