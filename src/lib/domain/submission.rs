use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use super::policy::PolicyDocument;

/// One named argument value supplied by a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: String,
}

/// The JSON body of a submission: which function, and the arguments this
/// party supplies for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: String,
    pub inputs: Vec<Argument>,
}

impl FunctionCall {
    pub fn new(function: &str, inputs: &[(&str, &str)]) -> Self {
        Self {
            function: function.to_string(),
            inputs: inputs
                .iter()
                .map(|(name, value)| Argument {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        }
    }
}

/// A decoded party submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Opens a new confidential transaction against `contract`.
    Open {
        contract: Address,
        nonce: u64,
        call: FunctionCall,
    },
    /// Contributes arguments to the transaction identified by `target`.
    Join { target: B256, call: FunctionCall },
}

impl Submission {
    pub fn call(&self) -> &FunctionCall {
        match self {
            Submission::Open { call, .. } | Submission::Join { call, .. } => call,
        }
    }
}

/// The JSON body of a policy registration. The contract address travels in
/// the envelope's `to` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRegistration {
    pub verifier: Address,
    pub service: Address,
    pub code_hash: B256,
    pub document: PolicyDocument,
}
