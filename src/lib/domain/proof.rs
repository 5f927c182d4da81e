use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

/// Provenance of a computed result, submitted alongside the new states so the
/// verifier can reject results computed against a stale policy, a substituted
/// state snapshot, or different code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBundle {
    pub code_hash: B256,
    pub policy_digest: B256,
    pub old_states_digest: B256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    #[error("proof inputs missing: no {0} recorded")]
    ProofInputsMissing(&'static str),
}

impl ProofBundle {
    /// The `uint256[]` form passed to `set_states`, in verifier order.
    pub fn to_words(&self) -> Vec<U256> {
        [self.code_hash, self.policy_digest, self.old_states_digest]
            .iter()
            .map(|word| U256::from_be_bytes(word.0))
            .collect()
    }
}

/// Assemble the proof bundle. Both digests must already be recorded; a
/// missing one means the call is out of sequence.
pub fn build_proof(
    policy_digest: Option<B256>,
    old_states_digest: Option<B256>,
    code_hash: B256,
) -> Result<ProofBundle, ProofError> {
    let policy_digest = policy_digest.ok_or(ProofError::ProofInputsMissing("policy digest"))?;
    let old_states_digest =
        old_states_digest.ok_or(ProofError::ProofInputsMissing("old states digest"))?;

    Ok(ProofBundle {
        code_hash,
        policy_digest,
        old_states_digest,
    })
}
