//! Contract → confidentiality policy bindings.
//!
//! Two tables back the registry: `policy_digests` maps a contract address to
//! the digest of its policy, and `policies` maps that digest to the record.
//! Records are write-once; there is no update or delete.

use alloy::primitives::{Address, B256};

use crate::domain::policy::{PolicyError, PolicyRecord};
use crate::ports::ledger::{LedgerError, LedgerTx, LedgerTxExt, Table};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("contract {contract} already has policy {existing}")]
    DuplicatePolicy { contract: Address, existing: B256 },

    #[error("no policy registered for contract {0}")]
    PolicyNotFound(Address),

    #[error("policy digest {0} has no record")]
    DanglingDigest(B256),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Store `record` under its digest and bind its contract to it.
pub fn register<T: LedgerTx>(tx: &mut T, record: &PolicyRecord) -> Result<B256, RegistryError> {
    if let Some(existing) = digest_for(tx, record.contract)? {
        return Err(RegistryError::DuplicatePolicy {
            contract: record.contract,
            existing,
        });
    }

    let digest = record.digest()?;
    tx.put_json(Table::PolicyDigests, record.contract.as_slice(), &digest)?;
    tx.put_json(Table::Policies, digest.as_slice(), record)?;
    Ok(digest)
}

/// Policy digest bound to `contract`, if any.
pub fn digest_for<T: LedgerTx>(tx: &mut T, contract: Address) -> Result<Option<B256>, RegistryError> {
    Ok(tx.get_json(Table::PolicyDigests, contract.as_slice())?)
}

pub fn get_by_digest<T: LedgerTx>(
    tx: &mut T,
    digest: B256,
) -> Result<Option<PolicyRecord>, RegistryError> {
    Ok(tx.get_json(Table::Policies, digest.as_slice())?)
}

/// The policy of `contract` together with its digest.
pub fn lookup<T: LedgerTx>(
    tx: &mut T,
    contract: Address,
) -> Result<(B256, PolicyRecord), RegistryError> {
    let digest = digest_for(tx, contract)?.ok_or(RegistryError::PolicyNotFound(contract))?;
    let record = get_by_digest(tx, digest)?.ok_or(RegistryError::DanglingDigest(digest))?;
    Ok((digest, record))
}
