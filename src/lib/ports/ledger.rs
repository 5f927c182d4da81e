use std::fmt;

use serde::{de::DeserializeOwned, Serialize};

/// Tables the orchestrator reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// policy digest → `PolicyRecord`
    Policies,
    /// contract address → policy digest
    PolicyDigests,
    /// target digest → `ConfidentialTransaction`
    Transactions,
    /// contract address → latest target digest
    ContractDigests,
    /// target digest → keccak256 of the old states payload
    StatesDigests,
    /// address → SEC1 public key
    PublicKeys,
    /// address → account nonce
    AccountNonces,
    /// singleton → `TeeAccount`
    TeeAccount,
    /// digest ‖ stage → `AgentMessage`
    Outbox,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Policies => "mpt.policies",
            Table::PolicyDigests => "mpt.policy_digests",
            Table::Transactions => "mpt.transactions",
            Table::ContractDigests => "mpt.contract_digests",
            Table::StatesDigests => "mpt.states_digests",
            Table::PublicKeys => "mpt.public_keys",
            Table::AccountNonces => "mpt.account_nonces",
            Table::TeeAccount => "mpt.tee_account",
            Table::Outbox => "mpt.outbox",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("write conflict on {table} key 0x{key}")]
    Conflict { table: Table, key: String },

    #[error("serialization error in {table}: {reason}")]
    Serialization { table: Table, reason: String },

    #[error("internal ledger error: {0}")]
    Internal(String),
}

/// Transactional key-value ledger.
///
/// Implementations:
/// - `InMemoryLedger` (optimistic concurrency, for tests and the demo)
pub trait Ledger: Send + Sync {
    type Tx: LedgerTx;

    /// Begin a transaction. Nothing it writes is visible until `commit`.
    fn begin(&self) -> Self::Tx;
}

/// One atomic unit of work against the ledger. Dropping it without
/// committing discards every write.
pub trait LedgerTx: Send {
    fn get(&mut self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, LedgerError>;

    fn put(&mut self, table: Table, key: &[u8], value: Vec<u8>);

    /// Apply all writes, or fail with `Conflict` if anything read by this
    /// transaction was changed by another one in the meantime.
    fn commit(self) -> Result<(), LedgerError>;
}

/// Typed JSON access on top of [`LedgerTx`].
pub trait LedgerTxExt: LedgerTx {
    fn get_json<T: DeserializeOwned>(
        &mut self,
        table: Table,
        key: &[u8],
    ) -> Result<Option<T>, LedgerError> {
        self.get(table, key)?
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| LedgerError::Serialization {
                    table,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn put_json<T: Serialize>(
        &mut self,
        table: Table,
        key: &[u8],
        value: &T,
    ) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec(value).map_err(|e| LedgerError::Serialization {
            table,
            reason: e.to_string(),
        })?;
        self.put(table, key, bytes);
        Ok(())
    }
}

impl<T: LedgerTx> LedgerTxExt for T {}
