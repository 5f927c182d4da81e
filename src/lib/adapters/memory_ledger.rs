use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::ports::ledger::{Ledger, LedgerError, LedgerTx, Table};

type RowKey = (Table, Vec<u8>);

struct Row {
    value: Vec<u8>,
    version: u64,
}

#[derive(Default)]
struct LedgerState {
    rows: HashMap<RowKey, Row>,
}

impl LedgerState {
    /// Version of a row; 0 means "never written".
    fn version(&self, key: &RowKey) -> u64 {
        self.rows.get(key).map_or(0, |row| row.version)
    }
}

fn lock(state: &Mutex<LedgerState>) -> Result<MutexGuard<'_, LedgerState>, LedgerError> {
    state
        .lock()
        .map_err(|_| LedgerError::Internal("ledger state poisoned".to_string()))
}

/// In-memory implementation of `Ledger` for tests and the demo.
///
/// Optimistic concurrency: every row carries a version, transactions record
/// the version of each row they read, and `commit` fails with `Conflict` if
/// any of those rows moved in the meantime. Writes are buffered in the
/// transaction and applied all at once.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for InMemoryLedger {
    type Tx = MemoryTx;

    fn begin(&self) -> MemoryTx {
        MemoryTx {
            state: Arc::clone(&self.state),
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }
}

pub struct MemoryTx {
    state: Arc<Mutex<LedgerState>>,
    reads: HashMap<RowKey, u64>,
    writes: BTreeMap<RowKey, Vec<u8>>,
}

impl LedgerTx for MemoryTx {
    fn get(&mut self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, LedgerError> {
        let row_key = (table, key.to_vec());
        if let Some(pending) = self.writes.get(&row_key) {
            return Ok(Some(pending.clone()));
        }

        let state = lock(&self.state)?;
        let version = state.version(&row_key);
        let value = state.rows.get(&row_key).map(|row| row.value.clone());
        drop(state);

        // First read wins: a later re-read must not mask an earlier stale view.
        self.reads.entry(row_key).or_insert(version);
        Ok(value)
    }

    fn put(&mut self, table: Table, key: &[u8], value: Vec<u8>) {
        self.writes.insert((table, key.to_vec()), value);
    }

    fn commit(self) -> Result<(), LedgerError> {
        let mut state = lock(&self.state)?;

        for (row_key, seen) in &self.reads {
            if state.version(row_key) != *seen {
                return Err(LedgerError::Conflict {
                    table: row_key.0,
                    key: hex::encode(&row_key.1),
                });
            }
        }

        for (row_key, value) in self.writes {
            let version = state.version(&row_key) + 1;
            state.rows.insert(row_key, Row { value, version });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ledger::LedgerTxExt;

    #[test]
    fn uncommitted_writes_are_invisible() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin();
        tx.put(Table::AccountNonces, b"alice", b"1".to_vec());

        let mut other = ledger.begin();
        assert!(other.get(Table::AccountNonces, b"alice").unwrap().is_none());
    }

    #[test]
    fn committed_writes_are_visible() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin();
        tx.put_json(Table::AccountNonces, b"alice", &7u64).unwrap();
        tx.commit().unwrap();

        let mut tx = ledger.begin();
        let nonce: Option<u64> = tx.get_json(Table::AccountNonces, b"alice").unwrap();
        assert_eq!(nonce, Some(7));
    }

    #[test]
    fn read_your_own_writes() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin();
        tx.put(Table::Outbox, b"k", b"v".to_vec());
        assert_eq!(tx.get(Table::Outbox, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn dropped_transaction_discards_writes() {
        let ledger = InMemoryLedger::new();
        {
            let mut tx = ledger.begin();
            tx.put(Table::Outbox, b"k", b"v".to_vec());
        }
        assert!(ledger.begin().get(Table::Outbox, b"k").unwrap().is_none());
    }

    #[test]
    fn concurrent_update_conflicts() {
        let ledger = InMemoryLedger::new();
        let mut seed = ledger.begin();
        seed.put(Table::TeeAccount, b"tee", b"0".to_vec());
        seed.commit().unwrap();

        let mut a = ledger.begin();
        let mut b = ledger.begin();
        a.get(Table::TeeAccount, b"tee").unwrap();
        b.get(Table::TeeAccount, b"tee").unwrap();
        a.put(Table::TeeAccount, b"tee", b"1".to_vec());
        b.put(Table::TeeAccount, b"tee", b"1".to_vec());

        a.commit().unwrap();
        let err = b.commit().unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Conflict {
                table: Table::TeeAccount,
                ..
            }
        ));
    }

    #[test]
    fn read_of_absent_row_conflicts_with_insert() {
        let ledger = InMemoryLedger::new();
        let mut a = ledger.begin();
        let mut b = ledger.begin();
        assert!(a.get(Table::Transactions, b"d").unwrap().is_none());
        assert!(b.get(Table::Transactions, b"d").unwrap().is_none());
        a.put(Table::Transactions, b"d", b"a".to_vec());
        b.put(Table::Transactions, b"d", b"b".to_vec());

        a.commit().unwrap();
        assert!(b.commit().is_err());
        assert_eq!(
            ledger.begin().get(Table::Transactions, b"d").unwrap(),
            Some(b"a".to_vec())
        );
    }

    #[test]
    fn disjoint_transactions_both_commit() {
        let ledger = InMemoryLedger::new();
        let mut a = ledger.begin();
        let mut b = ledger.begin();
        a.get(Table::PublicKeys, b"x").unwrap();
        b.get(Table::PublicKeys, b"y").unwrap();
        a.put(Table::PublicKeys, b"x", vec![1]);
        b.put(Table::PublicKeys, b"y", vec![2]);

        a.commit().unwrap();
        b.commit().unwrap();
    }

    #[test]
    fn corrupt_json_is_serialization_error() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin();
        tx.put(Table::TeeAccount, b"tee", b"not json".to_vec());
        let result: Result<Option<u64>, _> = tx.get_json(Table::TeeAccount, b"tee");
        assert!(matches!(
            result,
            Err(LedgerError::Serialization {
                table: Table::TeeAccount,
                ..
            })
        ));
    }
}
