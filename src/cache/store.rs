//! Atomic snapshot store.
//!
//! The store owns exactly one current snapshot. A writer clones it, applies
//! every table mutation, and publishes the result in one pointer swap, so a
//! reader either sees all of a transaction or none of it. All exports are
//! deep copies; row bytes never cross the store boundary mutably.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::transaction::Transaction;

#[derive(Debug, Clone, Default)]
struct Snapshot {
    tables: HashMap<String, HashMap<String, Vec<u8>>>,
}

/// Client-side table state with atomic transaction application.
pub struct Store {
    // Serializes clone-apply-publish; readers never take it.
    write_mu: Mutex<()>,
    state: RwLock<Arc<Snapshot>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            write_mu: Mutex::new(()),
            state: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    fn current(&self) -> Arc<Snapshot> {
        self.state.read().unwrap().clone()
    }

    /// Apply a transaction as a single atomic state update.
    ///
    /// Within each table mutation, deletes apply first, then inserts in
    /// order; later mutations in the transaction see earlier ones.
    pub fn apply_transaction(&self, tx: &Transaction) {
        let _guard = self.write_mu.lock().unwrap();

        let mut next = (*self.current()).clone();
        for mutation in &tx.tables {
            let rows = next.tables.entry(mutation.table.clone()).or_default();
            for key in &mutation.deletes {
                rows.remove(key);
            }
            for row in &mutation.inserts {
                rows.insert(row.key.clone(), row.data.clone());
            }
        }

        *self.state.write().unwrap() = Arc::new(next);
    }

    /// Fetch a copy of one row. Mutating the returned buffer does not affect
    /// subsequent reads.
    pub fn get(&self, table: &str, key: &str) -> Option<Vec<u8>> {
        self.current().tables.get(table)?.get(key).cloned()
    }

    /// A deep copy of one table's rows, keyed by row key.
    pub fn table_snapshot(&self, table: &str) -> HashMap<String, Vec<u8>> {
        self.current()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// A deep copy of the whole store, grouped by table and row key.
    pub fn snapshot(&self) -> HashMap<String, HashMap<String, Vec<u8>>> {
        (*self.current()).clone().tables
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::transaction::{Row, TableMutation};
    use super::*;

    fn insert(table: &str, key: &str, data: &str) -> TableMutation {
        TableMutation {
            table: table.to_string(),
            inserts: vec![Row::new(key, data.as_bytes())],
            deletes: Vec::new(),
        }
    }

    #[test]
    fn test_apply_and_get() {
        let store = Store::new();
        store.apply_transaction(&Transaction {
            tables: vec![insert("users", "u1", "alice")],
        });

        assert_eq!(store.get("users", "u1"), Some(b"alice".to_vec()));
        assert_eq!(store.get("users", "missing"), None);
        assert_eq!(store.get("missing", "u1"), None);
    }

    #[test]
    fn test_multi_table_transaction_is_atomic_in_effect() {
        let store = Store::new();
        store.apply_transaction(&Transaction {
            tables: vec![insert("users", "u1", "alice")],
        });

        store.apply_transaction(&Transaction {
            tables: vec![
                TableMutation {
                    table: "users".to_string(),
                    inserts: vec![Row::new("u2", b"bob".as_slice())],
                    deletes: vec!["u1".to_string()],
                },
                insert("teams", "t1", "infra"),
            ],
        });

        assert_eq!(store.get("users", "u1"), None);
        assert_eq!(store.get("users", "u2"), Some(b"bob".to_vec()));
        assert_eq!(store.get("teams", "t1"), Some(b"infra".to_vec()));
    }

    #[test]
    fn test_deletes_apply_before_inserts() {
        let store = Store::new();
        store.apply_transaction(&Transaction {
            tables: vec![insert("users", "u1", "alice")],
        });

        // Delete and reinsert the same key within one mutation.
        store.apply_transaction(&Transaction {
            tables: vec![TableMutation {
                table: "users".to_string(),
                inserts: vec![Row::new("u1", b"alice-v2".as_slice())],
                deletes: vec!["u1".to_string()],
            }],
        });

        assert_eq!(store.get("users", "u1"), Some(b"alice-v2".to_vec()));
    }

    #[test]
    fn test_later_inserts_overwrite_earlier_ones() {
        let store = Store::new();
        store.apply_transaction(&Transaction {
            tables: vec![TableMutation {
                table: "users".to_string(),
                inserts: vec![
                    Row::new("u1", b"first".as_slice()),
                    Row::new("u1", b"second".as_slice()),
                ],
                deletes: Vec::new(),
            }],
        });

        assert_eq!(store.get("users", "u1"), Some(b"second".to_vec()));
    }

    #[test]
    fn test_returned_buffers_are_isolated() {
        let store = Store::new();
        store.apply_transaction(&Transaction {
            tables: vec![insert("users", "u1", "alice")],
        });

        let mut fetched = store.get("users", "u1").unwrap();
        fetched[0] = b'X';
        assert_eq!(store.get("users", "u1"), Some(b"alice".to_vec()));

        let mut table = store.table_snapshot("users");
        table.get_mut("u1").unwrap()[0] = b'Y';
        assert_eq!(store.get("users", "u1"), Some(b"alice".to_vec()));

        let mut all = store.snapshot();
        all.get_mut("users").unwrap().get_mut("u1").unwrap()[0] = b'Z';
        assert_eq!(store.get("users", "u1"), Some(b"alice".to_vec()));
    }

    #[test]
    fn test_snapshot_of_missing_table_is_empty() {
        let store = Store::new();
        assert!(store.table_snapshot("nope").is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_reader_holding_old_snapshot_is_unaffected() {
        let store = Store::new();
        store.apply_transaction(&Transaction {
            tables: vec![insert("users", "u1", "alice")],
        });

        let before = store.table_snapshot("users");
        store.apply_transaction(&Transaction {
            tables: vec![TableMutation {
                table: "users".to_string(),
                inserts: Vec::new(),
                deletes: vec!["u1".to_string()],
            }],
        });

        assert_eq!(before.get("u1"), Some(&b"alice".to_vec()));
        assert_eq!(store.get("users", "u1"), None);
    }
}
