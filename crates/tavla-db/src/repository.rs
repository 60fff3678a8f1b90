use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableTable, WriteTransaction};
use tracing::warn;

use tavla_core::{ReadTxn, Repository, StorageError, Table, WriteTxn};

use crate::tables::{decode_key, definition};

fn db_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Database(e.to_string())
}

fn get_from<T>(table: &T, key: &str) -> Result<Option<Vec<u8>>, StorageError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let value = table.get(key.as_bytes()).map_err(db_err)?;
    Ok(value.map(|v| v.value().to_vec()))
}

/// Keys are stored as UTF-8, so byte order is string order and the scan
/// can stop at the first key past the prefix.
fn scan_from<T>(table: &T, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut entries = Vec::new();
    for entry in table.range::<&[u8]>(prefix.as_bytes()..).map_err(db_err)? {
        let (key, value) = entry.map_err(db_err)?;
        if !key.value().starts_with(prefix.as_bytes()) {
            break;
        }
        entries.push((decode_key(key.value())?, value.value().to_vec()));
    }
    Ok(entries)
}

/// redb implementation of Repository.
#[derive(Clone)]
pub struct RedbRepository {
    db: Arc<Database>,
}

impl RedbRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Initialize the database tables.
    pub fn init_tables(db: &Database) -> Result<(), StorageError> {
        let write_txn = db.begin_write().map_err(db_err)?;
        {
            // Create tables if they don't exist
            for table in Table::ALL {
                let _ = write_txn.open_table(definition(table)).map_err(db_err)?;
            }
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }
}

/// Snapshot read transaction.
pub struct RedbRead {
    txn: ReadTransaction,
}

impl ReadTxn for RedbRead {
    fn get_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let table = self.txn.open_table(definition(table)).map_err(db_err)?;
        get_from(&table, key)
    }

    fn scan_prefix_raw(
        &self,
        table: Table,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let table = self.txn.open_table(definition(table)).map_err(db_err)?;
        scan_from(&table, prefix)
    }
}

/// Exclusive write transaction. redb aborts it when dropped uncommitted.
pub struct RedbWrite {
    txn: WriteTransaction,
}

impl ReadTxn for RedbWrite {
    fn get_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let table = self.txn.open_table(definition(table)).map_err(db_err)?;
        get_from(&table, key)
    }

    fn scan_prefix_raw(
        &self,
        table: Table,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let table = self.txn.open_table(definition(table)).map_err(db_err)?;
        scan_from(&table, prefix)
    }
}

impl WriteTxn for RedbWrite {
    fn put_raw(&mut self, table: Table, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut table = self.txn.open_table(definition(table)).map_err(db_err)?;
        table
            .insert(key.as_bytes(), value.as_slice())
            .map_err(db_err)?;
        Ok(())
    }

    fn delete_raw(&mut self, table: Table, key: &str) -> Result<bool, StorageError> {
        let mut table = self.txn.open_table(definition(table)).map_err(db_err)?;
        let removed = table.remove(key.as_bytes()).map_err(db_err)?;
        Ok(removed.is_some())
    }

    fn commit(self) -> Result<(), StorageError> {
        self.txn.commit().map_err(db_err)
    }

    fn rollback(self) {
        if let Err(e) = self.txn.abort() {
            warn!(error = %e, "Failed to abort write transaction");
        }
    }
}

impl Repository for RedbRepository {
    type Read<'a> = RedbRead;
    type Write<'a> = RedbWrite;

    fn begin_read(&self) -> Result<RedbRead, StorageError> {
        let txn = self.db.begin_read().map_err(db_err)?;
        Ok(RedbRead { txn })
    }

    fn begin_write(&self) -> Result<RedbWrite, StorageError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        Ok(RedbWrite { txn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_database;
    use chrono::Utc;
    use tavla_core::{transact, Board, BoardName, CoreError, ReadTxnExt, WriteTxnExt};
    use tempfile::tempdir;

    fn board(name: &str) -> Board {
        Board::new(BoardName::new(name).unwrap(), Utc::now())
    }

    #[test]
    fn test_put_and_get() {
        let dir = tempdir().unwrap();
        let repo = RedbRepository::new(init_database(dir.path().join("test.redb")).unwrap());

        transact(&repo, |txn| txn.put(&board("test"))).unwrap();

        let read = repo.begin_read().unwrap();
        let found: Board = read.get("test").unwrap().unwrap();
        assert_eq!(found.name.as_str(), "test");
        assert!(read.get::<Board>("missing").unwrap().is_none());
    }

    #[test]
    fn test_rollback_discards_writes() {
        let dir = tempdir().unwrap();
        let repo = RedbRepository::new(init_database(dir.path().join("test.redb")).unwrap());

        let result: Result<(), CoreError> = transact(&repo, |txn| {
            txn.put(&board("a"))?;
            Err(CoreError::Task("abort".to_string()))
        });
        assert!(result.is_err());

        let read = repo.begin_read().unwrap();
        assert!(read.scan::<Board>().unwrap().is_empty());
    }

    #[test]
    fn test_prefix_scan_stops_at_prefix_end() {
        let dir = tempdir().unwrap();
        let repo = RedbRepository::new(init_database(dir.path().join("test.redb")).unwrap());

        transact(&repo, |txn| {
            for name in ["ab", "abc", "abd", "b", "aa"] {
                txn.put(&board(name))?;
            }
            Ok::<_, StorageError>(())
        })
        .unwrap();

        let read = repo.begin_read().unwrap();
        let names: Vec<String> = read
            .scan_prefix::<Board>("ab")
            .unwrap()
            .into_iter()
            .map(|b| b.name.to_string())
            .collect();
        assert_eq!(names, vec!["ab", "abc", "abd"]);
    }

    #[test]
    fn test_insert_and_delete() {
        let dir = tempdir().unwrap();
        let repo = RedbRepository::new(init_database(dir.path().join("test.redb")).unwrap());

        transact(&repo, |txn| txn.insert(&board("test"))).unwrap();
        let dup = transact(&repo, |txn| txn.insert(&board("test")));
        assert!(matches!(dup, Err(StorageError::Duplicate { .. })));

        let removed = transact(&repo, |txn| txn.delete::<Board>("test")).unwrap();
        assert!(removed);
        let removed = transact(&repo, |txn| txn.delete::<Board>("test")).unwrap();
        assert!(!removed);
    }
}
