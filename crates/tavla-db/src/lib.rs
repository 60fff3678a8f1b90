//! Tavla DB - redb implementation of the repository.

pub mod repository;
pub mod tables;

pub use repository::{RedbRead, RedbRepository, RedbWrite};

use std::path::Path;
use std::sync::Arc;

use redb::Database;

use tavla_core::StorageError;

/// Initialize a database with all required tables.
pub fn init_database(path: impl AsRef<Path>) -> Result<Arc<Database>, StorageError> {
    let db = Database::create(path).map_err(|e| StorageError::Database(e.to_string()))?;

    RedbRepository::init_tables(&db)?;

    Ok(Arc::new(db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavla_core::{transact, Board, BoardName, ReadTxnExt, Repository, WriteTxnExt};
    use tempfile::tempdir;

    #[test]
    fn test_init_database() {
        let dir = tempdir().unwrap();
        let db = init_database(dir.path().join("test.redb")).unwrap();

        // Every table exists, so reads on an empty database succeed
        let repo = RedbRepository::new(db);
        let read = repo.begin_read().unwrap();
        assert!(read.scan::<Board>().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");
        {
            let repo = RedbRepository::new(init_database(&path).unwrap());
            let board = Board::new(BoardName::new("test").unwrap(), chrono::Utc::now());
            transact(&repo, |txn| txn.put(&board)).unwrap();
        }

        let repo = RedbRepository::new(init_database(&path).unwrap());
        let read = repo.begin_read().unwrap();
        assert_eq!(read.scan::<Board>().unwrap().len(), 1);
    }
}
