use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::board::{Board, BoardMessageLink, SubscribedBoard};
use crate::error::StorageError;
use crate::message::{FetchFailedMarker, Message, OwnMessage};
use crate::message_list::{ListFetchFailedMarker, MessageList, MessageReference, OwnMessageList};
use crate::task::PersistentTask;

/// Named tables, one per record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Messages,
    OwnMessages,
    MessageLists,
    MessageReferences,
    OwnMessageLists,
    FetchFailedMarkers,
    ListFetchFailedMarkers,
    Boards,
    BoardLinks,
    SubscribedBoards,
    Tasks,
}

impl Table {
    pub const ALL: [Table; 11] = [
        Table::Messages,
        Table::OwnMessages,
        Table::MessageLists,
        Table::MessageReferences,
        Table::OwnMessageLists,
        Table::FetchFailedMarkers,
        Table::ListFetchFailedMarkers,
        Table::Boards,
        Table::BoardLinks,
        Table::SubscribedBoards,
        Table::Tasks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Messages => "messages",
            Table::OwnMessages => "own_messages",
            Table::MessageLists => "message_lists",
            Table::MessageReferences => "message_references",
            Table::OwnMessageLists => "own_message_lists",
            Table::FetchFailedMarkers => "fetch_failed_markers",
            Table::ListFetchFailedMarkers => "list_fetch_failed_markers",
            Table::Boards => "boards",
            Table::BoardLinks => "board_links",
            Table::SubscribedBoards => "subscribed_boards",
            Table::Tasks => "tasks",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A value stored in one table under a string key.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: Table;

    fn key(&self) -> String;
}

/// A consistent snapshot of the repository.
pub trait ReadTxn {
    fn get_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix_raw(
        &self,
        table: Table,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    fn scan_raw(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        self.scan_prefix_raw(table, "")
    }
}

/// An exclusive write transaction. Dropping it without `commit` discards
/// every change.
pub trait WriteTxn: ReadTxn {
    fn put_raw(&mut self, table: Table, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Like `put_raw`, but fails with `StorageError::Duplicate` if the key exists.
    fn insert_raw(&mut self, table: Table, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        if self.get_raw(table, key)?.is_some() {
            return Err(StorageError::Duplicate {
                table: table.name(),
                key: key.to_string(),
            });
        }
        self.put_raw(table, key, value)
    }

    /// Returns whether the key existed.
    fn delete_raw(&mut self, table: Table, key: &str) -> Result<bool, StorageError>;

    fn commit(self) -> Result<(), StorageError>
    where
        Self: Sized;

    fn rollback(self)
    where
        Self: Sized;
}

/// Transactional key-value repository.
pub trait Repository: Send + Sync {
    type Read<'a>: ReadTxn
    where
        Self: 'a;
    type Write<'a>: WriteTxn
    where
        Self: 'a;

    fn begin_read(&self) -> Result<Self::Read<'_>, StorageError>;

    /// Blocks until no other write transaction is open.
    fn begin_write(&self) -> Result<Self::Write<'_>, StorageError>;
}

/// Run `f` in a write transaction: commit on `Ok`, roll back on `Err`.
/// A panic inside `f` drops the transaction, which aborts it.
pub fn transact<'r, R, T, E, F>(repo: &'r R, f: F) -> Result<T, E>
where
    R: Repository,
    E: From<StorageError>,
    F: FnOnce(&mut R::Write<'r>) -> Result<T, E>,
{
    let mut txn = repo.begin_write()?;
    match f(&mut txn) {
        Ok(value) => {
            txn.commit()?;
            Ok(value)
        }
        Err(e) => {
            txn.rollback();
            Err(e)
        }
    }
}

pub fn encode<E: Record>(record: &E) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(record).map_err(|e| StorageError::Codec {
        table: E::TABLE.name(),
        message: e.to_string(),
    })
}

pub fn decode<E: Record>(bytes: &[u8]) -> Result<E, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Codec {
        table: E::TABLE.name(),
        message: e.to_string(),
    })
}

/// Typed reads on top of [`ReadTxn`].
pub trait ReadTxnExt: ReadTxn {
    fn get<E: Record>(&self, key: &str) -> Result<Option<E>, StorageError> {
        self.get_raw(E::TABLE, key)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn contains<E: Record>(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get_raw(E::TABLE, key)?.is_some())
    }

    fn scan_prefix<E: Record>(&self, prefix: &str) -> Result<Vec<E>, StorageError> {
        self.scan_prefix_raw(E::TABLE, prefix)?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    fn scan<E: Record>(&self) -> Result<Vec<E>, StorageError> {
        self.scan_prefix("")
    }

    fn query<E: Record>(&self, query: &Query<E>) -> Result<Cursor<E>, StorageError> {
        query.run(self)
    }
}

impl<T: ReadTxn + ?Sized> ReadTxnExt for T {}

/// Typed writes on top of [`WriteTxn`].
pub trait WriteTxnExt: WriteTxn {
    fn put<E: Record>(&mut self, record: &E) -> Result<(), StorageError> {
        let bytes = encode(record)?;
        self.put_raw(E::TABLE, &record.key(), bytes)
    }

    fn insert<E: Record>(&mut self, record: &E) -> Result<(), StorageError> {
        let bytes = encode(record)?;
        self.insert_raw(E::TABLE, &record.key(), bytes)
    }

    fn delete<E: Record>(&mut self, key: &str) -> Result<bool, StorageError> {
        self.delete_raw(E::TABLE, key)
    }

    fn remove<E: Record>(&mut self, record: &E) -> Result<bool, StorageError> {
        self.delete_raw(E::TABLE, &record.key())
    }
}

impl<T: WriteTxn + ?Sized> WriteTxnExt for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

type Filter<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type Comparator<E> = Box<dyn Fn(&E, &E) -> Ordering + Send + Sync>;

/// Predicate query over one table: key prefix, filters, ordering.
pub struct Query<E> {
    prefix: String,
    filters: Vec<Filter<E>>,
    order: Option<Comparator<E>>,
    limit: Option<usize>,
}

impl<E: Record> Query<E> {
    pub fn all() -> Self {
        Self {
            prefix: String::new(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::all()
        }
    }

    pub fn filter(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Box::new(predicate));
        self
    }

    /// Sort by a derived key. Without an ordering, results come in key order.
    pub fn order_by<K: Ord>(
        mut self,
        key: impl Fn(&E) -> K + Send + Sync + 'static,
        order: Order,
    ) -> Self {
        self.order = Some(Box::new(move |a, b| {
            let ord = key(a).cmp(&key(b));
            match order {
                Order::Ascending => ord,
                Order::Descending => ord.reverse(),
            }
        }));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn run<T: ReadTxn + ?Sized>(&self, txn: &T) -> Result<Cursor<E>, StorageError> {
        let mut items = Vec::new();
        for (_, bytes) in txn.scan_prefix_raw(E::TABLE, &self.prefix)? {
            let item: E = decode(&bytes)?;
            if self.filters.iter().all(|f| f(&item)) {
                items.push(item);
            }
        }
        if let Some(cmp) = &self.order {
            items.sort_by(|a, b| cmp(a, b));
        }
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        Ok(Cursor::new(items))
    }
}

/// Single-pass iterator over the results of one query, taken from one
/// snapshot. Later commits are not visible through it.
pub struct Cursor<E> {
    items: std::vec::IntoIter<E>,
}

impl<E> Cursor<E> {
    pub fn new(items: Vec<E>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl<E> Iterator for Cursor<E> {
    type Item = E;

    fn next(&mut self) -> Option<E> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl<E> ExactSizeIterator for Cursor<E> {}

impl Record for Message {
    const TABLE: Table = Table::Messages;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Record for OwnMessage {
    const TABLE: Table = Table::OwnMessages;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

impl Record for MessageList {
    const TABLE: Table = Table::MessageLists;

    fn key(&self) -> String {
        self.id.key()
    }
}

impl Record for MessageReference {
    const TABLE: Table = Table::MessageReferences;

    fn key(&self) -> String {
        format!(
            "{}{}|{}",
            MessageReference::message_prefix(&self.message_id),
            self.list_id.key(),
            self.board
        )
    }
}

impl Record for OwnMessageList {
    const TABLE: Table = Table::OwnMessageLists;

    fn key(&self) -> String {
        self.id.key()
    }
}

impl Record for FetchFailedMarker {
    const TABLE: Table = Table::FetchFailedMarkers;

    fn key(&self) -> String {
        self.message_id.to_string()
    }
}

impl Record for ListFetchFailedMarker {
    const TABLE: Table = Table::ListFetchFailedMarkers;

    fn key(&self) -> String {
        self.list_id.key()
    }
}

impl Record for Board {
    const TABLE: Table = Table::Boards;

    fn key(&self) -> String {
        self.name.to_string()
    }
}

impl Record for BoardMessageLink {
    const TABLE: Table = Table::BoardLinks;

    fn key(&self) -> String {
        format!("{}{}", BoardMessageLink::board_prefix(&self.board), self.message_id)
    }
}

impl Record for SubscribedBoard {
    const TABLE: Table = Table::SubscribedBoards;

    fn key(&self) -> String {
        format!("{}{}", SubscribedBoard::subscriber_prefix(&self.subscriber), self.name)
    }
}

impl Record for PersistentTask {
    const TABLE: Table = Table::Tasks;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

// In-memory implementation for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::marker::PhantomData;
    use std::sync::{Arc, Mutex, MutexGuard, RwLock};

    use crate::sync;

    type TableMap = BTreeMap<String, Vec<u8>>;

    #[derive(Debug, Clone, Default)]
    struct Tables {
        tables: BTreeMap<Table, TableMap>,
    }

    impl Tables {
        fn get(&self, table: Table, key: &str) -> Option<Vec<u8>> {
            self.tables.get(&table).and_then(|t| t.get(key)).cloned()
        }

        fn scan_prefix(&self, table: Table, prefix: &str) -> Vec<(String, Vec<u8>)> {
            match self.tables.get(&table) {
                Some(t) => t
                    .range(prefix.to_string()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                None => Vec::new(),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum WriteKind {
        Put,
        Delete,
    }

    /// A single write, as seen by fault predicates.
    #[derive(Debug)]
    pub struct WriteOp<'a> {
        pub table: Table,
        pub key: &'a str,
        pub kind: WriteKind,
    }

    struct Fault {
        remaining: usize,
        predicate: Box<dyn Fn(&WriteOp<'_>) -> bool + Send + Sync>,
    }

    /// In-memory repository for testing.
    ///
    /// Readers get an immutable snapshot of the last commit. A writer works
    /// on a private copy that replaces the snapshot on commit.
    #[derive(Default)]
    pub struct InMemoryRepository {
        committed: RwLock<Arc<Tables>>,
        writer: Mutex<()>,
        faults: Mutex<Vec<Fault>>,
    }

    impl InMemoryRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `times` writes matching `predicate` fail.
        pub fn fail_writes(
            &self,
            times: usize,
            predicate: impl Fn(&WriteOp<'_>) -> bool + Send + Sync + 'static,
        ) {
            sync::lock(&self.faults).push(Fault {
                remaining: times,
                predicate: Box::new(predicate),
            });
        }

        pub fn clear_faults(&self) {
            sync::lock(&self.faults).clear();
        }

        /// Number of committed entries in `table`.
        pub fn count(&self, table: Table) -> usize {
            sync::read(&self.committed)
                .tables
                .get(&table)
                .map_or(0, |t| t.len())
        }

        fn check_faults(&self, op: &WriteOp<'_>) -> Result<(), StorageError> {
            let mut faults = sync::lock(&self.faults);
            if let Some(fault) = faults
                .iter_mut()
                .find(|f| f.remaining > 0 && (f.predicate)(op))
            {
                fault.remaining -= 1;
                return Err(StorageError::Database(format!(
                    "injected fault on {:?} {}/{}",
                    op.kind, op.table, op.key
                )));
            }
            faults.retain(|f| f.remaining > 0);
            Ok(())
        }
    }

    pub struct InMemoryRead<'a> {
        snapshot: Arc<Tables>,
        _repo: PhantomData<&'a InMemoryRepository>,
    }

    impl ReadTxn for InMemoryRead<'_> {
        fn get_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(self.snapshot.get(table, key))
        }

        fn scan_prefix_raw(
            &self,
            table: Table,
            prefix: &str,
        ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
            Ok(self.snapshot.scan_prefix(table, prefix))
        }
    }

    pub struct InMemoryWrite<'a> {
        repo: &'a InMemoryRepository,
        staged: Tables,
        _writer: MutexGuard<'a, ()>,
    }

    impl ReadTxn for InMemoryWrite<'_> {
        fn get_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(self.staged.get(table, key))
        }

        fn scan_prefix_raw(
            &self,
            table: Table,
            prefix: &str,
        ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
            Ok(self.staged.scan_prefix(table, prefix))
        }
    }

    impl WriteTxn for InMemoryWrite<'_> {
        fn put_raw(&mut self, table: Table, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
            self.repo.check_faults(&WriteOp {
                table,
                key,
                kind: WriteKind::Put,
            })?;
            self.staged
                .tables
                .entry(table)
                .or_default()
                .insert(key.to_string(), value);
            Ok(())
        }

        fn delete_raw(&mut self, table: Table, key: &str) -> Result<bool, StorageError> {
            self.repo.check_faults(&WriteOp {
                table,
                key,
                kind: WriteKind::Delete,
            })?;
            Ok(self
                .staged
                .tables
                .get_mut(&table)
                .and_then(|t| t.remove(key))
                .is_some())
        }

        fn commit(self) -> Result<(), StorageError> {
            *sync::write(&self.repo.committed) = Arc::new(self.staged);
            Ok(())
        }

        fn rollback(self) {}
    }

    impl Repository for InMemoryRepository {
        type Read<'a> = InMemoryRead<'a>;
        type Write<'a> = InMemoryWrite<'a>;

        fn begin_read(&self) -> Result<InMemoryRead<'_>, StorageError> {
            Ok(InMemoryRead {
                snapshot: Arc::clone(&sync::read(&self.committed)),
                _repo: PhantomData,
            })
        }

        fn begin_write(&self) -> Result<InMemoryWrite<'_>, StorageError> {
            let writer = sync::lock(&self.writer);
            let staged = Tables::clone(&sync::read(&self.committed));
            Ok(InMemoryWrite {
                repo: self,
                staged,
                _writer: writer,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{InMemoryRepository, WriteKind};
    use super::*;
    use crate::ids::{BoardName, IdentityId};
    use chrono::{Duration, Utc};

    fn board(name: &str) -> Board {
        Board::new(BoardName::new(name).unwrap(), Utc::now())
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let repo = InMemoryRepository::new();
        transact(&repo, |txn| txn.put(&board("test"))).unwrap();

        let read = repo.begin_read().unwrap();
        let found: Option<Board> = read.get("test").unwrap();
        assert_eq!(found.unwrap().name.as_str(), "test");
    }

    #[test]
    fn test_error_rolls_back() {
        let repo = InMemoryRepository::new();
        let result: Result<(), StorageError> = transact(&repo, |txn| {
            txn.put(&board("a"))?;
            Err(StorageError::Database("boom".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(repo.count(Table::Boards), 0);
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let repo = InMemoryRepository::new();
        transact(&repo, |txn| txn.insert(&board("test"))).unwrap();

        let result = transact(&repo, |txn| txn.insert(&board("test")));
        assert!(matches!(result, Err(StorageError::Duplicate { .. })));
    }

    #[test]
    fn test_snapshot_isolation() {
        let repo = InMemoryRepository::new();
        transact(&repo, |txn| txn.put(&board("a"))).unwrap();

        let before = repo.begin_read().unwrap();
        transact(&repo, |txn| txn.put(&board("b"))).unwrap();

        assert_eq!(before.scan::<Board>().unwrap().len(), 1);
        assert_eq!(repo.begin_read().unwrap().scan::<Board>().unwrap().len(), 2);
    }

    #[test]
    fn test_query_prefix_filter_order() {
        let repo = InMemoryRepository::new();
        let alice = IdentityId::new("alice").unwrap();
        let now = Utc::now();
        transact(&repo, |txn| {
            for (i, name) in ["b", "c", "a"].iter().enumerate() {
                let mut b = Board::new(BoardName::new(name).unwrap(), now + Duration::seconds(i as i64));
                b.has_subscriptions = *name != "c";
                txn.put(&b)?;
                txn.put(&SubscribedBoard::new(alice.clone(), &b, now))?;
            }
            Ok::<_, StorageError>(())
        })
        .unwrap();

        let read = repo.begin_read().unwrap();
        let names: Vec<String> = Query::<Board>::all()
            .filter(|b| b.has_subscriptions)
            .order_by(|b| b.name.clone(), Order::Descending)
            .run(&read)
            .unwrap()
            .map(|b| b.name.to_string())
            .collect();
        assert_eq!(names, vec!["b", "a"]);

        let by_seen: Vec<String> = read
            .query(
                &Query::<SubscribedBoard>::prefix(SubscribedBoard::subscriber_prefix(&alice))
                    .order_by(|s| s.first_seen, Order::Ascending),
            )
            .unwrap()
            .map(|s| s.name.to_string())
            .collect();
        assert_eq!(by_seen, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_injected_fault_fails_matching_write_once() {
        let repo = InMemoryRepository::new();
        repo.fail_writes(1, |op| op.kind == WriteKind::Put && op.key == "b");

        let result = transact(&repo, |txn| {
            txn.put(&board("a"))?;
            txn.put(&board("b"))
        });
        assert!(result.is_err());
        assert_eq!(repo.count(Table::Boards), 0);

        transact(&repo, |txn| {
            txn.put(&board("a"))?;
            txn.put(&board("b"))
        })
        .unwrap();
        assert_eq!(repo.count(Table::Boards), 2);
    }

    #[test]
    fn test_cursor_is_exact_size() {
        let cursor = Cursor::new(vec![1, 2, 3]);
        assert_eq!(cursor.len(), 3);
        assert_eq!(Cursor::<u8>::empty().count(), 0);
    }
}
