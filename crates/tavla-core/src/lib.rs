//! Tavla Core - Domain models, traits, and validation.
//!
//! This crate contains the forum domain: identities, messages, message
//! lists, boards, persistent tasks, and the transactional repository they
//! are stored in. It has no dependencies on other Tavla crates.

pub mod board;
pub mod error;
pub mod factory;
pub mod identity;
pub mod ids;
pub mod message;
pub mod message_list;
pub mod storage;
pub mod sync;
pub mod task;
pub mod validation;

// Re-exports for convenience
pub use board::{Board, BoardMessageLink, SubscribedBoard};
pub use error::{CoreError, StorageError, ValidationError};
pub use factory::{MessageFactory, UuidMessageFactory};
pub use identity::{
    Identity, IdentityDeletionListener, IdentityProvider, IdentityRegistry, OwnIdentity,
};
pub use ids::{BoardName, ContentUri, IdentityId, ListUri, MessageId, MessageListId, TaskId};
pub use message::{Attachment, FetchFailedMarker, FetchFailureReason, Message, MessageContent, OwnMessage};
pub use message_list::{
    ListEntry, ListFetchFailedMarker, MessageList, MessageReference, OwnMessageList,
    OwnMessageReference, PublicationState,
};
pub use storage::{
    transact, Cursor, Order, Query, ReadTxn, ReadTxnExt, Record, Repository, Table, WriteTxn,
    WriteTxnExt,
};
pub use task::PersistentTask;
pub use validation::Validator;

#[cfg(any(test, feature = "test-utils"))]
pub use factory::SequentialMessageFactory;
#[cfg(any(test, feature = "test-utils"))]
pub use storage::memory::{InMemoryRepository, WriteKind, WriteOp};
