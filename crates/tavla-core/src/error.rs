use thiserror::Error;

use crate::ids::{IdentityId, MessageListId};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Duplicate {kind}: {id}")]
    Duplicate { kind: &'static str, id: String },

    #[error("Invalid state of {id}: {reason}")]
    InvalidState { id: String, reason: &'static str },

    #[error("Message list {list} of {author} is already being inserted")]
    InsertInProgress {
        author: IdentityId,
        list: MessageListId,
    },

    #[error("Task failed: {0}")]
    Task(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CoreError::Duplicate { .. })
    }
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Duplicate { table, key } => CoreError::Duplicate {
                kind: table,
                id: key,
            },
            other => CoreError::Storage(other),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Invalid identity id: {0:?}")]
    InvalidIdentityId(String),

    #[error("Invalid message id: {0:?}")]
    InvalidMessageId(String),

    #[error("Message id {id} does not belong to author {author}")]
    ForeignMessageId { id: String, author: String },

    #[error("Invalid board name: {0:?}")]
    InvalidBoardName(String),

    #[error("Title must not be empty")]
    EmptyTitle,

    #[error("Title too long: {0} characters (max 256)")]
    TitleTooLong(usize),

    #[error("Text must not be empty")]
    EmptyText,

    #[error("Text too long: {0} bytes (max 65536)")]
    TextTooLong(usize),

    #[error("A message must be posted to at least one board")]
    NoBoards,

    #[error("Too many boards: {0} (max 16)")]
    TooManyBoards(usize),

    #[error("Reply-to board {0} is not one of the target boards")]
    ReplyToBoardNotTargeted(String),

    #[error("Too many attachments: {0} (max 256)")]
    TooManyAttachments(usize),

    #[error("Invalid message list uri: {0:?}")]
    InvalidListUri(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Codec error in table {table}: {message}")]
    Codec {
        table: &'static str,
        message: String,
    },

    #[error("Duplicate key in table {table}: {key}")]
    Duplicate { table: &'static str, key: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_storage_error_becomes_duplicate_core_error() {
        let err: CoreError = StorageError::Duplicate {
            table: "fetch_failed_markers",
            key: "alice@1".to_string(),
        }
        .into();

        assert!(err.is_duplicate());
        assert_eq!(
            err.to_string(),
            "Duplicate fetch_failed_markers: alice@1"
        );
    }

    #[test]
    fn test_database_error_stays_storage_error() {
        let err: CoreError = StorageError::Database("disk full".to_string()).into();
        assert!(matches!(err, CoreError::Storage(StorageError::Database(_))));
    }
}
