use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{BoardName, ContentUri, IdentityId, ListUri, MessageId, MessageListId};
use crate::message::FetchFailureReason;

/// One line of a fetched message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub message_id: MessageId,
    pub uri: ContentUri,
    pub board: BoardName,
    pub date: DateTime<Utc>,
}

/// A message list fetched from the network. Its entries are immutable;
/// per-entry download state lives in [`MessageReference`] records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageList {
    pub id: MessageListId,
    pub uri: ListUri,
    pub entries: Vec<ListEntry>,
}

impl MessageList {
    pub fn author(&self) -> &IdentityId {
        &self.id.author
    }

    pub fn references(&self) -> impl Iterator<Item = MessageReference> + '_ {
        self.entries.iter().map(|entry| MessageReference {
            message_id: entry.message_id.clone(),
            list_id: self.id.clone(),
            uri: entry.uri.clone(),
            board: entry.board.clone(),
            date: entry.date,
            downloaded: false,
        })
    }
}

/// A list entry stored on its own so it can be found by message ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReference {
    pub message_id: MessageId,
    pub list_id: MessageListId,
    pub uri: ContentUri,
    pub board: BoardName,
    pub date: DateTime<Utc>,
    pub downloaded: bool,
}

impl MessageReference {
    /// Prefix shared by every reference to `message_id`.
    pub fn message_prefix(message_id: &MessageId) -> String {
        format!("{}|", message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnMessageReference {
    pub message_id: MessageId,
    pub uri: ContentUri,
    pub boards: BTreeSet<BoardName>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationState {
    Unstarted,
    Locked,
    Inserted,
}

/// A batch of own messages waiting to be published as one list.
///
/// `Unstarted -> Locked -> Inserted` is the only path to the terminal
/// state. A failed insert returns the list to `Unstarted`, possibly at a
/// new index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnMessageList {
    pub id: MessageListId,
    references: Vec<OwnMessageReference>,
    being_inserted: bool,
    inserted: bool,
}

impl OwnMessageList {
    pub const CAPACITY: usize = 256;

    pub fn new(id: MessageListId) -> Self {
        Self {
            id,
            references: Vec::new(),
            being_inserted: false,
            inserted: false,
        }
    }

    pub fn author(&self) -> &IdentityId {
        &self.id.author
    }

    pub fn uri(&self) -> ListUri {
        self.id.uri()
    }

    pub fn references(&self) -> &[OwnMessageReference] {
        &self.references
    }

    pub fn state(&self) -> PublicationState {
        if self.inserted {
            PublicationState::Inserted
        } else if self.being_inserted {
            PublicationState::Locked
        } else {
            PublicationState::Unstarted
        }
    }

    pub fn is_being_inserted(&self) -> bool {
        self.being_inserted
    }

    pub fn is_inserted(&self) -> bool {
        self.inserted
    }

    /// Still accepts new messages.
    pub fn is_open(&self) -> bool {
        self.state() == PublicationState::Unstarted && self.references.len() < Self::CAPACITY
    }

    pub fn add_message(&mut self, reference: OwnMessageReference) -> Result<(), CoreError> {
        if !self.is_open() {
            return Err(self.invalid("list is not open for new messages"));
        }
        self.references.push(reference);
        Ok(())
    }

    pub fn begin_insert(&mut self) -> Result<(), CoreError> {
        match self.state() {
            PublicationState::Unstarted => {
                self.being_inserted = true;
                Ok(())
            }
            PublicationState::Locked => Err(self.invalid("insert already started")),
            PublicationState::Inserted => Err(self.invalid("list was already inserted")),
        }
    }

    /// Returns `false` when the list was already inserted.
    pub fn mark_inserted(&mut self) -> Result<bool, CoreError> {
        match self.state() {
            PublicationState::Inserted => Ok(false),
            PublicationState::Locked => {
                self.being_inserted = false;
                self.inserted = true;
                Ok(true)
            }
            PublicationState::Unstarted => Err(self.invalid("insert was not started")),
        }
    }

    pub fn cancel_insert(&mut self) -> Result<(), CoreError> {
        match self.state() {
            PublicationState::Locked => {
                self.being_inserted = false;
                Ok(())
            }
            PublicationState::Inserted => Err(self.invalid("list was already inserted")),
            PublicationState::Unstarted => Err(self.invalid("insert was not started")),
        }
    }

    /// Re-keys the list after a collision. Only unlocked lists can move.
    pub fn move_to_index(&mut self, index: u64) -> Result<(), CoreError> {
        if self.state() != PublicationState::Unstarted {
            return Err(self.invalid("only an unstarted list can be moved"));
        }
        self.id.index = index;
        Ok(())
    }

    fn invalid(&self, reason: &'static str) -> CoreError {
        CoreError::InvalidState {
            id: self.id.to_string(),
            reason,
        }
    }
}

/// Tombstone for a message list that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFetchFailedMarker {
    pub list_id: MessageListId,
    pub uri: ListUri,
    pub reason: FetchFailureReason,
    pub date: DateTime<Utc>,
}
