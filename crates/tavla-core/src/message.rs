use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BoardName, ContentUri, IdentityId, MessageId, MessageListId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub uri: ContentUri,
    pub size: u64,
}

/// The part of a post shared by fetched and locally authored messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub thread_id: Option<MessageId>,
    pub parent_id: Option<MessageId>,
    pub boards: BTreeSet<BoardName>,
    pub reply_to_board: Option<BoardName>,
    pub title: String,
    pub text: String,
    pub date: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
}

impl MessageContent {
    pub fn is_thread(&self) -> bool {
        self.thread_id.is_none()
    }

    /// The thread this message belongs to; a thread root is its own thread.
    pub fn thread_of<'a>(&'a self, id: &'a MessageId) -> &'a MessageId {
        self.thread_id.as_ref().unwrap_or(id)
    }
}

/// A message fetched from the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub uri: ContentUri,
    pub list_id: MessageListId,
    pub author: IdentityId,
    pub content: MessageContent,
    linked_in: bool,
}

impl Message {
    pub fn new(
        id: MessageId,
        uri: ContentUri,
        list_id: MessageListId,
        author: IdentityId,
        content: MessageContent,
    ) -> Self {
        Self {
            id,
            uri,
            list_id,
            author,
            content,
            linked_in: false,
        }
    }

    /// True once the message has been attached to all of its boards.
    pub fn is_linked_in(&self) -> bool {
        self.linked_in
    }

    /// One-way transition; there is no way back.
    pub fn mark_linked_in(&mut self) {
        self.linked_in = true;
    }
}

/// A locally authored message. `real_uri` stays empty until the network
/// insert of the message itself succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnMessage {
    pub id: MessageId,
    pub author: IdentityId,
    pub content: MessageContent,
    pub insert_uri: ContentUri,
    pub real_uri: Option<ContentUri>,
}

impl OwnMessage {
    pub fn is_inserted(&self) -> bool {
        self.real_uri.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchFailureReason {
    DataNotFound,
    ParsingFailed,
    Unknown,
}

impl std::fmt::Display for FetchFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailureReason::DataNotFound => write!(f, "data not found"),
            FetchFailureReason::ParsingFailed => write!(f, "parsing failed"),
            FetchFailureReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// Tombstone for a message that could not be fetched. One per message ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailedMarker {
    pub message_id: MessageId,
    pub reason: FetchFailureReason,
    pub date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(thread: Option<&str>) -> MessageContent {
        MessageContent {
            thread_id: thread.map(|t| MessageId::parse(t).unwrap()),
            parent_id: None,
            boards: [BoardName::new("test").unwrap()].into_iter().collect(),
            reply_to_board: None,
            title: "Hello".to_string(),
            text: "World".to_string(),
            date: Utc::now(),
            attachments: vec![],
        }
    }

    #[test]
    fn test_thread_of_root_is_itself() {
        let id = MessageId::parse("alice@1").unwrap();
        let root = content(None);
        assert!(root.is_thread());
        assert_eq!(root.thread_of(&id), &id);

        let reply = content(Some("bob@7"));
        assert_eq!(reply.thread_of(&id).as_str(), "bob@7");
    }

    #[test]
    fn test_linked_in_is_monotonic() {
        let author = IdentityId::new("alice").unwrap();
        let mut msg = Message::new(
            MessageId::parse("alice@1").unwrap(),
            ContentUri::new("chk:1"),
            MessageListId::new(author.clone(), 0),
            author,
            content(None),
        );
        assert!(!msg.is_linked_in());
        msg.mark_linked_in();
        msg.mark_linked_in();
        assert!(msg.is_linked_in());
    }
}
