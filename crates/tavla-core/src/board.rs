use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BoardName, IdentityId, MessageId};

/// A board is created the first time anything refers to it and is never
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub name: BoardName,
    pub first_seen: DateTime<Utc>,
    /// OR over all [`SubscribedBoard`] rows with this name.
    pub has_subscriptions: bool,
    next_message_index: u64,
}

impl Board {
    pub fn new(name: BoardName, first_seen: DateTime<Utc>) -> Self {
        Self {
            name,
            first_seen,
            has_subscriptions: false,
            next_message_index: 1,
        }
    }

    /// Hands out the next per-board message index.
    pub fn take_message_index(&mut self) -> u64 {
        let index = self.next_message_index;
        self.next_message_index += 1;
        index
    }
}

/// A message as it appears in one board's live view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardMessageLink {
    pub board: BoardName,
    pub message_id: MessageId,
    pub index: u64,
    pub author: IdentityId,
    pub thread_id: MessageId,
    pub date: DateTime<Utc>,
}

impl BoardMessageLink {
    pub fn board_prefix(board: &BoardName) -> String {
        format!("{}|", board)
    }
}

/// A board as seen by one own identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedBoard {
    pub subscriber: IdentityId,
    pub name: BoardName,
    pub first_seen: DateTime<Utc>,
    pub subscribed_at: DateTime<Utc>,
}

impl SubscribedBoard {
    pub fn new(subscriber: IdentityId, board: &Board, subscribed_at: DateTime<Utc>) -> Self {
        Self {
            subscriber,
            name: board.name.clone(),
            first_seen: board.first_seen,
            subscribed_at,
        }
    }

    pub fn subscriber_prefix(subscriber: &IdentityId) -> String {
        format!("{}|", subscriber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_indices_are_sequential() {
        let mut board = Board::new(BoardName::new("test").unwrap(), Utc::now());
        assert_eq!(board.take_message_index(), 1);
        assert_eq!(board.take_message_index(), 2);
        assert_eq!(board.take_message_index(), 3);
    }

    #[test]
    fn test_subscription_copies_first_seen() {
        let seen = Utc::now() - chrono::Duration::days(3);
        let board = Board::new(BoardName::new("test").unwrap(), seen);
        let sub = SubscribedBoard::new(IdentityId::new("alice").unwrap(), &board, Utc::now());
        assert_eq!(sub.first_seen, seen);
        assert_eq!(sub.name, board.name);
    }
}
