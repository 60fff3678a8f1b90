use chrono::Utc;
use tracing::{debug, info, warn};

use tavla_core::sync;
use tavla_core::{
    transact, Board, BoardMessageLink, BoardName, CoreError, IdentityId, IdentityProvider,
    Message, MessageFactory, Query, ReadTxn, ReadTxnExt, Repository, SubscribedBoard, WriteTxn,
    WriteTxnExt,
};

use super::{ManagerGuard, MessageManager};
use crate::locking::EntityLocks;

/// Look a board up inside a write transaction, creating it if missing.
pub(super) fn get_or_create_board_in<W: WriteTxn>(
    txn: &mut W,
    name: &BoardName,
) -> Result<Board, CoreError> {
    if let Some(board) = txn.get::<Board>(name.as_str())? {
        return Ok(board);
    }
    let board = Board::new(name.clone(), Utc::now());
    txn.insert(&board)?;
    info!(board = %name, "Created board");
    Ok(board)
}

pub(super) fn require_board<T: ReadTxn>(txn: &T, name: &BoardName) -> Result<Board, CoreError> {
    txn.get::<Board>(name.as_str())?
        .ok_or_else(|| CoreError::not_found("board", name))
}

/// True while any own identity is still subscribed to `name`.
pub(super) fn has_subscribers<T: ReadTxn>(txn: &T, name: &BoardName) -> Result<bool, CoreError> {
    let name = name.clone();
    let mut remaining = Query::<SubscribedBoard>::all()
        .filter(move |s| s.name == name)
        .limit(1)
        .run(txn)?;
    Ok(remaining.next().is_some())
}

/// Attach a message to one board's live view. Returns `false` if it was
/// already attached.
fn attach_message<W: WriteTxn>(
    txn: &mut W,
    locks: &EntityLocks,
    board: &mut Board,
    message: &Message,
) -> Result<bool, CoreError> {
    let board_lock = locks.board(&board.name);
    let _message_lock = board_lock.message(&message.id);

    let link_key = format!(
        "{}{}",
        BoardMessageLink::board_prefix(&board.name),
        message.id
    );
    if txn.contains::<BoardMessageLink>(&link_key)? {
        return Ok(false);
    }

    let link = BoardMessageLink {
        board: board.name.clone(),
        message_id: message.id.clone(),
        index: board.take_message_index(),
        author: message.author.clone(),
        thread_id: message.content.thread_of(&message.id).clone(),
        date: message.content.date,
    };
    txn.put(&link)?;
    txn.put(&*board)?;
    Ok(true)
}

impl<R, I, F> ManagerGuard<'_, R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    /// Case-folds and validates `name`, then returns the board with that
    /// name, creating it if needed.
    pub fn get_or_create_board(&self, name: &str) -> Result<Board, CoreError> {
        let name = BoardName::new(name)?;
        transact(self.repo(), |txn| get_or_create_board_in(txn, &name))
    }

    fn link_into_board(&self, message: &Message, name: &BoardName) -> Result<bool, CoreError> {
        let locks = self.locks();
        transact(self.repo(), |txn| -> Result<bool, CoreError> {
            // Deleted with its author since the pass took its snapshot
            if !txn.contains::<Message>(message.id.as_str())? {
                return Ok(false);
            }
            let mut board = get_or_create_board_in(txn, name)?;
            attach_message(txn, locks, &mut board, message)
        })
    }

    /// Returns `false` if the message is gone, e.g. deleted with its author.
    fn mark_linked_in(&self, message: &Message) -> Result<bool, CoreError> {
        let locks = self.locks();
        transact(self.repo(), |txn| -> Result<bool, CoreError> {
            let _message_lock = locks.message(&message.id);
            let Some(mut stored) = txn.get::<Message>(message.id.as_str())? else {
                return Ok(false);
            };
            stored.mark_linked_in();
            txn.put(&stored)?;
            Ok(true)
        })
    }

    fn subscribe(&self, subscriber: &IdentityId, name: &BoardName) -> Result<SubscribedBoard, CoreError> {
        transact(self.repo(), |txn| -> Result<SubscribedBoard, CoreError> {
            let mut board = get_or_create_board_in(txn, name)?;
            let key = format!("{}{}", SubscribedBoard::subscriber_prefix(subscriber), name);
            if let Some(existing) = txn.get::<SubscribedBoard>(&key)? {
                return Ok(existing);
            }

            let subscription = SubscribedBoard::new(subscriber.clone(), &board, Utc::now());
            txn.insert(&subscription)?;
            if !board.has_subscriptions {
                board.has_subscriptions = true;
                txn.put(&board)?;
            }
            Ok(subscription)
        })
    }

    fn unsubscribe(&self, subscriber: &IdentityId, name: &BoardName) -> Result<(), CoreError> {
        transact(self.repo(), |txn| -> Result<(), CoreError> {
            let key = format!("{}{}", SubscribedBoard::subscriber_prefix(subscriber), name);
            if !txn.delete::<SubscribedBoard>(&key)? {
                return Err(CoreError::not_found("subscription", key));
            }
            if !has_subscribers(txn, name)? {
                let mut board = require_board(txn, name)?;
                board.has_subscriptions = false;
                txn.put(&board)?;
            }
            Ok(())
        })
    }
}

impl<R, I, F> MessageManager<R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    pub fn get_or_create_board(&self, name: &str) -> Result<Board, CoreError> {
        self.lock().get_or_create_board(name)
    }

    /// Subscribe an own identity to a board, creating the board if it was
    /// never seen. Subscribing twice returns the existing subscription.
    pub fn subscribe_to_board(
        &self,
        subscriber: &IdentityId,
        name: &str,
    ) -> Result<SubscribedBoard, CoreError> {
        let name = BoardName::new(name)?;
        let _provider = sync::lock(self.identities.monitor());
        let own = self.identities.get_own_identity(subscriber)?;

        let subscription = self.lock().subscribe(&own.id, &name)?;
        debug!(subscriber = %own.id, board = %name, "Subscribed to board");
        Ok(subscription)
    }

    pub fn unsubscribe_from_board(&self, subscriber: &IdentityId, name: &str) -> Result<(), CoreError> {
        let name = BoardName::new(name)?;
        let _provider = sync::lock(self.identities.monitor());
        let own = self.identities.get_own_identity(subscriber)?;

        self.lock().unsubscribe(&own.id, &name)?;
        debug!(subscriber = %own.id, board = %name, "Unsubscribed from board");
        Ok(())
    }

    /// Attach every stored message that is not linked in yet to each of its
    /// boards. Each board is attached in its own transaction; a message is
    /// only marked linked in once all of them succeeded, so a partial
    /// failure is retried on the next pass. Returns the number of messages
    /// linked.
    pub fn add_messages_to_boards(&self) -> Result<usize, CoreError> {
        let pending: Vec<Message> = {
            let read = self.repo.begin_read()?;
            Query::<Message>::all()
                .filter(|m| !m.is_linked_in())
                .run(&read)?
                .collect()
        };

        let mut linked = 0;
        for message in pending {
            let mut complete = true;
            for name in &message.content.boards {
                if let Err(e) = self.lock().link_into_board(&message, name) {
                    warn!(message = %message.id, board = %name, error = %e, "Failed to add message to board");
                    complete = false;
                }
            }
            if !complete {
                continue;
            }

            match self.lock().mark_linked_in(&message) {
                Ok(true) => linked += 1,
                Ok(false) => debug!(message = %message.id, "Message vanished before linking finished"),
                Err(e) => warn!(message = %message.id, error = %e, "Failed to mark message as linked"),
            }
        }
        Ok(linked)
    }
}
