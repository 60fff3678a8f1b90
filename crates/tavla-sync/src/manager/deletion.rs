use std::collections::BTreeSet;

use tracing::{error, info};

use tavla_core::{
    transact, BoardMessageLink, BoardName, CoreError, FetchFailedMarker, Identity,
    IdentityProvider, ListFetchFailedMarker, Message, MessageFactory, MessageList, MessageListId,
    MessageReference, OwnMessage, OwnMessageList, ReadTxnExt, Repository, SubscribedBoard,
    WriteTxn, WriteTxnExt,
};

use super::boards::{has_subscribers, require_board};
use super::{ManagerGuard, MessageManager};
use crate::locking::EntityLocks;

/// What one identity deletion removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeletionStats {
    pub messages: usize,
    pub board_links: usize,
    pub message_lists: usize,
    pub references: usize,
    pub own_messages: usize,
    pub own_message_lists: usize,
    pub subscriptions: usize,
}

fn delete_messages<W: WriteTxn>(
    txn: &mut W,
    locks: &EntityLocks,
    identity: &Identity,
    stats: &mut DeletionStats,
) -> Result<(), CoreError> {
    let prefix = format!("{}@", identity.id);
    for message in txn.scan_prefix::<Message>(&prefix)? {
        // Out of every board's live view first
        for name in &message.content.boards {
            let board_lock = locks.board(name);
            let _message_lock = board_lock.message(&message.id);
            let key = format!("{}{}", BoardMessageLink::board_prefix(name), message.id);
            if txn.delete::<BoardMessageLink>(&key)? {
                stats.board_links += 1;
            }
        }
        txn.remove(&message)?;
        stats.messages += 1;
    }

    for marker in txn.scan_prefix::<FetchFailedMarker>(&prefix)? {
        txn.remove(&marker)?;
    }
    Ok(())
}

fn delete_message_lists<W: WriteTxn>(
    txn: &mut W,
    identity: &Identity,
    stats: &mut DeletionStats,
) -> Result<(), CoreError> {
    let prefix = MessageListId::author_prefix(&identity.id);
    for list in txn.scan_prefix::<MessageList>(&prefix)? {
        for reference in list.references() {
            if txn.remove(&reference)? {
                stats.references += 1;
            }
        }
        txn.remove(&list)?;
        stats.message_lists += 1;
    }

    for marker in txn.scan_prefix::<ListFetchFailedMarker>(&prefix)? {
        txn.remove(&marker)?;
    }
    Ok(())
}

fn delete_own_content<W: WriteTxn>(
    txn: &mut W,
    identity: &Identity,
    stats: &mut DeletionStats,
) -> Result<(), CoreError> {
    for own in txn.scan_prefix::<OwnMessage>(&format!("{}@", identity.id))? {
        txn.remove(&own)?;
        stats.own_messages += 1;
    }

    for list in txn.scan_prefix::<OwnMessageList>(&MessageListId::author_prefix(&identity.id))? {
        txn.remove(&list)?;
        stats.own_message_lists += 1;
    }

    let mut affected: BTreeSet<BoardName> = BTreeSet::new();
    for subscription in
        txn.scan_prefix::<SubscribedBoard>(&SubscribedBoard::subscriber_prefix(&identity.id))?
    {
        txn.remove(&subscription)?;
        affected.insert(subscription.name);
        stats.subscriptions += 1;
    }

    for name in affected {
        if !has_subscribers(txn, &name)? {
            let mut board = require_board(txn, &name)?;
            board.has_subscriptions = false;
            txn.put(&board)?;
        }
    }
    Ok(())
}

impl<R, I, F> ManagerGuard<'_, R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    fn delete_identity_content(&self, identity: &Identity) -> Result<DeletionStats, CoreError> {
        let locks = self.locks();
        transact(self.repo(), |txn| -> Result<DeletionStats, CoreError> {
            let mut stats = DeletionStats::default();
            delete_messages(txn, locks, identity, &mut stats)?;
            delete_message_lists(txn, identity, &mut stats)?;
            if identity.own {
                delete_own_content(txn, identity, &mut stats)?;
            }
            Ok(stats)
        })
    }
}

impl<R, I, F> MessageManager<R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    /// Remove everything authored by `identity`, in one transaction. On
    /// failure nothing is removed and the error is returned.
    pub fn on_identity_deletion(&self, identity: &Identity) -> Result<(), CoreError> {
        match self.lock().delete_identity_content(identity) {
            Ok(stats) => {
                info!(identity = %identity.id, ?stats, "Deleted content of identity");
                Ok(())
            }
            Err(e) => {
                error!(identity = %identity.id, error = %e, "Identity deletion rolled back");
                Err(e)
            }
        }
    }
}
