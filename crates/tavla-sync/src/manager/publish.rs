use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, info};

use tavla_core::{
    transact, Attachment, BoardName, ContentUri, CoreError, Cursor, IdentityId, IdentityProvider,
    ListUri, Message, MessageContent, MessageFactory, MessageId, MessageList, MessageListId,
    OwnIdentity, OwnMessage, OwnMessageList, OwnMessageReference, PublicationState, Query,
    ReadTxn, ReadTxnExt, Repository, Validator, WriteTxnExt,
};

use super::boards::get_or_create_board_in;
use super::queries::MessageQueries;
use super::{ManagerGuard, MessageManager};

/// A message as submitted by a local author, before validation.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub author: IdentityId,
    pub parent: Option<MessageId>,
    pub boards: Vec<String>,
    pub reply_to_board: Option<String>,
    pub title: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl MessageDraft {
    pub fn new(author: IdentityId, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author,
            parent: None,
            boards: Vec::new(),
            reply_to_board: None,
            title: title.into(),
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn board(mut self, name: impl Into<String>) -> Self {
        self.boards.push(name.into());
        self
    }

    pub fn reply_to(mut self, parent: MessageId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn reply_to_board(mut self, name: impl Into<String>) -> Self {
        self.reply_to_board = Some(name.into());
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Every list index the author has used, published or not.
fn used_list_indices<T: ReadTxn>(txn: &T, author: &IdentityId) -> Result<Vec<u64>, CoreError> {
    let prefix = MessageListId::author_prefix(author);
    let mut used: Vec<u64> = txn
        .scan_prefix::<OwnMessageList>(&prefix)?
        .into_iter()
        .map(|l| l.id.index)
        .collect();
    used.extend(
        txn.scan_prefix::<MessageList>(&prefix)?
            .into_iter()
            .map(|l| l.id.index),
    );
    Ok(used)
}

/// Thread of the message being replied to.
fn thread_of_parent<T: ReadTxn>(txn: &T, parent: &MessageId) -> Result<MessageId, CoreError> {
    if let Some(message) = txn.get::<Message>(parent.as_str())? {
        return Ok(message.content.thread_of(&message.id).clone());
    }
    if let Some(own) = txn.get::<OwnMessage>(parent.as_str())? {
        return Ok(own.content.thread_of(&own.id).clone());
    }
    Err(CoreError::not_found("parent message", parent))
}

fn own_list_not_found(id: &MessageListId) -> CoreError {
    CoreError::not_found("own message list", id)
}

impl<R, I, F> ManagerGuard<'_, R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    fn store_own_message(
        &self,
        author: &OwnIdentity,
        mut content: MessageContent,
    ) -> Result<OwnMessage, CoreError> {
        let factory = self.factory();
        transact(self.repo(), |txn| -> Result<OwnMessage, CoreError> {
            if let Some(parent) = &content.parent_id {
                content.thread_id = Some(thread_of_parent(txn, parent)?);
            }
            for name in &content.boards {
                get_or_create_board_in(txn, name)?;
            }
            let message = factory.construct(author, content)?;
            message.id.verify_author(&author.id)?;
            txn.insert(&message)?;
            Ok(message)
        })
    }

    /// Lock an own message list for insertion.
    ///
    /// The caller holds the monitor for as long as it reads the list, so
    /// the snapshot it publishes is the one that was locked.
    pub fn on_message_list_insert_started(&self, list_id: &MessageListId) -> Result<(), CoreError> {
        transact(self.repo(), |txn| -> Result<(), CoreError> {
            let mut list = txn
                .get::<OwnMessageList>(&list_id.key())?
                .ok_or_else(|| own_list_not_found(list_id))?;
            list.begin_insert()?;

            let prefix = MessageListId::author_prefix(list.author());
            if let Some(other) = txn
                .scan_prefix::<OwnMessageList>(&prefix)?
                .into_iter()
                .find(|l| l.id != list.id && l.is_being_inserted())
            {
                return Err(CoreError::InsertInProgress {
                    author: list.author().clone(),
                    list: other.id,
                });
            }

            txn.put(&list)?;
            Ok(())
        })?;
        debug!(list = %list_id, "Message list insert started");
        Ok(())
    }

    fn finish_list_insert(&self, list_id: &MessageListId) -> Result<bool, CoreError> {
        transact(self.repo(), |txn| -> Result<bool, CoreError> {
            let mut list = txn
                .get::<OwnMessageList>(&list_id.key())?
                .ok_or_else(|| own_list_not_found(list_id))?;
            if !list.mark_inserted()? {
                return Ok(false);
            }
            txn.put(&list)?;
            Ok(true)
        })
    }

    fn abort_list_insert(&self, list_id: &MessageListId, collision: bool) -> Result<u64, CoreError> {
        let factory = self.factory();
        transact(self.repo(), |txn| -> Result<u64, CoreError> {
            let mut list = txn
                .get::<OwnMessageList>(&list_id.key())?
                .ok_or_else(|| own_list_not_found(list_id))?;
            list.cancel_insert()?;

            if collision {
                let used = used_list_indices(txn, list.author())?;
                let index = factory.index_after_collision(list.id.index, &used);
                txn.remove(&list)?;
                list.move_to_index(index)?;
                txn.insert(&list)?;
            } else {
                txn.put(&list)?;
            }
            Ok(list.id.index)
        })
    }

    fn record_own_message_insert(&self, id: &MessageId, real_uri: ContentUri) -> Result<bool, CoreError> {
        transact(self.repo(), |txn| -> Result<bool, CoreError> {
            let mut own = txn
                .get::<OwnMessage>(id.as_str())?
                .ok_or_else(|| CoreError::not_found("own message", id))?;
            if own.real_uri.is_some() {
                return Ok(false);
            }
            own.real_uri = Some(real_uri.clone());
            txn.put(&own)?;

            let open = txn
                .scan_prefix::<OwnMessageList>(&MessageListId::author_prefix(&own.author))?
                .into_iter()
                .find(|l| l.is_open());
            let mut list = match open {
                Some(list) => list,
                None => {
                    let used = used_list_indices(txn, &own.author)?;
                    let index = used.iter().max().map_or(0, |max| max + 1);
                    OwnMessageList::new(MessageListId::new(own.author.clone(), index))
                }
            };
            list.add_message(OwnMessageReference {
                message_id: own.id.clone(),
                uri: real_uri,
                boards: own.content.boards.clone(),
                date: own.content.date,
            })?;
            txn.put(&list)?;
            Ok(true)
        })
    }
}

impl<R, I, F> MessageManager<R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    /// Validate a draft and store it as an unpublished own message.
    pub fn post_message(&self, draft: MessageDraft) -> Result<OwnMessage, CoreError> {
        let author = self.identities.get_own_identity(&draft.author)?;

        let boards = draft
            .boards
            .iter()
            .map(|name| BoardName::new(name))
            .collect::<Result<BTreeSet<_>, _>>()?;
        let reply_to_board = draft
            .reply_to_board
            .as_deref()
            .map(BoardName::new)
            .transpose()?;

        let content = MessageContent {
            thread_id: None,
            parent_id: draft.parent,
            boards,
            reply_to_board,
            title: draft.title,
            text: draft.text,
            date: Utc::now(),
            attachments: draft.attachments,
        };
        Validator::validate_content(&content)?;

        let message = self.lock().store_own_message(&author, content)?;
        info!(message = %message.id, author = %author.id, "Posted message");
        Ok(message)
    }

    /// Mark a list started and return the locked snapshot, under one
    /// acquisition of the monitor.
    pub fn begin_list_insert(&self, list_id: &MessageListId) -> Result<OwnMessageList, CoreError> {
        let guard = self.lock();
        guard.on_message_list_insert_started(list_id)?;
        guard.get_own_message_list(list_id)
    }

    pub fn on_message_list_insert_succeeded(&self, uri: &ListUri) -> Result<(), CoreError> {
        let list_id = uri.list_id()?;
        if self.lock().finish_list_insert(&list_id)? {
            info!(list = %list_id, "Message list inserted");
        } else {
            debug!(list = %list_id, "Message list was already inserted");
        }
        Ok(())
    }

    /// Unlock a list after a failed insert. On a collision the list moves
    /// to a fresh index and keeps its messages.
    pub fn on_message_list_insert_failed(&self, uri: &ListUri, collision: bool) -> Result<(), CoreError> {
        let list_id = uri.list_id()?;
        let index = self.lock().abort_list_insert(&list_id, collision)?;
        if collision {
            info!(list = %list_id, new_index = index, "Message list collided, moved");
        } else {
            debug!(list = %list_id, "Message list insert failed, will retry");
        }
        Ok(())
    }

    /// Record the network URI of an own message and queue it for the
    /// author's next message list.
    pub fn on_own_message_inserted(&self, id: &MessageId, real_uri: ContentUri) -> Result<(), CoreError> {
        if self.lock().record_own_message_insert(id, real_uri)? {
            debug!(message = %id, "Own message inserted");
        }
        Ok(())
    }

    /// Own lists that wait for the insert worker.
    pub fn lists_awaiting_insert(&self) -> Result<Cursor<OwnMessageList>, CoreError> {
        let read = self.repo.begin_read()?;
        Ok(Query::<OwnMessageList>::all()
            .filter(|l| l.state() == PublicationState::Unstarted && !l.references().is_empty())
            .run(&read)?)
    }

    /// Own messages not yet inserted plus messages in lists not yet inserted.
    pub fn count_unsent_messages(&self) -> Result<usize, CoreError> {
        let read = self.repo.begin_read()?;
        let unsent_messages = Query::<OwnMessage>::all()
            .filter(|m| !m.is_inserted())
            .run(&read)?
            .len();
        let unsent_in_lists: usize = Query::<OwnMessageList>::all()
            .filter(|l| !l.is_inserted())
            .run(&read)?
            .map(|l| l.references().len())
            .sum();
        Ok(unsent_messages + unsent_in_lists)
    }
}
