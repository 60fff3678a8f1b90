use chrono::Utc;
use tracing::{debug, error, warn};

use tavla_core::{
    transact, CoreError, FetchFailedMarker, FetchFailureReason, IdentityId, IdentityProvider,
    ListFetchFailedMarker, ListUri, Message, MessageFactory, MessageId, MessageList, MessageReference,
    ReadTxnExt, Repository, Validator, WriteTxn, WriteTxnExt,
};

use super::{ManagerGuard, MessageManager};
use crate::protocol::Ingest;

/// Flip `downloaded` on every reference to `message_id`.
fn mark_references_downloaded<W: WriteTxn>(
    txn: &mut W,
    message_id: &MessageId,
) -> Result<usize, CoreError> {
    let mut flipped = 0;
    for mut reference in
        txn.scan_prefix::<MessageReference>(&MessageReference::message_prefix(message_id))?
    {
        if !reference.downloaded {
            reference.downloaded = true;
            txn.put(&reference)?;
            flipped += 1;
        }
    }
    Ok(flipped)
}

fn report(operation: &str, subject: &str, result: Result<Ingest, CoreError>) -> Ingest {
    match result {
        Ok(Ingest::Stored) => {
            debug!(subject, "{}: stored", operation);
            Ingest::Stored
        }
        Ok(outcome) => {
            debug!(subject, ?outcome, "{}: nothing to do", operation);
            outcome
        }
        Err(e) => {
            error!(subject, error = %e, "{}: rolled back", operation);
            Ingest::RolledBack
        }
    }
}

impl<R, I, F> ManagerGuard<'_, R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    fn store_message(&self, message: &Message) -> Result<Ingest, CoreError> {
        transact(self.repo(), |txn| -> Result<Ingest, CoreError> {
            if txn.contains::<Message>(message.id.as_str())? {
                return Ok(Ingest::Duplicate);
            }
            txn.insert(message)?;
            mark_references_downloaded(txn, &message.id)?;
            Ok(Ingest::Stored)
        })
    }

    fn store_message_list(&self, list: &MessageList) -> Result<Ingest, CoreError> {
        transact(self.repo(), |txn| -> Result<Ingest, CoreError> {
            let key = list.id.key();
            if txn.contains::<MessageList>(&key)? {
                return Ok(Ingest::Duplicate);
            }
            txn.insert(list)?;
            for mut reference in list.references() {
                let id = reference.message_id.as_str();
                reference.downloaded = txn.contains::<Message>(id)?
                    || txn.contains::<FetchFailedMarker>(id)?;
                txn.put(&reference)?;
            }
            // The list arrived after all
            txn.delete::<ListFetchFailedMarker>(&key)?;
            Ok(Ingest::Stored)
        })
    }

    fn store_fetch_failure(
        &self,
        reference: &MessageReference,
        reason: FetchFailureReason,
    ) -> Result<Ingest, CoreError> {
        transact(self.repo(), |txn| -> Result<Ingest, CoreError> {
            let id = &reference.message_id;
            if txn.contains::<Message>(id.as_str())? {
                return Ok(Ingest::Ignored);
            }
            txn.insert(&FetchFailedMarker {
                message_id: id.clone(),
                reason,
                date: Utc::now(),
            })?;
            mark_references_downloaded(txn, id)?;
            Ok(Ingest::Stored)
        })
    }

    fn store_list_fetch_failure(
        &self,
        uri: &ListUri,
        reason: FetchFailureReason,
    ) -> Result<Ingest, CoreError> {
        let list_id = uri.list_id()?;
        transact(self.repo(), |txn| -> Result<Ingest, CoreError> {
            let key = list_id.key();
            if txn.contains::<MessageList>(&key)? {
                return Ok(Ingest::Ignored);
            }
            if txn.contains::<ListFetchFailedMarker>(&key)? {
                return Ok(Ingest::Duplicate);
            }
            txn.insert(&ListFetchFailedMarker {
                list_id: list_id.clone(),
                uri: uri.clone(),
                reason,
                date: Utc::now(),
            })?;
            Ok(Ingest::Stored)
        })
    }
}

impl<R, I, F> MessageManager<R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    /// Store a fetched message, then link it into its boards.
    pub fn on_message_received(&self, message: Message) -> Ingest {
        if let Err(e) = Validator::validate_message(&message.id, &message.author, &message.content)
        {
            warn!(message = %message.id, error = %e, "Ignoring invalid message");
            return Ingest::Ignored;
        }

        let result = self.lock().store_message(&message);
        let outcome = report("on_message_received", message.id.as_str(), result);

        if outcome.is_stored() {
            if let Err(e) = self.add_messages_to_boards() {
                warn!(message = %message.id, error = %e, "Board linking after receive failed");
            }
        }
        outcome
    }

    /// Store a fetched message list and one reference record per entry.
    pub fn on_message_list_received(&self, list: MessageList) -> Ingest {
        let uri_matches = list.uri.list_id().is_ok_and(|id| id == list.id);
        let foreign = list
            .entries
            .iter()
            .find(|e| e.message_id.verify_author(list.author()).is_err());
        if !uri_matches || foreign.is_some() {
            warn!(list = %list.id, "Ignoring message list with foreign or mismatched entries");
            return Ingest::Ignored;
        }

        let subject = list.id.to_string();
        let result = self.lock().store_message_list(&list);
        report("on_message_list_received", &subject, result)
    }

    /// Tombstone a message that could not be fetched.
    ///
    /// `DataNotFound` is never tombstoned: the data may still appear later.
    pub fn on_message_fetch_failed(
        &self,
        reference: &MessageReference,
        reason: FetchFailureReason,
    ) -> Ingest {
        if reason == FetchFailureReason::DataNotFound {
            debug!(message = %reference.message_id, "Not marking message as failed: data not found");
            return Ingest::Ignored;
        }

        let result = self.lock().store_fetch_failure(reference, reason);
        report(
            "on_message_fetch_failed",
            reference.message_id.as_str(),
            result,
        )
    }

    pub fn on_message_list_fetch_failed(
        &self,
        author: &IdentityId,
        uri: &ListUri,
        reason: FetchFailureReason,
    ) -> Ingest {
        match uri.list_id() {
            Ok(id) if &id.author == author => {}
            _ => {
                warn!(%author, %uri, "Ignoring list fetch failure for foreign or invalid uri");
                return Ingest::Ignored;
            }
        }

        let result = self.lock().store_list_fetch_failure(uri, reason);
        report("on_message_list_fetch_failed", uri.as_str(), result)
    }
}
