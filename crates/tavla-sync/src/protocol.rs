use tavla_core::{
    ContentUri, CoreError, FetchFailureReason, IdentityId, ListUri, Message, MessageId,
    MessageList, MessageListId, MessageReference, OwnMessageList,
};

/// Outcome of handing fetched data to the manager.
///
/// Ingestion never returns an error: the network layer retries on its own
/// schedule, so a failed attempt is reported and rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// New data was committed.
    Stored,
    /// Already known; nothing changed.
    Duplicate,
    /// Stale, unwanted or invalid; nothing changed.
    Ignored,
    /// The transaction failed and was rolled back.
    RolledBack,
}

impl Ingest {
    pub fn is_stored(self) -> bool {
        self == Ingest::Stored
    }
}

/// Callbacks from the network fetch worker.
pub trait FetchCallbacks: Send + Sync {
    fn on_message_received(&self, message: Message) -> Ingest;

    fn on_message_list_received(&self, list: MessageList) -> Ingest;

    fn on_message_fetch_failed(
        &self,
        reference: &MessageReference,
        reason: FetchFailureReason,
    ) -> Ingest;

    fn on_message_list_fetch_failed(
        &self,
        author: &IdentityId,
        uri: &ListUri,
        reason: FetchFailureReason,
    ) -> Ingest;
}

/// Callbacks from the network insert worker.
pub trait InsertCallbacks: Send + Sync {
    /// Lock a list for insertion and return what to publish.
    fn begin_list_insert(&self, list_id: &MessageListId) -> Result<OwnMessageList, CoreError>;

    fn on_message_list_insert_succeeded(&self, uri: &ListUri) -> Result<(), CoreError>;

    /// `collision` means another list already exists at the target index.
    fn on_message_list_insert_failed(&self, uri: &ListUri, collision: bool)
        -> Result<(), CoreError>;

    fn on_own_message_inserted(&self, id: &MessageId, real_uri: ContentUri)
        -> Result<(), CoreError>;
}
