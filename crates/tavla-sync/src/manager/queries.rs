use std::collections::HashSet;

use chrono::{DateTime, Utc};

use tavla_core::{
    Board, BoardMessageLink, BoardName, CoreError, Cursor, FetchFailedMarker, IdentityId,
    IdentityProvider, ListFetchFailedMarker, Message, MessageFactory, MessageId, MessageList,
    MessageListId, MessageReference, Order, OwnMessage, OwnMessageList, Query, ReadTxnExt, Record,
    Repository, SubscribedBoard,
};

use super::{ManagerGuard, MessageManager};

fn message_prefix(author: &IdentityId) -> String {
    format!("{}@", author)
}

/// Read-only views of the forum graph.
///
/// Every call reads one snapshot. Lookups fail with `NotFound`; listings
/// return a single-pass [`Cursor`].
pub trait MessageQueries {
    type Repo: Repository;

    fn repository(&self) -> &Self::Repo;

    fn get_message(&self, id: &MessageId) -> Result<Message, CoreError> {
        lookup(self.repository(), "message", id.as_str())
    }

    fn get_message_list(&self, id: &MessageListId) -> Result<MessageList, CoreError> {
        lookup(self.repository(), "message list", &id.key())
    }

    fn get_own_message(&self, id: &MessageId) -> Result<OwnMessage, CoreError> {
        lookup(self.repository(), "own message", id.as_str())
    }

    fn get_own_message_list(&self, id: &MessageListId) -> Result<OwnMessageList, CoreError> {
        lookup(self.repository(), "own message list", &id.key())
    }

    fn get_board_by_name(&self, name: &str) -> Result<Board, CoreError> {
        let name = BoardName::new(name)?;
        lookup(self.repository(), "board", name.as_str())
    }

    fn get_subscription(
        &self,
        subscriber: &IdentityId,
        name: &str,
    ) -> Result<SubscribedBoard, CoreError> {
        let name = BoardName::new(name)?;
        let key = format!("{}{}", SubscribedBoard::subscriber_prefix(subscriber), name);
        lookup(self.repository(), "subscription", &key)
    }

    fn get_fetch_failed_marker(&self, id: &MessageId) -> Result<FetchFailedMarker, CoreError> {
        lookup(self.repository(), "fetch failed marker", id.as_str())
    }

    fn get_list_fetch_failed_marker(
        &self,
        id: &MessageListId,
    ) -> Result<ListFetchFailedMarker, CoreError> {
        lookup(self.repository(), "list fetch failed marker", &id.key())
    }

    /// All boards, name descending.
    fn boards(&self) -> Result<Cursor<Board>, CoreError> {
        run(
            self.repository(),
            Query::all().order_by(|b: &Board| b.name.clone(), Order::Descending),
        )
    }

    fn boards_with_subscriptions(&self) -> Result<Cursor<Board>, CoreError> {
        run(
            self.repository(),
            Query::all().filter(|b: &Board| b.has_subscriptions),
        )
    }

    /// Boards of one subscriber, name descending.
    fn subscribed_boards(&self, subscriber: &IdentityId) -> Result<Cursor<SubscribedBoard>, CoreError> {
        run(
            self.repository(),
            Query::prefix(SubscribedBoard::subscriber_prefix(subscriber))
                .order_by(|s: &SubscribedBoard| s.name.clone(), Order::Descending),
        )
    }

    /// Boards of one subscriber first seen after `after`, oldest first.
    fn subscribed_boards_seen_after(
        &self,
        subscriber: &IdentityId,
        after: DateTime<Utc>,
    ) -> Result<Cursor<SubscribedBoard>, CoreError> {
        run(
            self.repository(),
            Query::prefix(SubscribedBoard::subscriber_prefix(subscriber))
                .filter(move |s: &SubscribedBoard| s.first_seen > after)
                .order_by(|s: &SubscribedBoard| s.first_seen, Order::Ascending),
        )
    }

    /// The live view of a board, by per-board index.
    fn board_messages(&self, name: &str) -> Result<Cursor<BoardMessageLink>, CoreError> {
        let name = BoardName::new(name)?;
        run(
            self.repository(),
            Query::prefix(BoardMessageLink::board_prefix(&name))
                .order_by(|l: &BoardMessageLink| l.index, Order::Ascending),
        )
    }

    fn messages_by(&self, author: &IdentityId) -> Result<Cursor<Message>, CoreError> {
        run(self.repository(), Query::prefix(message_prefix(author)))
    }

    fn own_messages_by(&self, author: &IdentityId) -> Result<Cursor<OwnMessage>, CoreError> {
        run(self.repository(), Query::prefix(message_prefix(author)))
    }

    fn message_lists_by(&self, author: &IdentityId) -> Result<Cursor<MessageList>, CoreError> {
        run(
            self.repository(),
            Query::prefix(MessageListId::author_prefix(author)),
        )
    }

    fn own_message_lists_by(&self, author: &IdentityId) -> Result<Cursor<OwnMessageList>, CoreError> {
        run(
            self.repository(),
            Query::prefix(MessageListId::author_prefix(author)),
        )
    }

    /// Own messages whose own insert has not succeeded yet.
    fn not_inserted_messages(&self) -> Result<Cursor<OwnMessage>, CoreError> {
        run(
            self.repository(),
            Query::all().filter(|m: &OwnMessage| !m.is_inserted()),
        )
    }

    /// References still to fetch, restricted to boards someone reads.
    fn not_downloaded_messages(&self) -> Result<Cursor<MessageReference>, CoreError> {
        let read = self.repository().begin_read()?;
        let subscribed: HashSet<BoardName> = Query::<Board>::all()
            .filter(|b| b.has_subscriptions)
            .run(&read)?
            .map(|b| b.name)
            .collect();
        Ok(Query::all()
            .filter(|r: &MessageReference| !r.downloaded)
            .filter(move |r: &MessageReference| subscribed.contains(&r.board))
            .run(&read)?)
    }
}

fn lookup<R: Repository, E: Record>(repo: &R, kind: &'static str, key: &str) -> Result<E, CoreError> {
    let read = repo.begin_read()?;
    read.get::<E>(key)?
        .ok_or_else(|| CoreError::not_found(kind, key))
}

fn run<R: Repository, E: Record>(repo: &R, query: Query<E>) -> Result<Cursor<E>, CoreError> {
    let read = repo.begin_read()?;
    Ok(query.run(&read)?)
}

impl<R, I, F> MessageQueries for MessageManager<R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    type Repo = R;

    fn repository(&self) -> &R {
        &self.repo
    }
}

impl<R, I, F> MessageQueries for ManagerGuard<'_, R, I, F>
where
    R: Repository,
    I: IdentityProvider,
    F: MessageFactory,
{
    type Repo = R;

    fn repository(&self) -> &R {
        self.repo()
    }
}
