use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::tempdir;

use tavla::{Config, Node};
use tavla_core::{
    BoardName, ContentUri, IdentityId, ListEntry, Message, MessageContent, MessageId, MessageList,
    MessageListId, OwnIdentity, PublicationState,
};
use tavla_sync::{Ingest, MessageDraft, MessageQueries, ReminderHandler};

/// A node over a fresh redb file, with alice as the only own identity.
fn open_node(path: &Path) -> Node {
    let config = Config {
        db_path: path.to_path_buf(),
        startup_delay_secs: 0,
        maintenance_period_secs: 1,
        task_interval_secs: 1,
        own_identities: vec![OwnIdentity::new(id("alice"), "Alice", "SSK-a")],
    };
    Node::open(&config).unwrap()
}

fn id(name: &str) -> IdentityId {
    IdentityId::new(name).unwrap()
}

fn remote_message(nonce: &str) -> Message {
    let author = id("bob");
    let content = MessageContent {
        thread_id: None,
        parent_id: None,
        boards: [BoardName::new("tavla").unwrap()].into_iter().collect(),
        reply_to_board: None,
        title: "Hello from bob".to_string(),
        text: "First post".to_string(),
        date: Utc::now(),
        attachments: Vec::new(),
    };
    Message::new(
        MessageId::compose(&author, nonce).unwrap(),
        ContentUri::new(format!("ssk:SSK-b/message/{}", nonce)),
        MessageListId::new(author.clone(), 0),
        author,
        content,
    )
}

#[test]
fn test_publication_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("node.redb");

    let posted = {
        let node = open_node(&path);
        let own = node
            .manager
            .post_message(MessageDraft::new(id("alice"), "Hello", "World").board("Tavla"))
            .unwrap();
        assert!(own.insert_uri.as_str().starts_with("ssk:SSK-a/message/"));

        node.manager
            .on_own_message_inserted(&own.id, ContentUri::new("ssk:SSK-a/real/1"))
            .unwrap();
        let list = node
            .manager
            .begin_list_insert(&MessageListId::new(id("alice"), 0))
            .unwrap();
        assert_eq!(list.references().len(), 1);
        own.id
    };

    let node = open_node(&path);
    let list = node
        .manager
        .get_own_message_list(&MessageListId::new(id("alice"), 0))
        .unwrap();
    assert_eq!(list.state(), PublicationState::Locked);

    node.manager
        .on_message_list_insert_succeeded(&list.uri())
        .unwrap();
    let own = node.manager.get_own_message(&posted).unwrap();
    assert!(own.is_inserted());
    assert_eq!(node.manager.count_unsent_messages().unwrap(), 0);
}

#[test]
fn test_remote_content_and_identity_deletion() {
    let dir = tempdir().unwrap();
    let node = open_node(&dir.path().join("node.redb"));
    node.registry.add_identity(id("bob"), "Bob", "SSK-b");

    let message = remote_message("m1");
    let list_id = MessageListId::new(id("bob"), 0);
    let list = MessageList {
        id: list_id.clone(),
        uri: list_id.uri(),
        entries: vec![ListEntry {
            message_id: message.id.clone(),
            uri: message.uri.clone(),
            board: BoardName::new("tavla").unwrap(),
            date: message.content.date,
        }],
    };

    assert_eq!(node.manager.on_message_list_received(list), Ingest::Stored);
    assert_eq!(node.manager.on_message_received(message.clone()), Ingest::Stored);
    assert_eq!(node.manager.board_messages("tavla").unwrap().len(), 1);

    node.manager.subscribe_to_board(&id("alice"), "tavla").unwrap();
    assert_eq!(node.manager.not_downloaded_messages().unwrap().len(), 0);

    node.registry.remove(&id("bob")).unwrap();
    assert!(node.manager.get_message(&message.id).unwrap_err().is_not_found());
    assert!(node.manager.get_message_list(&list_id).unwrap_err().is_not_found());
    assert_eq!(node.manager.board_messages("tavla").unwrap().len(), 0);
    // Board and subscription outlive the author
    assert!(node.manager.get_board_by_name("tavla").unwrap().has_subscriptions);
}

#[test]
fn test_tasks_on_redb() {
    let dir = tempdir().unwrap();
    let node = open_node(&dir.path().join("node.redb"));
    let now = Utc::now();

    let reminder = ReminderHandler::task(
        id("alice"),
        "Say hello",
        Duration::minutes(30),
        now - Duration::seconds(1),
        Some(now + Duration::hours(1)),
    );
    node.tasks.schedule(&reminder).unwrap();

    let stats = node.tasks.run_once(now).unwrap();
    assert_eq!(stats.processed, 1);
    let visible = node
        .tasks
        .lock()
        .visible_tasks(&id("alice"), now + Duration::seconds(1))
        .unwrap()
        .count();
    assert_eq!(visible, 1);

    let stats = node.tasks.run_once(now + Duration::hours(2)).unwrap();
    assert_eq!(stats.deleted, 1);
}

#[test]
fn test_start_and_shutdown() {
    let dir = tempdir().unwrap();
    let node = open_node(&dir.path().join("node.redb"));
    node.start().unwrap();

    let manager = Arc::clone(&node.manager);
    node.shutdown();
    assert_eq!(manager.state(), tavla_sync::LifecycleState::Stopped);
}
