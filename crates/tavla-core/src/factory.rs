use std::iter;

use uuid::Uuid;

use crate::error::CoreError;
use crate::identity::OwnIdentity;
use crate::ids::{ContentUri, MessageId};
use crate::message::{MessageContent, OwnMessage};

/// Builds locally authored messages and decides where they are published.
pub trait MessageFactory: Send + Sync {
    fn generate_message_id(&self, author: &OwnIdentity) -> Result<MessageId, CoreError>;

    /// Network location the message itself will be inserted at.
    fn insert_target(&self, author: &OwnIdentity, id: &MessageId) -> ContentUri;

    fn construct(
        &self,
        author: &OwnIdentity,
        content: MessageContent,
    ) -> Result<OwnMessage, CoreError> {
        let id = self.generate_message_id(author)?;
        let insert_uri = self.insert_target(author, &id);
        Ok(OwnMessage {
            id,
            author: author.id.clone(),
            content,
            insert_uri,
            real_uri: None,
        })
    }

    /// Index a list moves to after its insert collided with an existing
    /// list. `used` holds every index the author has used locally.
    fn index_after_collision(&self, current: u64, used: &[u64]) -> u64 {
        used.iter()
            .copied()
            .chain(iter::once(current))
            .max()
            .unwrap_or(current)
            + 1
    }
}

/// Production factory: random nonces, published under the author's
/// routing key.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidMessageFactory;

impl MessageFactory for UuidMessageFactory {
    fn generate_message_id(&self, author: &OwnIdentity) -> Result<MessageId, CoreError> {
        let nonce = Uuid::new_v4().simple().to_string();
        Ok(MessageId::compose(&author.id, &nonce)?)
    }

    fn insert_target(&self, author: &OwnIdentity, id: &MessageId) -> ContentUri {
        ContentUri::new(format!("ssk:{}/message/{}", author.routing_key, id.nonce()))
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use sequential::SequentialMessageFactory;

#[cfg(any(test, feature = "test-utils"))]
mod sequential {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Deterministic factory for tests: nonces count up from 1.
    #[derive(Debug, Default)]
    pub struct SequentialMessageFactory {
        next: AtomicU64,
    }

    impl SequentialMessageFactory {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl MessageFactory for SequentialMessageFactory {
        fn generate_message_id(&self, author: &OwnIdentity) -> Result<MessageId, CoreError> {
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(MessageId::compose(&author.id, &format!("{:08}", n))?)
        }

        fn insert_target(&self, author: &OwnIdentity, id: &MessageId) -> ContentUri {
            ContentUri::new(format!("ssk:{}/message/{}", author.id, id.nonce()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{BoardName, IdentityId};
    use chrono::Utc;

    fn alice() -> OwnIdentity {
        OwnIdentity::new(IdentityId::new("alice").unwrap(), "Alice", "key-a")
    }

    fn content() -> MessageContent {
        MessageContent {
            thread_id: None,
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
    fn test_uuid_factory_ids_belong_to_author() {
        let factory = UuidMessageFactory;
        let msg = factory.construct(&alice(), content()).unwrap();
        assert!(msg.id.verify_author(&alice().id).is_ok());
        assert!(msg.insert_uri.as_str().starts_with("ssk:key-a/message/"));
        assert!(msg.real_uri.is_none());

        let other = factory.construct(&alice(), content()).unwrap();
        assert_ne!(msg.id, other.id);
    }

    #[test]
    fn test_sequential_factory_is_deterministic() {
        let factory = SequentialMessageFactory::new();
        assert_eq!(
            factory.generate_message_id(&alice()).unwrap().as_str(),
            "alice@00000001"
        );
        assert_eq!(
            factory.generate_message_id(&alice()).unwrap().as_str(),
            "alice@00000002"
        );
    }

    #[test]
    fn test_collision_index_is_one_past_highest_used() {
        let factory = UuidMessageFactory;
        assert_eq!(factory.index_after_collision(0, &[]), 1);
        assert_eq!(factory.index_after_collision(2, &[0, 1, 5]), 6);
        assert_eq!(factory.index_after_collision(7, &[0, 1]), 8);
    }
}
