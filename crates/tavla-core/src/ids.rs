use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Reference to an identity owned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    /// Identity IDs are used as key prefixes, so separators are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty()
            || id
                .chars()
                .any(|c| c == '/' || c == '@' || c == '|' || c.is_whitespace())
        {
            return Err(ValidationError::InvalidIdentityId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique message ID of the form `<author-id>@<nonce>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn parse(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        match id.split_once('@') {
            Some((author, nonce))
                if IdentityId::new(author).is_ok()
                    && !nonce.is_empty()
                    && !nonce.contains(['@', '|', '/']) =>
            {
                Ok(Self(id))
            }
            _ => Err(ValidationError::InvalidMessageId(id)),
        }
    }

    pub fn compose(author: &IdentityId, nonce: &str) -> Result<Self, ValidationError> {
        Self::parse(format!("{}@{}", author, nonce))
    }

    pub fn author_part(&self) -> &str {
        self.0.split_once('@').map(|(a, _)| a).unwrap_or_default()
    }

    pub fn nonce(&self) -> &str {
        self.0.split_once('@').map(|(_, n)| n).unwrap_or_default()
    }

    /// Rejects IDs whose author part names someone else.
    pub fn verify_author(&self, author: &IdentityId) -> Result<(), ValidationError> {
        if self.author_part() != author.as_str() {
            return Err(ValidationError::ForeignMessageId {
                id: self.0.clone(),
                author: author.to_string(),
            });
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Case-folded board name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardName(String);

impl BoardName {
    pub const MAX_LEN: usize = 64;

    /// Folds to lower case, then allows only `[a-z0-9._-]`.
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        let folded = name.trim().to_lowercase();
        if folded.is_empty()
            || folded.chars().count() > Self::MAX_LEN
            || !folded
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        {
            return Err(ValidationError::InvalidBoardName(name.to_string()));
        }
        Ok(Self(folded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BoardName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network URI of a piece of content. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentUri(String);

impl ContentUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message list is identified by its author and a per-author index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageListId {
    pub author: IdentityId,
    pub index: u64,
}

impl MessageListId {
    pub fn new(author: IdentityId, index: u64) -> Self {
        Self { author, index }
    }

    /// Storage key. The index is zero padded so keys sort by index.
    pub fn key(&self) -> String {
        format!("{}{:020}", Self::author_prefix(&self.author), self.index)
    }

    pub fn author_prefix(author: &IdentityId) -> String {
        format!("{}/", author)
    }

    pub fn uri(&self) -> ListUri {
        ListUri(format!("ssk:{}/messagelist/{}", self.author, self.index))
    }
}

impl std::fmt::Display for MessageListId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.author, self.index)
    }
}

/// URI under which a message list is published: `ssk:<author>/messagelist/<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListUri(String);

impl ListUri {
    pub fn parse(uri: impl Into<String>) -> Result<Self, ValidationError> {
        let uri = uri.into();
        let parsed = ListUri(uri);
        parsed.list_id()?;
        Ok(parsed)
    }

    pub fn list_id(&self) -> Result<MessageListId, ValidationError> {
        let invalid = || ValidationError::InvalidListUri(self.0.clone());
        let rest = self.0.strip_prefix("ssk:").ok_or_else(invalid)?;
        let (author, index) = rest.split_once("/messagelist/").ok_or_else(invalid)?;
        let author = IdentityId::new(author).map_err(|_| invalid())?;
        let index = index.parse::<u64>().map_err(|_| invalid())?;
        Ok(MessageListId::new(author, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ListUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_id_rejects_separators() {
        assert!(IdentityId::new("alice").is_ok());
        assert!(IdentityId::new("").is_err());
        assert!(IdentityId::new("al/ice").is_err());
        assert!(IdentityId::new("al@ice").is_err());
        assert!(IdentityId::new("al ice").is_err());
    }

    #[test]
    fn test_message_id_author_part() {
        let id = MessageId::parse("alice@0001").unwrap();
        assert_eq!(id.author_part(), "alice");
        assert_eq!(id.nonce(), "0001");

        let alice = IdentityId::new("alice").unwrap();
        let bob = IdentityId::new("bob").unwrap();
        assert!(id.verify_author(&alice).is_ok());
        assert!(matches!(
            id.verify_author(&bob),
            Err(ValidationError::ForeignMessageId { .. })
        ));
    }

    #[test]
    fn test_message_id_requires_author_and_nonce() {
        assert!(MessageId::parse("alice").is_err());
        assert!(MessageId::parse("@0001").is_err());
        assert!(MessageId::parse("alice@").is_err());
        assert!(MessageId::parse("alice@a@b").is_err());
    }

    #[test]
    fn test_board_name_case_folds() {
        let name = BoardName::new("Test").unwrap();
        assert_eq!(name.as_str(), "test");
        assert_eq!(name, BoardName::new("TEST").unwrap());
    }

    #[test]
    fn test_board_name_rejects_invalid() {
        assert!(BoardName::new("").is_err());
        assert!(BoardName::new("has space").is_err());
        assert!(BoardName::new(&"a".repeat(65)).is_err());
        assert!(BoardName::new("en.freenet").is_ok());
    }

    #[test]
    fn test_list_keys_sort_by_index() {
        let alice = IdentityId::new("alice").unwrap();
        let k9 = MessageListId::new(alice.clone(), 9).key();
        let k10 = MessageListId::new(alice.clone(), 10).key();
        assert!(k9 < k10);
        assert!(k9.starts_with(&MessageListId::author_prefix(&alice)));
    }

    #[test]
    fn test_list_uri_resolves_list_id() {
        let id = MessageListId::new(IdentityId::new("alice").unwrap(), 7);
        assert_eq!(id.uri().list_id().unwrap(), id);
        assert!(ListUri::parse("ssk:alice/messagelist/x").is_err());
        assert!(ListUri::parse("chk:alice/messagelist/1").is_err());
    }
}
