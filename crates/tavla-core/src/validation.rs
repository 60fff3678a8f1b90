use crate::error::ValidationError;
use crate::ids::{IdentityId, MessageId};
use crate::message::MessageContent;

pub const MAX_TITLE_CHARS: usize = 256;
pub const MAX_TEXT_BYTES: usize = 64 * 1024;
pub const MAX_BOARDS: usize = 16;
pub const MAX_ATTACHMENTS: usize = 256;

/// Validator for message content.
pub struct Validator;

impl Validator {
    /// Must be non-empty after trimming and at most 256 chars.
    pub fn validate_title(title: &str) -> Result<(), ValidationError> {
        if title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        let len = title.chars().count();
        if len > MAX_TITLE_CHARS {
            return Err(ValidationError::TitleTooLong(len));
        }
        Ok(())
    }

    pub fn validate_text(text: &str) -> Result<(), ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        if text.len() > MAX_TEXT_BYTES {
            return Err(ValidationError::TextTooLong(text.len()));
        }
        Ok(())
    }

    /// Board names are already valid by construction; only the set is checked.
    pub fn validate_boards(content: &MessageContent) -> Result<(), ValidationError> {
        if content.boards.is_empty() {
            return Err(ValidationError::NoBoards);
        }
        if content.boards.len() > MAX_BOARDS {
            return Err(ValidationError::TooManyBoards(content.boards.len()));
        }
        if let Some(reply_to) = &content.reply_to_board {
            if !content.boards.contains(reply_to) {
                return Err(ValidationError::ReplyToBoardNotTargeted(
                    reply_to.to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn validate_attachments(content: &MessageContent) -> Result<(), ValidationError> {
        if content.attachments.len() > MAX_ATTACHMENTS {
            return Err(ValidationError::TooManyAttachments(content.attachments.len()));
        }
        Ok(())
    }

    /// Validate complete message content.
    pub fn validate_content(content: &MessageContent) -> Result<(), ValidationError> {
        Self::validate_title(&content.title)?;
        Self::validate_text(&content.text)?;
        Self::validate_boards(content)?;
        Self::validate_attachments(content)?;
        Ok(())
    }

    /// Validate a message as received from the network.
    pub fn validate_message(
        id: &MessageId,
        author: &IdentityId,
        content: &MessageContent,
    ) -> Result<(), ValidationError> {
        id.verify_author(author)?;
        Self::validate_content(content)
    }
}
