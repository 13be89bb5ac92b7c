//! Conversation message types.
//!
//! This module contains types for representing messages in a conversation,
//! including roles, the live message entity, and the provider-ready wire
//! shape produced by history formatting.

use serde::{Deserialize, Serialize};

/// Marker prepended to the formatted text of a message that carries an
/// attached image. The image bytes themselves travel out-of-band.
pub const IMAGE_ATTACHMENT_MARKER: &str = "[Image attached]";

/// Text stored in place of an assistant reply when the provider returned
/// an empty completion.
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "No response was generated.";

/// Represents the role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Message from the user.
    User,
    /// Message from the AI assistant.
    Assistant,
    /// System instruction.
    System,
}

/// A single message in the live conversation.
///
/// Assistant messages are created empty with `is_loading = true` and grow
/// incrementally while a reply streams in; the flag clears exactly once,
/// after both delivery and rendering have finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message identifier (UUID format), stable for the turn.
    pub id: String,
    /// The role of the message sender.
    pub role: MessageRole,
    /// The content of the message. Mutable while streaming.
    pub content: String,
    /// Creation instant, epoch milliseconds.
    pub timestamp: i64,
    /// Display-only reference to attached image data, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_preview_url: Option<String>,
    /// True while the assistant turn is still resolving.
    pub is_loading: bool,
}

impl ChatMessage {
    /// Creates a message with a fresh UUID and the current timestamp.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            image_preview_url: None,
            is_loading: false,
        }
    }

    /// Creates a user message, optionally carrying an image preview.
    pub fn user(content: impl Into<String>, image_preview_url: Option<String>) -> Self {
        Self {
            image_preview_url,
            ..Self::new(MessageRole::User, content)
        }
    }

    /// Creates an empty assistant message in the loading state.
    pub fn pending_assistant() -> Self {
        Self {
            is_loading: true,
            ..Self::new(MessageRole::Assistant, "")
        }
    }
}

/// One entry of the provider-ready message list.
///
/// This is the `{role, content}` shape every text-completion endpoint
/// accepts; attached images are represented by a textual marker prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ApiMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a system entry.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_assistant_starts_empty_and_loading() {
        let message = ChatMessage::pending_assistant();
        assert_eq!(message.role, MessageRole::Assistant);
        assert!(message.content.is_empty());
        assert!(message.is_loading);
    }

    #[test]
    fn role_serializes_snake_case() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn user_message_keeps_preview_url() {
        let message = ChatMessage::user("look at this", Some("blob:abc".to_string()));
        assert_eq!(message.image_preview_url.as_deref(), Some("blob:abc"));
        assert!(!message.is_loading);
    }
}
