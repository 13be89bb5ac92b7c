//! Conversation domain module.
//!
//! This module contains the live conversation state: message types, the
//! state store, and the history formatter that produces provider-ready
//! message lists.
//!
//! # Module Structure
//!
//! - `message`: Message types (`MessageRole`, `ChatMessage`, `ApiMessage`)
//! - `store`: The state container (`ConversationStore`) and its events

pub mod message;
pub mod store;

// Re-export public API
pub use message::{
    ApiMessage, ChatMessage, EMPTY_RESPONSE_PLACEHOLDER, IMAGE_ATTACHMENT_MARKER, MessageRole,
};
pub use store::{
    ConversationStore, FinalizedTurn, HistoryOptions, MAIN_SESSION_ID, MessageFinalizedCallback,
    NewMessage, SessionChangedCallback, SessionKind, TestModeConfig,
};
