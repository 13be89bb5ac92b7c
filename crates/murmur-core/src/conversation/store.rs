//! Conversation state store.
//!
//! Single source of truth for the currently visible message list and the
//! active session identity. The store is constructed by the embedding
//! application and injected (`Arc`) into whatever drives sends; all
//! mutation goes through its methods, which keeps the one-writer invariant
//! without ambient globals.
//!
//! While test mode is active the store-backed mutation methods are no-ops:
//! the caller trials an assistant configuration against its own transient
//! message list and passes that list explicitly when formatting history.

use super::message::{ApiMessage, ChatMessage, IMAGE_ATTACHMENT_MARKER, MessageRole};
use crate::assistant::AssistantRepository;
use crate::error::{MurmurError, Result};
use crate::memory::MemoryRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use tokio::sync::RwLock;

/// Session ID of the single persistent main conversation.
pub const MAIN_SESSION_ID: &str = "main";

/// Identity of the active conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    /// The persistent main session, no assistant instructions.
    Main,
    /// A session bound to a configured assistant.
    Assistant(String),
}

impl SessionKind {
    /// The persistence key for this session.
    pub fn session_id(&self) -> &str {
        match self {
            SessionKind::Main => MAIN_SESSION_ID,
            SessionKind::Assistant(id) => id,
        }
    }

    /// The assistant bound to this session, if any.
    pub fn assistant_id(&self) -> Option<&str> {
        match self {
            SessionKind::Main => None,
            SessionKind::Assistant(id) => Some(id),
        }
    }
}

/// Ephemeral override used to trial an assistant configuration before
/// saving it. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestModeConfig {
    /// Identity the trial runs under, when the draft already has an ID.
    pub assistant_id: Option<String>,
    /// Draft system instructions.
    pub instructions: String,
    /// Draft model override.
    pub model: Option<String>,
}

/// Snapshot handed to the persistence layer when an assistant turn
/// completes or a session with unsaved messages is left.
#[derive(Debug, Clone)]
pub struct FinalizedTurn {
    pub session_id: String,
    /// Durable record this session is already linked to, if any.
    pub memory_id: Option<String>,
    pub messages: Vec<ChatMessage>,
}

/// Callback fired after an assistant turn fully resolves.
pub type MessageFinalizedCallback = Arc<dyn Fn(FinalizedTurn) + Send + Sync>;

/// Callback fired after the active session changes.
pub type SessionChangedCallback = Arc<dyn Fn(&SessionKind) + Send + Sync>;

/// Parameters for [`ConversationStore::add_message`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub image_preview_url: Option<String>,
    /// Caller-chosen ID; a UUID is generated when absent.
    pub message_id: Option<String>,
    pub is_loading: bool,
    /// Epoch-ms creation instant; now when absent.
    pub timestamp: Option<i64>,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image_preview_url: None,
            message_id: None,
            is_loading: false,
            timestamp: None,
        }
    }

    /// Copies identity and content out of an already-built message.
    pub fn from_message(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            image_preview_url: message.image_preview_url.clone(),
            message_id: Some(message.id.clone()),
            is_loading: message.is_loading,
            timestamp: Some(message.timestamp),
        }
    }
}

/// Options for [`ConversationStore::formatted_history`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryOptions<'a> {
    /// Drops the most recently appended entry from the processed set.
    pub exclude_last: bool,
    /// Caller-maintained message list; required in test mode, ignored
    /// otherwise.
    pub messages_for_context: Option<&'a [ChatMessage]>,
}

struct StoreState {
    session: SessionKind,
    messages: Vec<ChatMessage>,
    active_memory_id: Option<String>,
    test_mode: Option<TestModeConfig>,
    has_unsaved: bool,
}

/// The live conversation state container.
pub struct ConversationStore {
    state: RwLock<StoreState>,
    assistants: Arc<dyn AssistantRepository>,
    memories: Arc<dyn MemoryRepository>,
    on_message_finalized: StdRwLock<Option<MessageFinalizedCallback>>,
    on_session_changed: StdRwLock<Option<SessionChangedCallback>>,
}

impl ConversationStore {
    /// Creates a store positioned on an empty main session.
    pub fn new(
        assistants: Arc<dyn AssistantRepository>,
        memories: Arc<dyn MemoryRepository>,
    ) -> Self {
        Self {
            state: RwLock::new(StoreState {
                session: SessionKind::Main,
                messages: Vec::new(),
                active_memory_id: None,
                test_mode: None,
                has_unsaved: false,
            }),
            assistants,
            memories,
            on_message_finalized: StdRwLock::new(None),
            on_session_changed: StdRwLock::new(None),
        }
    }

    /// Registers the observer for fully resolved assistant turns. The
    /// persistence layer hangs its fire-and-forget save off this.
    pub fn set_on_message_finalized(&self, callback: MessageFinalizedCallback) {
        *self.on_message_finalized.write().expect("callback lock poisoned") = Some(callback);
    }

    /// Registers the observer notified after a session switch.
    pub fn set_on_session_changed(&self, callback: SessionChangedCallback) {
        *self.on_session_changed.write().expect("callback lock poisoned") = Some(callback);
    }

    /// Returns the active session identity.
    pub async fn session(&self) -> SessionKind {
        self.state.read().await.session.clone()
    }

    /// Returns the active test-mode configuration, if any.
    pub async fn test_mode(&self) -> Option<TestModeConfig> {
        self.state.read().await.test_mode.clone()
    }

    /// Whether test mode is currently active.
    pub async fn is_test_mode(&self) -> bool {
        self.state.read().await.test_mode.is_some()
    }

    /// A snapshot of the live message list.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().await.messages.clone()
    }

    /// Looks up a single message by ID.
    pub async fn message(&self, message_id: &str) -> Option<ChatMessage> {
        self.state
            .read()
            .await
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    /// The durable record the active session is linked to, if any.
    pub async fn active_memory_id(&self) -> Option<String> {
        self.state.read().await.active_memory_id.clone()
    }

    /// Links the active session to a durable record. Called by the
    /// persistence layer after it creates the first snapshot.
    pub async fn set_active_memory_id(&self, memory_id: Option<String>) {
        self.state.write().await.active_memory_id = memory_id;
    }

    /// Activates test mode, replacing normal-mode behavior until
    /// [`exit_test_mode`](Self::exit_test_mode) or a session switch.
    pub async fn enter_test_mode(&self, config: TestModeConfig) {
        self.state.write().await.test_mode = Some(config);
    }

    /// Deactivates test mode.
    pub async fn exit_test_mode(&self) {
        self.state.write().await.test_mode = None;
    }

    /// Switches the active session.
    ///
    /// If a non-test session with unsaved messages is active, its snapshot
    /// is handed to the persistence observer first (best effort; a failed
    /// save is the observer's problem and never blocks the switch). Test
    /// mode is cleared, the most recent persisted snapshot for the target
    /// session is loaded (empty when none exists), and the session-changed
    /// observer is notified.
    pub async fn set_active_session(&self, session: SessionKind) {
        let pending_save = {
            let mut state = self.state.write().await;

            let pending_save = if state.test_mode.is_none()
                && state.has_unsaved
                && !state.messages.is_empty()
            {
                Some(FinalizedTurn {
                    session_id: state.session.session_id().to_string(),
                    memory_id: state.active_memory_id.clone(),
                    messages: state.messages.clone(),
                })
            } else {
                None
            };

            state.test_mode = None;

            let (messages, memory_id) = match self.latest_snapshot(session.session_id()).await {
                Some(memory) => (memory.messages, Some(memory.memory_id)),
                None => (Vec::new(), None),
            };

            state.session = session.clone();
            state.messages = messages;
            state.active_memory_id = memory_id;
            state.has_unsaved = false;
            pending_save
        };

        if let Some(turn) = pending_save {
            self.emit_finalized(turn);
        }
        if let Some(callback) = self
            .on_session_changed
            .read()
            .expect("callback lock poisoned")
            .clone()
        {
            callback(&session);
        }
    }

    /// Appends a message to the live list.
    ///
    /// Empty content is rejected unless the message is an assistant turn
    /// (assistant messages start empty and grow while streaming) or
    /// carries an image. Returns `Ok(None)` while test mode is active:
    /// the caller keeps its own transient history.
    ///
    /// Appending a completed (non-loading) assistant message hands the
    /// updated snapshot to the persistence observer.
    pub async fn add_message(&self, new: NewMessage) -> Result<Option<ChatMessage>> {
        if new.role != MessageRole::Assistant
            && new.content.trim().is_empty()
            && new.image_preview_url.is_none()
        {
            return Err(MurmurError::invalid_input("message content must not be empty"));
        }

        let (message, finalized) = {
            let mut state = self.state.write().await;
            if state.test_mode.is_some() {
                return Ok(None);
            }

            let message = ChatMessage {
                id: new
                    .message_id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                role: new.role,
                content: new.content,
                timestamp: new
                    .timestamp
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                image_preview_url: new.image_preview_url,
                is_loading: new.is_loading,
            };
            state.messages.push(message.clone());
            state.has_unsaved = true;

            let finalized = if message.role == MessageRole::Assistant && !message.is_loading {
                state.has_unsaved = false;
                Some(FinalizedTurn {
                    session_id: state.session.session_id().to_string(),
                    memory_id: state.active_memory_id.clone(),
                    messages: state.messages.clone(),
                })
            } else {
                None
            };
            (message, finalized)
        };

        if let Some(turn) = finalized {
            self.emit_finalized(turn);
        }
        Ok(Some(message))
    }

    /// Flips a message's loading flag.
    ///
    /// The `true -> false` transition of an assistant message hands the
    /// updated snapshot to the persistence observer. No-op in test mode.
    pub async fn update_message_loading_state(
        &self,
        message_id: &str,
        is_loading: bool,
    ) -> Result<()> {
        let finalized = {
            let mut state = self.state.write().await;
            if state.test_mode.is_some() {
                return Ok(());
            }

            let message = state
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| MurmurError::not_found("message", message_id))?;

            let resolved =
                message.role == MessageRole::Assistant && message.is_loading && !is_loading;
            message.is_loading = is_loading;

            if resolved {
                state.has_unsaved = false;
                Some(FinalizedTurn {
                    session_id: state.session.session_id().to_string(),
                    memory_id: state.active_memory_id.clone(),
                    messages: state.messages.clone(),
                })
            } else {
                None
            }
        };

        if let Some(turn) = finalized {
            self.emit_finalized(turn);
        }
        Ok(())
    }

    /// Appends streamed text to a message's visible content. This is the
    /// animation loop's single writer. No-op in test mode.
    pub async fn append_message_content(&self, message_id: &str, text: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.test_mode.is_some() {
            return Ok(());
        }
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| MurmurError::not_found("message", message_id))?;
        message.content.push_str(text);
        state.has_unsaved = true;
        Ok(())
    }

    /// Replaces a message's content wholesale; the finalization writer.
    /// No-op in test mode.
    pub async fn set_message_content(&self, message_id: &str, content: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.test_mode.is_some() {
            return Ok(());
        }
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| MurmurError::not_found("message", message_id))?;
        message.content = content.to_string();
        state.has_unsaved = true;
        Ok(())
    }

    /// Produces the provider-ready `{role, content}` list.
    ///
    /// In test mode the system entry comes from the trial configuration's
    /// instructions and the message content from the caller-supplied
    /// context (required). In normal mode the system entry comes from the
    /// active assistant's stored instructions and the content from the
    /// live list. User/assistant messages are included only when they have
    /// non-empty text after trimming; an attached image becomes a textual
    /// marker prefix (its bytes travel out-of-band).
    pub async fn formatted_history(&self, options: HistoryOptions<'_>) -> Result<Vec<ApiMessage>> {
        let state = self.state.read().await;

        let (system_text, mut source) = if let Some(config) = &state.test_mode {
            let context = options.messages_for_context.ok_or_else(|| {
                MurmurError::invalid_input(
                    "test mode requires an explicit message context",
                )
            })?;
            (non_empty(&config.instructions), context.to_vec())
        } else {
            let system = match state.session.assistant_id() {
                Some(id) => self
                    .assistants
                    .find_by_id(id)
                    .await?
                    .and_then(|profile| non_empty(&profile.instructions)),
                None => None,
            };
            (system, state.messages.clone())
        };
        drop(state);

        if options.exclude_last {
            source.pop();
        }

        let mut formatted = Vec::with_capacity(source.len() + 1);
        if let Some(system) = system_text {
            formatted.push(ApiMessage::system(system));
        }

        for message in &source {
            if message.role == MessageRole::System {
                continue;
            }
            let trimmed = message.content.trim();
            if trimmed.is_empty() {
                continue;
            }
            let content = if message.image_preview_url.is_some() {
                format!("{} {}", IMAGE_ATTACHMENT_MARKER, trimmed)
            } else {
                trimmed.to_string()
            };
            formatted.push(ApiMessage::new(message.role, content));
        }

        Ok(formatted)
    }

    async fn latest_snapshot(&self, session_id: &str) -> Option<crate::memory::Memory> {
        match self.memories.get_all().await {
            Ok(all) => all
                .into_iter()
                .filter(|m| m.session_id == session_id)
                .max_by_key(|m| m.timestamp),
            Err(err) => {
                tracing::warn!(target: "conversation", "failed to load session snapshot: {err}");
                None
            }
        }
    }

    fn emit_finalized(&self, turn: FinalizedTurn) {
        let callback = self
            .on_message_finalized
            .read()
            .expect("callback lock poisoned")
            .clone();
        if let Some(callback) = callback {
            callback(turn);
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
