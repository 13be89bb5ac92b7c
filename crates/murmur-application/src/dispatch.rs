//! Message dispatch and streaming reconstruction.
//!
//! Turns one user submission into one completed assistant message,
//! regardless of which reply shape the gateway produced. The dispatcher
//! owns the in-flight guard (one send at a time, no queueing), builds the
//! outbound payload from the store's formatted history, and feeds
//! delivered text into the typewriter; finalization happens exactly once,
//! after delivery completed and the animation queue drained.

use crate::typewriter::{AnimationSink, DelaySchedule, Typewriter};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use murmur_core::assistant::AssistantRepository;
use murmur_core::context::{StandingContext, inject_standing_context};
use murmur_core::conversation::{
    ApiMessage, ChatMessage, ConversationStore, EMPTY_RESPONSE_PLACEHOLDER, HistoryOptions,
    IMAGE_ATTACHMENT_MARKER, MessageRole, NewMessage,
};
use murmur_interaction::gateway::{
    CompletionGateway, CompletionRequest, InlineImage, ProviderReply, StreamEvent,
};
use murmur_interaction::routing::DEFAULT_TEXT_MODEL;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// An image attached to a user submission, as handed over by the UI.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
    /// MIME type when the source already knows it; guessed from the file
    /// name otherwise.
    pub mime_type: Option<String>,
}

/// Result of one send. In test mode the returned messages are the only
/// record of the turn; in normal mode they mirror the store mutations.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub ai_response: Option<String>,
    pub user_message: Option<ChatMessage>,
    pub assistant_message: Option<ChatMessage>,
}

impl SendOutcome {
    fn failure() -> Self {
        Self {
            success: false,
            ai_response: None,
            user_message: None,
            assistant_message: None,
        }
    }
}

/// Tuning knobs for outbound requests and rendering.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Model used when neither test mode nor the assistant names one.
    pub default_model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    /// Start in turbo (fast playback) mode.
    pub turbo: bool,
    pub schedule: DelaySchedule,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_TEXT_MODEL.to_string(),
            temperature: None,
            max_tokens: None,
            top_p: None,
            turbo: false,
            schedule: DelaySchedule::default(),
        }
    }
}

/// Orchestrates sends against an injected store and gateway.
pub struct MessageDispatcher {
    store: Arc<ConversationStore>,
    gateway: Arc<dyn CompletionGateway>,
    assistants: Arc<dyn AssistantRepository>,
    config: DispatcherConfig,
    standing_context: RwLock<StandingContext>,
    turbo: AtomicBool,
    in_flight: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl MessageDispatcher {
    pub fn new(
        store: Arc<ConversationStore>,
        gateway: Arc<dyn CompletionGateway>,
        assistants: Arc<dyn AssistantRepository>,
        config: DispatcherConfig,
    ) -> Self {
        let turbo = config.turbo;
        Self {
            store,
            gateway,
            assistants,
            config,
            standing_context: RwLock::new(StandingContext::default()),
            turbo: AtomicBool::new(turbo),
            in_flight: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Replaces the standing user context applied to future sends.
    pub async fn set_standing_context(&self, context: StandingContext) {
        *self.standing_context.write().await = context;
    }

    /// Toggles fast playback for future turns.
    pub fn set_turbo(&self, on: bool) {
        self.turbo.store(on, Ordering::SeqCst);
    }

    /// The caller-visible error slot: the most recent send failure, if
    /// any. Cleared when a new send starts.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("error lock poisoned").clone()
    }

    /// Whether a send is currently unresolved.
    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Sends one user turn and resolves once the assistant reply has
    /// fully rendered (or failed).
    ///
    /// Rejected synchronously, without touching the network, when another
    /// send is in flight or when both the trimmed text and the image are
    /// empty. In test mode `test_context` must carry the caller's
    /// transient history; the store is never mutated.
    pub async fn send_message(
        &self,
        text: &str,
        image: Option<ImageInput>,
        image_preview_url: Option<String>,
        test_context: Option<&[ChatMessage]>,
    ) -> SendOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.report_error("A reply is still in progress; wait for it to finish.");
            return SendOutcome::failure();
        }
        let _guard = InFlightGuard(&self.in_flight);
        self.clear_error();

        let trimmed = text.trim();
        if trimmed.is_empty() && image.is_none() {
            self.report_error("Type a message or attach an image before sending.");
            return SendOutcome::failure();
        }

        let test_mode = self.store.test_mode().await;

        // 1. construct and place the user message
        let user_message = ChatMessage::user(text, image_preview_url);
        let user_message = if test_mode.is_some() {
            user_message
        } else {
            match self
                .store
                .add_message(NewMessage::from_message(&user_message))
                .await
            {
                Ok(Some(appended)) => appended,
                Ok(None) => user_message,
                Err(err) => {
                    self.report_error(err.to_string());
                    return SendOutcome::failure();
                }
            }
        };

        // 2. decode the attachment before any network activity
        let inline_image = match &image {
            Some(input) => match decode_image(input) {
                Ok(inline) => Some(inline),
                Err(reason) => {
                    self.report_error(format!("Could not read the attached image: {reason}"));
                    return SendOutcome {
                        success: false,
                        ai_response: None,
                        user_message: Some(user_message),
                        assistant_message: None,
                    };
                }
            },
            None => None,
        };

        // 3. resolve the model: test config > assistant profile > default
        let session = self.store.session().await;
        let assistant_id = match &test_mode {
            Some(config) => config.assistant_id.clone(),
            None => session.assistant_id().map(str::to_string),
        };
        let assistant_model = match &assistant_id {
            Some(id) => match self.assistants.find_by_id(id).await {
                Ok(profile) => profile.and_then(|p| p.model),
                Err(err) => {
                    tracing::warn!(target: "dispatch", "assistant lookup failed: {err}");
                    None
                }
            },
            None => None,
        };
        let model = test_mode
            .as_ref()
            .and_then(|config| config.model.clone())
            .or(assistant_model)
            .unwrap_or_else(|| self.config.default_model.clone());

        // 4. build the outbound message list
        let mut trial_history;
        let history = if test_mode.is_some() {
            let Some(context) = test_context else {
                self.report_error("Test mode needs the trial conversation passed explicitly.");
                return SendOutcome {
                    success: false,
                    ai_response: None,
                    user_message: Some(user_message),
                    assistant_message: None,
                };
            };
            trial_history = context.to_vec();
            trial_history.push(user_message.clone());
            self.store
                .formatted_history(HistoryOptions {
                    exclude_last: false,
                    messages_for_context: Some(&trial_history),
                })
                .await
        } else {
            self.store.formatted_history(HistoryOptions::default()).await
        };
        let mut messages = match history {
            Ok(messages) => messages,
            Err(err) => {
                self.report_error(err.to_string());
                return SendOutcome {
                    success: false,
                    ai_response: None,
                    user_message: Some(user_message),
                    assistant_message: None,
                };
            }
        };

        let standing = self.standing_context.read().await.clone();
        inject_standing_context(&mut messages, &standing, assistant_id.as_deref());

        if messages.is_empty() {
            // degrade to a minimal single-turn payload rather than failing
            let fallback = if trimmed.is_empty() {
                IMAGE_ATTACHMENT_MARKER.to_string()
            } else {
                trimmed.to_string()
            };
            messages.push(ApiMessage::new(MessageRole::User, fallback));
        }

        // place the pending assistant message and pick the render target
        let pending = ChatMessage::pending_assistant();
        let (sink, trial_message): (Arc<dyn AnimationSink>, Option<SharedMessage>) =
            if test_mode.is_some() {
                let shared = Arc::new(RwLock::new(pending.clone()));
                (
                    Arc::new(EphemeralSink {
                        message: shared.clone(),
                    }) as Arc<dyn AnimationSink>,
                    Some(shared),
                )
            } else {
                match self
                    .store
                    .add_message(NewMessage::from_message(&pending))
                    .await
                {
                    Ok(Some(_)) => (
                        Arc::new(StoreSink {
                            store: self.store.clone(),
                        }) as Arc<dyn AnimationSink>,
                        None,
                    ),
                    Ok(None) | Err(_) => {
                        self.report_error("Could not create the assistant message.");
                        return SendOutcome {
                            success: false,
                            ai_response: None,
                            user_message: Some(user_message),
                            assistant_message: None,
                        };
                    }
                }
            };

        let typewriter = Typewriter::new(pending.id.clone(), sink, self.config.schedule.clone());
        typewriter.set_turbo(self.turbo.load(Ordering::SeqCst));

        // 5. dispatch and reconstruct
        let request = CompletionRequest {
            model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
            image: inline_image,
        };

        let mut transport_error: Option<String> = None;
        match self.gateway.complete(request).await {
            Err(err) => {
                transport_error = Some(err.to_string());
                typewriter.abort(&format!("[Error: {err}]")).await;
            }
            Ok(ProviderReply::Complete(payload)) => {
                // a single-shot reply is a stream of length one
                if payload.ai_text.is_empty() {
                    if let Some(reason) = &payload.block_reason {
                        typewriter.push_text(&format!("[Response blocked: {reason}]"));
                    }
                } else {
                    typewriter.push_text(&payload.ai_text);
                }
                typewriter.mark_delivery_complete();
            }
            Ok(ProviderReply::Streamed(mut events)) => {
                let mut saw_done = false;
                while let Some(event) = events.recv().await {
                    match event {
                        StreamEvent::Text(fragment) => typewriter.push_text(&fragment),
                        StreamEvent::Error(message) => {
                            typewriter.push_text(&format!("\n[Error: {message}]"));
                        }
                        StreamEvent::Done => {
                            saw_done = true;
                            break;
                        }
                    }
                }
                if saw_done {
                    typewriter.mark_delivery_complete();
                } else {
                    transport_error = Some("the response stream was interrupted".to_string());
                    typewriter.abort("\n[Connection interrupted]").await;
                }
            }
        }

        // 6/7. finalization: delivery complete AND animation drained
        typewriter.wait_until_finalized().await;

        if let Some(message) = &transport_error {
            self.report_error(message.clone());
        }

        let assistant_message = match &trial_message {
            Some(shared) => Some(shared.read().await.clone()),
            None => self.store.message(&pending.id).await,
        };
        let success = transport_error.is_none();
        let ai_response = if success {
            assistant_message.as_ref().map(|m| m.content.clone())
        } else {
            None
        };

        SendOutcome {
            success,
            ai_response,
            user_message: Some(user_message),
            assistant_message,
        }
    }

    fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "dispatch", "{message}");
        *self.last_error.lock().expect("error lock poisoned") = Some(message);
    }

    fn clear_error(&self) {
        *self.last_error.lock().expect("error lock poisoned") = None;
    }
}

type SharedMessage = Arc<RwLock<ChatMessage>>;

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Renders into the store-backed message list (normal mode).
struct StoreSink {
    store: Arc<ConversationStore>,
}

#[async_trait::async_trait]
impl AnimationSink for StoreSink {
    async fn append_text(&self, message_id: &str, text: &str) {
        if let Err(err) = self.store.append_message_content(message_id, text).await {
            tracing::warn!(target: "dispatch", "append to {message_id} failed: {err}");
        }
    }

    async fn finalize(&self, message_id: &str, final_text: &str) {
        let content = if final_text.is_empty() {
            EMPTY_RESPONSE_PLACEHOLDER
        } else {
            final_text
        };
        if let Err(err) = self.store.set_message_content(message_id, content).await {
            tracing::warn!(target: "dispatch", "finalize of {message_id} failed: {err}");
        }
        if let Err(err) = self
            .store
            .update_message_loading_state(message_id, false)
            .await
        {
            tracing::warn!(target: "dispatch", "loading flag of {message_id} stuck: {err}");
        }
    }
}

/// Renders into the transient message the caller holds (test mode). The
/// literal final text is kept even when empty; trial history stays
/// truthful and only the display layer substitutes a placeholder.
struct EphemeralSink {
    message: SharedMessage,
}

#[async_trait::async_trait]
impl AnimationSink for EphemeralSink {
    async fn append_text(&self, _message_id: &str, text: &str) {
        self.message.write().await.content.push_str(text);
    }

    async fn finalize(&self, _message_id: &str, final_text: &str) {
        let mut message = self.message.write().await;
        message.content = final_text.to_string();
        message.is_loading = false;
    }
}

fn decode_image(image: &ImageInput) -> Result<InlineImage, String> {
    if image.bytes.is_empty() {
        return Err("the attachment is empty".to_string());
    }
    let mime_type = image
        .mime_type
        .clone()
        .or_else(|| {
            image
                .file_name
                .as_deref()
                .and_then(|name| mime_guess::from_path(name).first())
                .map(|mime| mime.essence_str().to_string())
        })
        .ok_or_else(|| "could not determine the attachment type".to_string())?;
    if !mime_type.starts_with("image/") {
        return Err(format!("unsupported attachment type: {mime_type}"));
    }
    Ok(InlineImage {
        data: BASE64_STANDARD.encode(&image.bytes),
        mime_type,
    })
}
