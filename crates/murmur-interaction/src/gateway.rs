//! Provider gateway contract.
//!
//! The serverless proxy in front of each AI provider normalizes success,
//! error, and blocked outcomes into the shapes below. The gateway trait is
//! the seam the dispatcher talks through; tests substitute mock
//! implementations.

use murmur_core::conversation::ApiMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Base64-encoded image payload riding alongside the message list.
///
/// The formatted history represents an attached image as a textual marker;
/// the binary travels here, out-of-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineImage {
    /// Base64-encoded image bytes.
    pub data: String,
    /// MIME type of the encoded bytes (e.g. `image/png`).
    pub mime_type: String,
}

/// A text-completion request as accepted by the proxy endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<InlineImage>,
}

/// Token accounting reported by some providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

/// A single-shot completion response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    /// The full completion text; may be empty when the provider blocked
    /// or produced nothing.
    #[serde(default)]
    pub ai_text: String,
    /// Why the completion was cut short or blocked, when reported.
    #[serde(default)]
    pub block_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<UsageStats>,
}

/// One decoded event of a streamed completion.
///
/// The channel closing before `Done` is the transport-failure signal;
/// there is no separate event for it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of completion text.
    Text(String),
    /// The provider finished the stream normally.
    Done,
    /// An in-band provider error, rendered inline rather than thrown.
    Error(String),
}

/// The two response shapes a completion endpoint can produce, decided
/// exactly once at the transport boundary.
pub enum ProviderReply {
    /// Incremental delivery; events arrive as the provider produces them.
    Streamed(mpsc::Receiver<StreamEvent>),
    /// The whole completion in one payload.
    Complete(CompletionPayload),
}

/// Errors surfaced by gateway implementations.
#[derive(thiserror::Error, Debug, Clone)]
pub enum GatewayError {
    /// The request never reached the proxy (connection, DNS, timeout).
    #[error("request failed: {message}")]
    Request { message: String, is_retryable: bool },

    /// The proxy answered with a non-success status; `message` carries the
    /// normalized `{error}` body.
    #[error("provider error: {message}")]
    Provider {
        status_code: Option<u16>,
        message: String,
        is_retryable: bool,
    },

    /// The response body did not match the expected shape.
    #[error("failed to parse provider response: {0}")]
    Parse(String),

    /// The request was rejected locally before any network activity.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Request { is_retryable, .. }
            | GatewayError::Provider { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }
}

/// The seam between the dispatcher and the proxy endpoints.
#[async_trait::async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Dispatches one completion request and returns whichever reply
    /// shape the endpoint produced.
    async fn complete(&self, request: CompletionRequest) -> Result<ProviderReply, GatewayError>;
}
