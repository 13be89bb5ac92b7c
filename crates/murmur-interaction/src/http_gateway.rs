//! HTTP implementation of the gateway traits.
//!
//! Talks to the serverless proxy functions over JSON POST. The reply
//! shape is decided once, here, by the response content type: an
//! `text/event-stream` body is handed to a spawned reader task that
//! decodes SSE frames into a channel; anything else is parsed as a single
//! completion payload.

use crate::gateway::{
    CompletionGateway, CompletionPayload, CompletionRequest, GatewayError, ProviderReply,
    StreamEvent,
};
use crate::routing::ProviderFamily;
use crate::sse::{SseFrame, SseFrameDecoder};
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Gateway implementation backed by the proxy endpoints.
#[derive(Clone)]
pub struct HttpCompletionGateway {
    client: Client,
    base_url: String,
}

impl HttpCompletionGateway {
    /// Creates a gateway rooted at the proxy's base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Overrides the HTTP client after construction.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn route_url(&self, route: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), route)
    }

    pub(crate) async fn post_json<B: Serialize + ?Sized>(
        &self,
        route: &str,
        body: &B,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .client
            .post(self.route_url(route))
            .json(body)
            .send()
            .await
            .map_err(|err| GatewayError::Request {
                message: format!("request to {route} failed: {err}"),
                is_retryable: err.is_connect() || err.is_timeout(),
            })?;
        ensure_success(response).await
    }
}

/// Resolves a response, normalizing non-success bodies into
/// [`GatewayError::Provider`].
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read error body".to_string());
    Err(map_http_error(status, body))
}

fn map_http_error(status: StatusCode, body: String) -> GatewayError {
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error)
        .unwrap_or(body);

    let is_retryable = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    );

    GatewayError::Provider {
        status_code: Some(status.as_u16()),
        message,
        is_retryable,
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: String,
}

#[async_trait::async_trait]
impl CompletionGateway for HttpCompletionGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<ProviderReply, GatewayError> {
        let family = ProviderFamily::from_model(&request.model);
        let response = self.post_json(family.completion_route(), &request).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        if content_type.starts_with("text/event-stream") {
            let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
            tokio::spawn(read_sse_stream(response, tx));
            Ok(ProviderReply::Streamed(rx))
        } else {
            let payload = response
                .json::<CompletionPayload>()
                .await
                .map_err(|err| GatewayError::Parse(err.to_string()))?;
            Ok(ProviderReply::Complete(payload))
        }
    }
}

/// Reads the SSE body and forwards decoded events into the channel.
///
/// A read or decode failure ends the task without a `Done` event; the
/// receiver observes the closed channel as a transport failure.
async fn read_sse_stream(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut stream = response.bytes_stream();
    let mut decoder = SseFrameDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(target: "gateway", "stream read failed: {err}");
                return;
            }
        };

        let frames = match decoder.push(&String::from_utf8_lossy(&chunk)) {
            Ok(frames) => frames,
            Err(err) => {
                tracing::warn!(target: "gateway", "malformed stream frame: {err}");
                return;
            }
        };

        for frame in frames {
            let event = match frame {
                SseFrame::Text(text) => StreamEvent::Text(text),
                SseFrame::Error(error) => StreamEvent::Error(error),
                SseFrame::Done { .. } => {
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
            };
            if tx.send(event).await.is_err() {
                // receiver gone; nothing left to deliver to
                return;
            }
        }
    }
    tracing::debug!(target: "gateway", "stream ended without a done marker");
}
