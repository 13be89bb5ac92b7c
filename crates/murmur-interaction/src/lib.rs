//! murmur-interaction: the provider gateway layer.
//!
//! Everything that crosses the network lives here: the gateway contract
//! the dispatcher programs against, the HTTP implementation that talks to
//! the serverless proxy functions, SSE frame decoding, provider-family
//! routing, and the background naming and image-generation calls.

pub mod gateway;
pub mod http_gateway;
pub mod image;
pub mod naming;
pub mod routing;
pub mod sse;

pub use gateway::{
    CompletionGateway, CompletionPayload, CompletionRequest, GatewayError, InlineImage,
    ProviderReply, StreamEvent, UsageStats,
};
pub use http_gateway::HttpCompletionGateway;
pub use image::{DalleImageRequest, DalleModel, GeneratedImage};
pub use naming::NamingGateway;
pub use routing::{DEFAULT_TEXT_MODEL, ProviderFamily};
pub use sse::{SseFrame, SseFrameDecoder};
