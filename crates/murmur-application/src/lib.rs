//! murmur-application: orchestration layer of the murmur chat client.
//!
//! Ties the conversation store to the provider gateway: the dispatcher
//! turns one user submission into one completed assistant turn, the
//! typewriter renders streamed text at a readable pace, and the memory
//! service persists finalized snapshots in the background.

pub mod dispatch;
pub mod memory_service;
pub mod typewriter;

pub use dispatch::{DispatcherConfig, ImageInput, MessageDispatcher, SendOutcome};
pub use memory_service::{MemoryService, PersistenceErrorCallback};
pub use typewriter::{AnimationSink, DelaySchedule, Typewriter};
