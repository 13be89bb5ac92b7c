//! Typing animation scheduler.
//!
//! Renders a queue of pending characters into a message's visible content
//! at a human-readable, punctuation-aware pace, decoupled from network
//! delivery: the reader pushes text as fast as it arrives, the drain loop
//! renders at its own cadence and idles when the queue runs dry.
//!
//! State machine: Idle -> Draining while characters are queued; back to
//! Idle when the queue empties before delivery finished; Finalizing (the
//! full text is written and the loading flag cleared, exactly once) when
//! the queue empties after delivery completed. Only one drain loop runs
//! per message; triggering while one runs is a no-op because the running
//! loop picks up newly queued characters itself.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const MIN_TURBO_DELAY: Duration = Duration::from_millis(1);

/// Receives rendered characters and the final reconciliation write.
///
/// In normal mode this is backed by the conversation store; in test mode
/// by the transient message the caller holds.
#[async_trait::async_trait]
pub trait AnimationSink: Send + Sync {
    /// Appends rendered text to the visible message content.
    async fn append_text(&self, message_id: &str, text: &str);

    /// Writes the final, untruncated text and clears the loading flag.
    async fn finalize(&self, message_id: &str, final_text: &str);
}

/// Per-character delay classes, longest after sentence terminators.
#[derive(Debug, Clone)]
pub struct DelaySchedule {
    pub base: Duration,
    pub space: Duration,
    pub newline: Duration,
    pub comma: Duration,
    pub sentence: Duration,
    /// Divisor applied to every class in turbo mode, floored at 1 ms.
    pub turbo_divisor: u32,
}

impl Default for DelaySchedule {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(12),
            space: Duration::from_millis(18),
            newline: Duration::from_millis(45),
            comma: Duration::from_millis(60),
            sentence: Duration::from_millis(120),
            turbo_divisor: 6,
        }
    }
}

impl DelaySchedule {
    /// The pause rendered after `ch`.
    pub fn delay_for(&self, ch: char, turbo: bool) -> Duration {
        let class = match ch {
            '.' | '!' | '?' => self.sentence,
            ',' => self.comma,
            '\n' => self.newline,
            ' ' => self.space,
            _ => self.base,
        };
        if turbo {
            std::cmp::max(class / self.turbo_divisor.max(1), MIN_TURBO_DELAY)
        } else {
            class
        }
    }
}

/// The cooperative animation scheduler for one assistant message.
pub struct Typewriter {
    message_id: String,
    sink: Arc<dyn AnimationSink>,
    schedule: DelaySchedule,
    queue: Mutex<VecDeque<char>>,
    /// Everything pushed so far; the finalization write uses this, not the
    /// rendered content, so nothing is ever truncated.
    delivered: Mutex<String>,
    turbo: AtomicBool,
    delivery_complete: AtomicBool,
    draining: AtomicBool,
    finalized: AtomicBool,
    done: Notify,
}

impl Typewriter {
    pub fn new(
        message_id: impl Into<String>,
        sink: Arc<dyn AnimationSink>,
        schedule: DelaySchedule,
    ) -> Arc<Self> {
        Arc::new(Self {
            message_id: message_id.into(),
            sink,
            schedule,
            queue: Mutex::new(VecDeque::new()),
            delivered: Mutex::new(String::new()),
            turbo: AtomicBool::new(false),
            delivery_complete: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            done: Notify::new(),
        })
    }

    pub fn set_turbo(&self, on: bool) {
        self.turbo.store(on, Ordering::SeqCst);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// The full text delivered so far, independent of render progress.
    pub fn delivered_text(&self) -> String {
        self.delivered.lock().expect("delivered lock poisoned").clone()
    }

    /// Queues a delivered chunk for rendering and wakes the drain loop.
    pub fn push_text(self: &Arc<Self>, text: &str) {
        if text.is_empty() || self.finalized.load(Ordering::SeqCst) {
            return;
        }
        self.delivered
            .lock()
            .expect("delivered lock poisoned")
            .push_str(text);
        self.queue
            .lock()
            .expect("queue lock poisoned")
            .extend(text.chars());
        self.ensure_draining();
    }

    /// Signals that no more chunks will arrive; once the queue drains,
    /// the message is finalized.
    pub fn mark_delivery_complete(self: &Arc<Self>) {
        self.delivery_complete.store(true, Ordering::SeqCst);
        self.ensure_draining();
    }

    /// Error path: drops whatever is still queued, appends the suffix to
    /// the delivered text, and finalizes immediately instead of draining
    /// gracefully.
    pub async fn abort(self: &Arc<Self>, error_suffix: &str) {
        if self.finalized.load(Ordering::SeqCst) {
            return;
        }
        self.delivery_complete.store(true, Ordering::SeqCst);
        self.queue.lock().expect("queue lock poisoned").clear();
        if !error_suffix.is_empty() {
            self.delivered
                .lock()
                .expect("delivered lock poisoned")
                .push_str(error_suffix);
        }
        self.finalize_once().await;
    }

    /// Resolves once the finalization write has happened.
    pub async fn wait_until_finalized(&self) {
        loop {
            if self.finalized.load(Ordering::SeqCst) {
                return;
            }
            self.done.notified().await;
        }
    }

    fn ensure_draining(self: &Arc<Self>) {
        if self.draining.swap(true, Ordering::SeqCst) {
            // a drain loop is already running and will pick the queue up
            return;
        }
        let typewriter = Arc::clone(self);
        tokio::spawn(typewriter.drain());
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.queue.lock().expect("queue lock poisoned").pop_front();
            match next {
                Some(ch) => {
                    if self.finalized.load(Ordering::SeqCst) {
                        // aborted mid-drain; stop scheduling characters
                        self.draining.store(false, Ordering::SeqCst);
                        return;
                    }
                    let mut buf = [0u8; 4];
                    self.sink
                        .append_text(&self.message_id, ch.encode_utf8(&mut buf))
                        .await;
                    let turbo = self.turbo.load(Ordering::SeqCst);
                    tokio::time::sleep(self.schedule.delay_for(ch, turbo)).await;
                }
                None => {
                    let queue_empty =
                        self.queue.lock().expect("queue lock poisoned").is_empty();
                    if self.delivery_complete.load(Ordering::SeqCst) && queue_empty {
                        self.finalize_once().await;
                        self.draining.store(false, Ordering::SeqCst);
                        return;
                    }

                    self.draining.store(false, Ordering::SeqCst);
                    // close the gap: characters (or the completion signal)
                    // may have arrived between the empty pop and the flag
                    // store above, with that pusher seeing draining=true
                    let work_pending = !self
                        .queue
                        .lock()
                        .expect("queue lock poisoned")
                        .is_empty()
                        || self.delivery_complete.load(Ordering::SeqCst);
                    if work_pending && !self.draining.swap(true, Ordering::SeqCst) {
                        continue;
                    }
                    return;
                }
            }
        }
    }

    async fn finalize_once(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        let final_text = self
            .delivered
            .lock()
            .expect("delivered lock poisoned")
            .clone();
        self.sink.finalize(&self.message_id, &final_text).await;
        self.done.notify_one();
    }
}
