//! Sending side of typing indicators.
//!
//! Keystrokes are collapsed into bursts: the first keystroke of a burst announces
//! `is_typing: true`, and the burst ends after [`TYPING_IDLE_TIMEOUT`] without input or
//! when the message is sent, announcing `is_typing: false`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::frames::OutboundFrame;

pub const TYPING_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Something that can put an outbound frame on the wire.
pub trait FrameSink: Send + Sync {
    /// Returns whether the frame was accepted for sending.
    fn send_frame(&self, frame: &OutboundFrame) -> bool;
}

#[derive(Default)]
struct Burst {
    active: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct TypingIndicator {
    sink: Arc<dyn FrameSink>,
    conversation_id: String,
    user_id: String,
    idle: Duration,
    burst: Arc<Mutex<Burst>>,
}

fn lock(burst: &Mutex<Burst>) -> MutexGuard<'_, Burst> {
    burst.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TypingIndicator {
    pub fn new(
        sink: Arc<dyn FrameSink>,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::with_idle_timeout(sink, conversation_id, user_id, TYPING_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(
        sink: Arc<dyn FrameSink>,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        idle: Duration,
    ) -> Self {
        Self {
            sink,
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            idle,
            burst: Arc::new(Mutex::new(Burst::default())),
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.burst).active
    }

    fn frame(&self, is_typing: bool) -> OutboundFrame {
        OutboundFrame::typing(&self.conversation_id, &self.user_id, is_typing)
    }

    /// Call on every keystroke in the composer. Must run inside a tokio runtime.
    pub fn on_input(&self) {
        let mut burst = lock(&self.burst);
        if !burst.active {
            burst.active = true;
            self.sink.send_frame(&self.frame(true));
        }
        if let Some(timer) = burst.timer.take() {
            timer.abort();
        }
        burst.generation = burst.generation.wrapping_add(1);

        let generation = burst.generation;
        let state = Arc::clone(&self.burst);
        let sink = Arc::clone(&self.sink);
        let stop = self.frame(false);
        let idle = self.idle;
        burst.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let mut burst = lock(&state);
            // A newer keystroke re-armed the timer after this one fired.
            if burst.generation != generation || !burst.active {
                return;
            }
            burst.active = false;
            burst.timer = None;
            debug!("typing burst ended after idle timeout");
            sink.send_frame(&stop);
        }));
    }

    /// Call when the message is sent; ends the burst immediately.
    pub fn on_send(&self) {
        let mut burst = lock(&self.burst);
        if let Some(timer) = burst.timer.take() {
            timer.abort();
        }
        burst.generation = burst.generation.wrapping_add(1);
        if burst.active {
            burst.active = false;
            self.sink.send_frame(&self.frame(false));
        }
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.burst).timer.take() {
            timer.abort();
        }
    }
}
