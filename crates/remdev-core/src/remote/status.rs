//! Status sinks the session reports to before and after every operation.
//!
//! Delivery is fire-and-forget: an observer that cannot deliver an update
//! drops it, and the session never sees a failure.

use tokio::sync::mpsc;

/// One status-bar update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub text: String,
    pub busy: bool,
}

/// Receives `(text, busy)` updates from the session.
pub trait StatusObserver: Send + Sync {
    fn update(&self, text: &str, busy: bool);
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl StatusObserver for NullObserver {
    fn update(&self, _text: &str, _busy: bool) {}
}

/// Logs updates through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl StatusObserver for TracingObserver {
    fn update(&self, text: &str, busy: bool) {
        if busy {
            tracing::debug!(status = text, "busy");
        } else {
            tracing::info!(status = text, "idle");
        }
    }
}

/// Forwards updates into an unbounded channel.
///
/// Once the receiver is dropped, updates are silently discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusObserver for ChannelObserver {
    fn update(&self, text: &str, busy: bool) {
        let _ = self.tx.send(StatusUpdate {
            text: text.to_string(),
            busy,
        });
    }
}
