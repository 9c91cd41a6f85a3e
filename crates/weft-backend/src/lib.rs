#![forbid(unsafe_code)]
#![doc = "Message pump seam for weft: the owner thread's message stream."]
#![doc = ""]
#![doc = "This crate defines the boundary between the weft runtime and the platform"]
#![doc = "message queue. The runtime only ever fetches, waits on, translates and posts"]
#![doc = "messages through [`MessagePump`]; [`QueuePump`] is the in-process"]
#![doc = "implementation used by tests and by embedders without a native queue."]

use web_time::Duration;

use weft_core::Message;

mod queue;

pub use queue::QueuePump;

/// Errors reported by a message pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PumpError {
    /// The pump no longer accepts or yields messages.
    #[error("message pump is closed")]
    Closed,
}

/// The owner thread's message stream.
///
/// Posting is allowed from any thread. Fetching, waiting and translating are
/// only ever called by the owner thread's loops.
pub trait MessagePump: Send + Sync {
    /// Append `msg` to the stream.
    fn post(&self, msg: Message) -> Result<(), PumpError>;

    /// Request loop termination with `exit_code`.
    ///
    /// The quit message is delivered only after every message already posted
    /// has been fetched. A later call replaces the pending exit code.
    fn post_quit(&self, exit_code: i32);

    /// Block until a message is available and remove it.
    ///
    /// Returns [`PumpError::Closed`] once the pump is closed and drained.
    fn get(&self) -> Result<Message, PumpError>;

    /// Remove the next message without blocking.
    fn peek(&self) -> Option<Message>;

    /// Block until a message is pending or `timeout` elapses.
    ///
    /// `None` waits without limit. Returns `true` if a message is pending (or
    /// the pump was closed, so the caller should fetch and observe it).
    fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Translation step between pre-translate hooks and dispatch.
    fn translate(&self, _msg: &Message) {}

    /// Stop accepting posts and wake every waiter.
    fn close(&self);

    /// Whether [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;

    /// Number of queued messages, not counting a pending quit.
    fn pending(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pump_is_object_safe_and_shareable() {
        let pump: Arc<dyn MessagePump> = Arc::new(QueuePump::new());
        let clone = Arc::clone(&pump);
        std::thread::spawn(move || clone.post(Message::thread(weft_core::codes::NULL)))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(pump.pending(), 1);
    }

    #[test]
    fn error_display() {
        assert_eq!(PumpError::Closed.to_string(), "message pump is closed");
    }
}
