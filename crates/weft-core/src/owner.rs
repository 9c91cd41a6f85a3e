#![forbid(unsafe_code)]

//! The owner-thread token.
//!
//! Exactly one thread may touch UI state, run hook chains, and dispatch
//! messages. [`OwnerThread`] records that thread when it is created and every
//! owner-only entry point compares against it. A mismatch is a programming
//! error and panics; it is never reported as a recoverable `Result`.

use std::thread::{self, ThreadId};

/// Identifies the single thread permitted to mutate UI state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerThread {
    id: ThreadId,
}

impl OwnerThread {
    /// Capture the calling thread as the owner.
    #[must_use]
    pub fn current() -> Self {
        Self {
            id: thread::current().id(),
        }
    }

    /// The owner's thread id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Returns `true` when called from the owner thread.
    #[inline]
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Panic unless called from the owner thread.
    #[track_caller]
    pub fn assert_current(&self) {
        if !self.is_current() {
            let caller = thread::current();
            panic!(
                "weft: not the owner thread (owner {:?}, caller {:?} {:?})",
                self.id,
                caller.id(),
                caller.name().unwrap_or("<unnamed>"),
            );
        }
    }
}
