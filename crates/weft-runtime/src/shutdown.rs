#![forbid(unsafe_code)]

//! Application shutdown signal.
//!
//! The [`Application`](crate::Application) owns one [`ShutdownSource`]. The
//! first `exit` (or the end of the top-level loop) triggers it with the exit
//! code the process is leaving with. Background tasks started with `go` hold
//! a [`ShutdownToken`] and watch it; nothing is ever interrupted, a task just
//! returns once it notices.
//!
//! ```
//! use weft_runtime::ShutdownSource;
//! use std::time::Duration;
//!
//! let source = ShutdownSource::new();
//! let token = source.token();
//! let poller = std::thread::spawn(move || {
//!     while !token.wait_timeout(Duration::from_millis(5)) {
//!         // poll for work
//!     }
//!     token.exit_code()
//! });
//! source.cancel(3);
//! assert_eq!(poller.join().unwrap(), Some(3));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use web_time::{Duration, Instant};

struct Signal {
    /// Mirrors `exit_code.is_some()` for lock-free polling.
    triggered: AtomicBool,
    exit_code: Mutex<Option<i32>>,
    changed: Condvar,
}

impl Signal {
    fn code(&self) -> MutexGuard<'_, Option<i32>> {
        self.exit_code.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Triggers shutdown. Held by the application.
///
/// Dropping the source leaves its tokens untriggered.
pub struct ShutdownSource {
    signal: Arc<Signal>,
}

/// Watches for shutdown. Cheap to clone and `Send`.
#[derive(Clone)]
pub struct ShutdownToken {
    signal: Arc<Signal>,
}

impl ShutdownSource {
    pub fn new() -> Self {
        Self {
            signal: Arc::new(Signal {
                triggered: AtomicBool::new(false),
                exit_code: Mutex::new(None),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal: Arc::clone(&self.signal),
        }
    }

    /// Begin shutdown with `exit_code` and wake every waiting task.
    ///
    /// The first call wins and returns `true`; later calls keep the first
    /// exit code and return `false`.
    pub fn cancel(&self, exit_code: i32) -> bool {
        let mut code = self.signal.code();
        if code.is_some() {
            return false;
        }
        *code = Some(exit_code);
        self.signal.triggered.store(true, Ordering::Release);
        drop(code);
        self.signal.changed.notify_all();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.triggered.load(Ordering::Acquire)
    }
}

impl Default for ShutdownSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSource")
            .field("exit_code", &*self.signal.code())
            .finish()
    }
}

impl ShutdownToken {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.signal.triggered.load(Ordering::Acquire)
    }

    /// The exit code shutdown began with, once it has begun.
    pub fn exit_code(&self) -> Option<i32> {
        *self.signal.code()
    }

    /// Block until shutdown begins.
    pub fn wait(&self) {
        let mut code = self.signal.code();
        while code.is_none() {
            code = self
                .signal
                .changed
                .wait(code)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until shutdown begins or `timeout` elapses.
    ///
    /// Returns whether shutdown has begun.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut code = self.signal.code();
        while code.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            code = self
                .signal
                .changed
                .wait_timeout(code, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        true
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("exit_code", &self.exit_code())
            .finish()
    }
}
