#![forbid(unsafe_code)]

//! Background tasks tied to application shutdown.
//!
//! [`TaskGroup`] counts live tasks so that the top-level loop can wait for all
//! of them after it exits. Each task thread holds a [`TaskGuard`]; dropping it
//! (normal return or panic) decrements the count.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::shutdown::ShutdownToken;

#[derive(Default)]
struct GroupInner {
    live: Mutex<usize>,
    idle: Condvar,
}

/// Tracks running background tasks.
#[derive(Clone, Default)]
pub struct TaskGroup {
    inner: Arc<GroupInner>,
}

/// Decrements the group when dropped.
pub struct TaskGuard {
    inner: Arc<GroupInner>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one live task.
    pub fn enter(&self) -> TaskGuard {
        *self.inner.live.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        TaskGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of live tasks.
    pub fn live(&self) -> usize {
        *self.inner.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until no task is live.
    pub fn wait(&self) {
        let mut live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        while *live > 0 {
            live = self
                .inner
                .idle
                .wait(live)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Spawn `f` on a named thread tracked by this group.
    ///
    /// The task receives the shutdown token and should return once it is
    /// cancelled.
    pub fn spawn<F>(&self, name: &str, token: ShutdownToken, f: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(ShutdownToken) + Send + 'static,
    {
        let guard = self.enter();
        let spawned = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let _guard = guard;
                debug!(target: "weft.task", "task started");
                f(token);
                debug!(target: "weft.task", "task finished");
            });
        match spawned {
            Ok(_) => Ok(()),
            Err(source) => {
                warn!(target: "weft.task", thread = name, error = %source, "task spawn failed");
                Err(RuntimeError::Spawn {
                    name: name.to_owned(),
                    source,
                })
            }
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.inner.idle.notify_all();
        }
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("live", &self.live())
            .finish()
    }
}
