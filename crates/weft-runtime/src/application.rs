#![forbid(unsafe_code)]

//! The shared half of the process context and the global init layer.
//!
//! [`Application`] is `Send + Sync` and lives in an `Arc`. It is what other
//! threads hold: it can enqueue work for the owner thread, start background
//! tasks, request exit and guard native callbacks. Owner-only state lives in
//! the [`Runtime`].
//!
//! # Global layer
//!
//! Most code passes the context explicitly. For collaborators that expect an
//! ambient singleton, [`init`] creates one on the calling thread (which
//! becomes the owner thread) and [`app`] returns it from anywhere afterwards.
//! [`append_to_init`] queues functions that must run during `init`.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use arc_swap::ArcSwapOption;
use weft_backend::MessagePump;
use weft_core::{FaultBoundary, Message, OwnerThread};

use crate::bridge::Bridge;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::event_loop::Runtime;
use crate::shutdown::{ShutdownSource, ShutdownToken};
use crate::tasks::TaskGroup;

/// The thread-safe half of the process context.
pub struct Application {
    owner: OwnerThread,
    pump: Arc<dyn MessagePump>,
    bridge: Arc<Bridge>,
    shutdown: ShutdownSource,
    exiting: AtomicBool,
    tasks: TaskGroup,
    boundary: FaultBoundary,
    task_thread_name: String,
    organization: ArcSwapOption<String>,
    product: ArcSwapOption<String>,
}

impl Application {
    pub(crate) fn new(
        owner: OwnerThread,
        pump: Arc<dyn MessagePump>,
        bridge: Arc<Bridge>,
        boundary: FaultBoundary,
        task_thread_name: String,
    ) -> Self {
        Self {
            owner,
            pump,
            bridge,
            shutdown: ShutdownSource::new(),
            exiting: AtomicBool::new(false),
            tasks: TaskGroup::new(),
            boundary,
            task_thread_name,
            organization: ArcSwapOption::empty(),
            product: ArcSwapOption::empty(),
        }
    }

    #[inline]
    pub fn owner(&self) -> OwnerThread {
        self.owner
    }

    #[inline]
    pub fn is_owner_thread(&self) -> bool {
        self.owner.is_current()
    }

    /// Panic unless called from the owner thread.
    #[track_caller]
    pub fn assert_owner_thread(&self) {
        self.owner.assert_current();
    }

    /// Run `f` on the owner thread during a later loop iteration.
    ///
    /// Closures run in submission order. Work submitted after the loop has
    /// terminated never runs.
    pub fn synchronize(&self, f: impl FnOnce() + Send + 'static) {
        self.bridge.synchronize(f);
    }

    /// Post a message to the owner thread's stream.
    pub fn post_message(&self, msg: Message) -> Result<(), RuntimeError> {
        self.pump.post(msg).map_err(RuntimeError::from)
    }

    /// Start a background task tied to application shutdown.
    ///
    /// Does nothing once exit has been requested. The task receives the
    /// shutdown token and must return promptly after it is cancelled;
    /// [`Runtime::run`] waits for every task before returning.
    pub fn go<F>(&self, f: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(ShutdownToken) + Send + 'static,
    {
        let token = self.shutdown.token();
        if token.is_cancelled() {
            tracing::debug!(target: "weft.task", "shutdown in progress; task not started");
            return Ok(());
        }
        self.tasks.spawn(&self.task_thread_name, token, move |token| {
            if token.is_cancelled() {
                return;
            }
            f(token);
        })
    }

    /// Number of live tasks started with [`go`](Self::go).
    pub fn pending_tasks(&self) -> usize {
        self.tasks.live()
    }

    /// Request loop termination with `exit_code`.
    ///
    /// Only the first call has any effect: it triggers shutdown with
    /// `exit_code` and posts the quit message, routing the post through the
    /// bridge when called off the owner thread.
    pub fn exit(&self, exit_code: i32) {
        if self
            .exiting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.shutdown.cancel(exit_code);
        tracing::info!(target: "weft.app", exit_code, "exit requested");

        if self.is_owner_thread() {
            self.pump.post_quit(exit_code);
        } else {
            let pump = Arc::clone(&self.pump);
            self.bridge.synchronize(move || pump.post_quit(exit_code));
        }
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Mark shutdown without posting quit (the loop has already ended).
    pub(crate) fn finish(&self, exit_code: i32) {
        self.exiting.store(true, Ordering::Release);
        self.shutdown.cancel(exit_code);
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.token()
    }

    /// Run `f` as a native callback: a panic inside it is redirected and the
    /// calling thread never returns.
    pub fn guard_native_callback<R>(&self, f: impl FnOnce() -> R) -> R {
        self.boundary.guard(f)
    }

    pub fn organization_name(&self) -> String {
        self.organization
            .load()
            .as_deref()
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_organization_name(&self, value: impl Into<String>) {
        self.organization.store(Some(Arc::new(value.into())));
    }

    pub fn product_name(&self) -> String {
        self.product.load().as_deref().cloned().unwrap_or_default()
    }

    pub fn set_product_name(&self, value: impl Into<String>) {
        self.product.store(Some(Arc::new(value.into())));
    }

    pub(crate) fn pump(&self) -> &Arc<dyn MessagePump> {
        &self.pump
    }

    pub(crate) fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub(crate) fn tasks(&self) -> &TaskGroup {
        &self.tasks
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("owner", &self.owner)
            .field("exiting", &self.is_exiting())
            .field("tasks", &self.tasks)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Global layer
// ---------------------------------------------------------------------------

type InitFn = Box<dyn FnOnce() + Send + 'static>;

static APP: OnceLock<Arc<Application>> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());
static PRE_INIT: Mutex<Option<Vec<InitFn>>> = Mutex::new(Some(Vec::new()));

thread_local! {
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Create the process-wide runtime on the calling thread.
///
/// The calling thread becomes the owner thread. Later calls from the owner
/// thread return the same runtime; calls from any other thread panic.
/// Functions queued with [`append_to_init`] run once, after the runtime is
/// built, and may themselves call `init` to reach the runtime. On error
/// nothing is initialized and `init` may be retried.
#[track_caller]
pub fn init(config: RuntimeConfig) -> Result<Runtime, RuntimeError> {
    let (rt, queued) = {
        let _serial = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(rt) = RUNTIME.with(|slot| slot.borrow().clone()) {
            return Ok(rt);
        }
        if let Some(existing) = APP.get() {
            existing.assert_owner_thread();
        }

        let rt = Runtime::new(config)?;
        if APP.set(Arc::clone(rt.app())).is_err() {
            panic!("weft: runtime already initialized on another thread");
        }
        RUNTIME.with(|slot| *slot.borrow_mut() = Some(rt.clone()));

        let queued = PRE_INIT
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_default();
        (rt, queued)
    };

    // Queued functions run unlocked: they may call `init` or `app` themselves.
    let count = queued.len();
    for f in queued {
        f();
    }
    tracing::info!(target: "weft.app", pre_init = count, "weft initialized");
    Ok(rt)
}

/// The process-wide application context. Callable from any thread.
///
/// # Panics
///
/// Panics if [`init`] has not completed.
#[track_caller]
pub fn app() -> Arc<Application> {
    match APP.get() {
        Some(app) => Arc::clone(app),
        None => panic!("weft::init must be called first"),
    }
}

/// The process-wide context, or `None` before [`init`].
pub fn try_app() -> Option<Arc<Application>> {
    APP.get().cloned()
}

/// Queue `f` to run during [`init`].
///
/// # Panics
///
/// Panics if called after `init` has run.
#[track_caller]
pub fn append_to_init(f: impl FnOnce() + Send + 'static) {
    let mut queue = PRE_INIT.lock().unwrap_or_else(|e| e.into_inner());
    match queue.as_mut() {
        Some(pending) => pending.push(Box::new(f)),
        None => panic!("weft::append_to_init cannot be called after weft::init"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use weft_backend::QueuePump;
    use weft_core::codes;

    fn app_with_pump() -> (Arc<QueuePump>, Application) {
        let pump = Arc::new(QueuePump::new());
        let bridge = Arc::new(Bridge::new(pump.clone(), codes::APP, codes::APP + 1));
        let app = Application::new(
            OwnerThread::current(),
            pump.clone(),
            bridge,
            FaultBoundary::aborting(),
            "test-task".into(),
        );
        (pump, app)
    }

    #[test]
    fn exit_on_owner_posts_quit_once() {
        let (pump, app) = app_with_pump();
        app.exit(4);
        app.exit(5);
        assert!(app.is_exiting());
        assert_eq!(app.shutdown_token().exit_code(), Some(4));
        let quit = pump.peek().unwrap();
        assert!(quit.is_quit());
        assert_eq!(quit.exit_code(), 4);
        assert!(pump.peek().is_none());
    }

    #[test]
    fn exit_off_owner_goes_through_bridge() {
        let (pump, app) = app_with_pump();
        let app = Arc::new(app);
        let remote = Arc::clone(&app);
        thread::spawn(move || remote.exit(9)).join().unwrap();

        let wake = pump.peek().unwrap();
        assert!(!wake.is_quit());
        assert!(app.bridge().run_one());
        let quit = pump.peek().unwrap();
        assert_eq!(quit.exit_code(), 9);
    }

    #[test]
    fn go_is_skipped_after_exit() {
        let (_pump, app) = app_with_pump();
        app.exit(0);
        app.go(|_| panic!("must not start")).unwrap();
        assert_eq!(app.pending_tasks(), 0);
    }

    #[test]
    fn go_task_observes_shutdown() {
        let (_pump, app) = app_with_pump();
        app.go(|token| token.wait()).unwrap();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(app.pending_tasks(), 1);
        app.exit(0);
        app.tasks().wait();
        assert_eq!(app.pending_tasks(), 0);
    }

    #[test]
    fn names_default_empty_and_settable_from_any_thread() {
        let (_pump, app) = app_with_pump();
        assert_eq!(app.organization_name(), "");
        let app = Arc::new(app);
        let remote = Arc::clone(&app);
        thread::spawn(move || {
            remote.set_organization_name("Acme");
            remote.set_product_name("Loom");
        })
        .join()
        .unwrap();
        assert_eq!(app.organization_name(), "Acme");
        assert_eq!(app.product_name(), "Loom");
    }

    #[test]
    fn post_message_fails_after_close() {
        let (pump, app) = app_with_pump();
        pump.close();
        assert!(matches!(
            app.post_message(Message::thread(codes::NULL)),
            Err(RuntimeError::Pump(_))
        ));
    }
}
