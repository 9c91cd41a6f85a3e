#![forbid(unsafe_code)]

//! Fault isolation for native callback entry points.
//!
//! When the windowing system calls back into application code, a panic must
//! never unwind through the native frames underneath. [`FaultBoundary::guard`]
//! catches the panic, packages it as a [`RedirectedPanic`] together with the
//! stack of the panicking thread, and hands it to an [`Escalate`]
//! implementation on a freshly spawned thread. The original thread is then
//! parked forever: it neither returns to native code nor resumes unwinding.
//!
//! # Backtraces
//!
//! `catch_unwind` only sees the payload, not the stack that produced it. The
//! first boundary installs a chained panic hook; while a boundary is armed on
//! the current thread the hook records `Backtrace::force_capture()` into a
//! thread-local slot that the boundary collects after the catch. Panics on
//! threads with no armed boundary go straight to the previous hook.
//!
//! # Escalation
//!
//! [`AbortProcess`] (the default) re-panics on the escalation thread with the
//! full fault text and aborts while unwinding, so the process dies loudly.
//! Embedders and tests can inject any `Fn(RedirectedPanic) + Send + Sync`.
//!
//! Unwinding must be enabled for the boundary to work; under
//! `panic = "abort"` the process terminates at the original panic site.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use tracing::error;

/// Name of the thread a redirected panic is re-raised on.
pub const REDIRECT_THREAD_NAME: &str = "weft-redirected-panic";

thread_local! {
    static ARMED: Cell<u32> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

fn install_panic_hook() {
    static HOOK: OnceLock<()> = OnceLock::new();
    HOOK.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let armed = ARMED.try_with(Cell::get).unwrap_or(0) > 0;
            if armed {
                let _ = CAPTURED.try_with(|slot| {
                    *slot.borrow_mut() = Some(Backtrace::force_capture());
                });
                // Reported by the boundary once caught.
                return;
            }
            previous(info);
        }));
    });
}

/// Marks the current thread as running inside a boundary.
struct Armed;

impl Armed {
    fn enter() -> Self {
        ARMED.with(|n| n.set(n.get() + 1));
        Armed
    }
}

impl Drop for Armed {
    fn drop(&mut self) {
        let remaining = ARMED.with(|n| {
            let v = n.get().saturating_sub(1);
            n.set(v);
            v
        });
        if remaining == 0 {
            CAPTURED.with(|slot| slot.borrow_mut().take());
        }
    }
}

fn take_captured_backtrace() -> Option<Backtrace> {
    CAPTURED.with(|slot| slot.borrow_mut().take())
}

/// A panic caught at a native callback boundary.
pub struct RedirectedPanic {
    message: String,
    payload: Option<Box<dyn Any + Send>>,
    backtrace: Option<Backtrace>,
    origin_thread: ThreadId,
    origin_name: Option<String>,
}

impl RedirectedPanic {
    /// Package a caught panic payload raised on the current thread.
    #[must_use]
    pub fn from_payload(payload: Box<dyn Any + Send>, backtrace: Option<Backtrace>) -> Self {
        let current = thread::current();
        let message = payload_message(payload.as_ref());
        Self {
            message,
            payload: Some(payload),
            backtrace,
            origin_thread: current.id(),
            origin_name: current.name().map(str::to_owned),
        }
    }

    /// Human-readable panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stack of the panicking thread, when the panic hook captured one.
    #[must_use]
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_ref()
    }

    #[must_use]
    pub fn origin_thread(&self) -> ThreadId {
        self.origin_thread
    }

    #[must_use]
    pub fn origin_thread_name(&self) -> Option<&str> {
        self.origin_name.as_deref()
    }

    /// Take the original payload, e.g. to `resume_unwind` it elsewhere.
    pub fn take_payload(&mut self) -> Option<Box<dyn Any + Send>> {
        self.payload.take()
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(inner) = payload.downcast_ref::<RedirectedPanic>() {
        inner.message.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}

impl fmt::Debug for RedirectedPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectedPanic")
            .field("message", &self.message)
            .field("origin_thread", &self.origin_thread)
            .field("origin_name", &self.origin_name)
            .field("has_backtrace", &self.backtrace.is_some())
            .finish()
    }
}

impl fmt::Display for RedirectedPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        let origin = self.origin_name.as_deref().unwrap_or("<unnamed>");
        match &self.backtrace {
            Some(bt) => write!(
                f,
                "\n\nstack of the original panic on thread '{origin}':\n{bt}"
            ),
            None => write!(f, "\n\n(no stack captured on thread '{origin}')"),
        }
    }
}

/// Receives faults caught by a [`FaultBoundary`].
///
/// Runs on a dedicated thread; the process is expected to terminate.
pub trait Escalate: Send + Sync + 'static {
    fn escalate(&self, fault: RedirectedPanic);
}

impl<F> Escalate for F
where
    F: Fn(RedirectedPanic) + Send + Sync + 'static,
{
    fn escalate(&self, fault: RedirectedPanic) {
        self(fault)
    }
}

/// Re-panic with the full fault text, then abort the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortProcess;

impl Escalate for AbortProcess {
    fn escalate(&self, fault: RedirectedPanic) {
        struct AbortOnDrop;
        impl Drop for AbortOnDrop {
            fn drop(&mut self) {
                std::process::abort();
            }
        }
        let _abort = AbortOnDrop;
        panic!("{fault}");
    }
}

/// The fire-wall wrapped around every native-to-application callback.
#[derive(Clone)]
pub struct FaultBoundary {
    escalation: Arc<dyn Escalate>,
}

impl FaultBoundary {
    pub fn new(escalation: impl Escalate) -> Self {
        Self {
            escalation: Arc::new(escalation),
        }
    }

    /// Boundary that aborts the process on any caught panic.
    pub fn aborting() -> Self {
        Self::new(AbortProcess)
    }

    /// Run `f`; a panic inside it is redirected and this call never returns.
    pub fn guard<R>(&self, f: impl FnOnce() -> R) -> R {
        install_panic_hook();
        let armed = Armed::enter();
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => value,
            Err(payload) => {
                let backtrace = take_captured_backtrace();
                drop(armed);
                self.redirect(RedirectedPanic::from_payload(payload, backtrace))
            }
        }
    }

    /// Escalate `fault` on a new thread and park the calling thread forever.
    pub fn redirect(&self, fault: RedirectedPanic) -> ! {
        error!(
            target: "weft.fault",
            origin = fault.origin_thread_name().unwrap_or("<unnamed>"),
            panic = fault.message(),
            backtrace = fault.backtrace().is_some(),
            "panic in native callback; redirecting"
        );
        let escalation = Arc::clone(&self.escalation);
        let spawned = thread::Builder::new()
            .name(REDIRECT_THREAD_NAME.into())
            .spawn(move || escalation.escalate(fault));
        if let Err(err) = spawned {
            error!(target: "weft.fault", error = %err, "cannot spawn escalation thread");
            std::process::abort();
        }
        loop {
            thread::park();
        }
    }
}

impl Default for FaultBoundary {
    fn default() -> Self {
        Self::aborting()
    }
}

impl fmt::Debug for FaultBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultBoundary").finish_non_exhaustive()
    }
}
