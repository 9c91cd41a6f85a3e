#![forbid(unsafe_code)]

//! The owner-thread event loop.
//!
//! [`Runtime`] is the owner half of the process context. It is `!Send`: it is
//! created on the owner thread and never leaves it. Clones are cheap handles
//! to the same state.
//!
//! # Top-level loop
//!
//! [`Runtime::run`] blocks on the pump and, for every message until quit:
//!
//! 1. offers it to the pre-translate chain (global handlers in registration
//!    order, then the handler keyed to the destination; the first `true`
//!    consumes the message),
//! 2. translates and dispatches it through the fault boundary,
//! 3. runs the destination's post-dispatch capability, if registered,
//! 4. starts every layout scheduled during the iteration.
//!
//! The top-level loop does not nest: entering it while any loop is active
//! panics.
//!
//! # Modal loop
//!
//! [`Runtime::run_modal`] nests freely. It peeks without blocking, waits when
//! the stream is empty, and runs until the modal stops running. A quit
//! message ends it immediately and is re-posted so enclosing loops end too.
//! Only the modal's own pre-translate runs; global handlers are for the
//! top-level loop.
//!
//! # Dispatch
//!
//! Messages for [`TargetId::APPLICATION`] drive the bridge. Other messages go
//! to the registered window procedure of their destination; input addressed
//! to a disabled target is discarded. Interactive-resize codes addressed to a
//! registered form toggle the layout rendezvous before the procedure runs.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use ahash::AHashMap;
use weft_backend::{MessagePump, QueuePump};
use weft_core::{
    Escalate, FaultBoundary, IdAllocator, Message, MessageCodeAllocator, OwnerThread, TargetId,
    codes,
};

use crate::application::Application;
use crate::bridge::{Bridge, Wakeup};
use crate::config::{ConfigError, RuntimeConfig};
use crate::error::RuntimeError;
use crate::hooks::{
    HookRegistry, MessageFilter, PostDispatchHandler, PreTranslateHandler, TargetRegistration,
    TargetTable,
};
use crate::layout::{
    Completion, FormId, FormLayout, LayoutPerformer, LayoutPhase, LayoutRequest, LayoutResult,
    LayoutSink, LayoutStats,
};
use crate::modal::{DepthGuard, DisposeGuard, EnableGuard, Modal};

#[derive(Default)]
struct ScheduledLayouts {
    order: Vec<FormId>,
    completions: AHashMap<FormId, Vec<Completion>>,
}

struct Inner {
    app: Arc<Application>,
    config: RuntimeConfig,
    performer: LayoutPerformer,
    ids: RefCell<IdAllocator>,
    message_codes: RefCell<MessageCodeAllocator>,
    depth: Cell<u32>,
    hooks: RefCell<HookRegistry>,
    targets: RefCell<TargetTable>,
    forms: RefCell<AHashMap<FormId, Rc<dyn FormLayout>>>,
    scheduled: RefCell<ScheduledLayouts>,
    filter: RefCell<Option<Rc<dyn MessageFilter>>>,
    filters_enabled: Cell<bool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.performer.stop();
        self.app.pump().close();
        tracing::debug!(target: "weft.app", "runtime dropped");
    }
}

/// Owner-thread handle to the runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

/// Configures and builds a [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    pump: Option<Arc<dyn MessagePump>>,
    boundary: Option<FaultBoundary>,
}

impl RuntimeBuilder {
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `pump` instead of a fresh [`QueuePump`].
    #[must_use]
    pub fn pump(mut self, pump: Arc<dyn MessagePump>) -> Self {
        self.pump = Some(pump);
        self
    }

    /// Replace the default process-aborting escalation.
    #[must_use]
    pub fn escalation(mut self, escalation: impl Escalate) -> Self {
        self.boundary = Some(FaultBoundary::new(escalation));
        self
    }

    /// Build the runtime on the calling thread, which becomes the owner.
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let config = self.config;
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors).into());
        }

        let owner = OwnerThread::current();
        let pump: Arc<dyn MessagePump> = match self.pump {
            Some(pump) => pump,
            None => Arc::new(QueuePump::new()),
        };

        let mut message_codes =
            MessageCodeAllocator::new(config.messages.first, config.messages.limit);
        let work_code = message_codes.alloc()?;
        let layout_code = message_codes.alloc()?;
        let bridge = Arc::new(Bridge::new(Arc::clone(&pump), work_code, layout_code));

        let sink: Arc<dyn LayoutSink> = bridge.clone();
        let performer = LayoutPerformer::spawn(&config.layout.worker_name, sink)?;

        let app = Arc::new(Application::new(
            owner,
            pump,
            bridge,
            self.boundary.unwrap_or_default(),
            config.tasks.thread_name.clone(),
        ));

        tracing::info!(
            target: "weft.app",
            ids = config.ids.capacity,
            work_code,
            layout_code,
            "runtime created"
        );

        Ok(Runtime {
            inner: Rc::new(Inner {
                ids: RefCell::new(IdAllocator::new(config.ids.capacity, config.ids.reserved)),
                message_codes: RefCell::new(message_codes),
                depth: Cell::new(0),
                hooks: RefCell::new(HookRegistry::default()),
                targets: RefCell::new(TargetTable::default()),
                forms: RefCell::new(AHashMap::new()),
                scheduled: RefCell::new(ScheduledLayouts::default()),
                filter: RefCell::new(None),
                filters_enabled: Cell::new(config.modal.message_filters),
                app,
                performer,
                config,
            }),
        })
    }
}

impl Runtime {
    /// Build a runtime with `config` on the calling thread.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// The shared, thread-safe half of the context.
    #[inline]
    pub fn app(&self) -> &Arc<Application> {
        &self.inner.app
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[track_caller]
    fn assert_owner(&self) {
        self.inner.app.assert_owner_thread();
    }

    /// Number of active loops (top-level and modal).
    pub fn loop_depth(&self) -> u32 {
        self.inner.depth.get()
    }

    // -- Loops ------------------------------------------------------------

    /// Run the top-level loop until quit, then wait for background tasks.
    ///
    /// Returns the exit code carried by the quit message.
    ///
    /// # Panics
    ///
    /// Panics off the owner thread, or when any loop is already active.
    #[track_caller]
    pub fn run(&self) -> i32 {
        self.assert_owner();
        let exit_code = self.run_main_loop();

        self.inner.app.finish(exit_code);
        let pending = self.inner.app.pending_tasks();
        if pending > 0 {
            tracing::debug!(target: "weft.task", pending, "waiting for background tasks");
        }
        self.inner.app.tasks().wait();
        exit_code
    }

    #[track_caller]
    fn run_main_loop(&self) -> i32 {
        if self.inner.depth.get() != 0 {
            panic!("weft: unexpected nesting of top-level message loop");
        }
        let _depth = DepthGuard::enter(&self.inner.depth);
        let _span = tracing::debug_span!(target: "weft.loop", "main_loop").entered();
        tracing::debug!(target: "weft.loop", depth = 1, "top-level loop started");

        let pump = Arc::clone(self.inner.app.pump());
        let exit_code = loop {
            let msg = match pump.get() {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::warn!(target: "weft.loop", error = %err, "message stream ended without quit");
                    break 0;
                }
            };
            if msg.is_quit() {
                break msg.exit_code();
            }

            if !self.run_pre_translate(&msg) {
                pump.translate(&msg);
                if let Some(post) = self.dispatch(&msg) {
                    post.post_dispatch();
                }
            }
            self.flush_scheduled_layouts();
        };

        tracing::debug!(target: "weft.loop", exit_code, "top-level loop finished");
        exit_code
    }

    /// Run a nested loop for `modal` until it stops running.
    ///
    /// The modal's owner window is disabled for the duration and the modal is
    /// disposed on return; both hold on every exit path, unwinding included.
    #[track_caller]
    pub fn run_modal(&self, modal: &dyn Modal) {
        self.assert_owner();
        let _depth = DepthGuard::enter(&self.inner.depth);
        let _dispose = DisposeGuard { modal };
        let _enable = EnableGuard::disable(self, modal.owner());

        let depth = self.inner.depth.get();
        let _span = tracing::debug_span!(target: "weft.modal", "modal_loop", depth).entered();
        tracing::debug!(target: "weft.modal", depth, "modal loop entered");

        modal.enter_mode(self);

        let pump = Arc::clone(self.inner.app.pump());
        while modal.running() {
            let Some(msg) = pump.peek() else {
                if pump.is_closed() {
                    tracing::warn!(target: "weft.modal", depth, "message stream closed under modal loop");
                    return;
                }
                if modal.running() {
                    pump.wait(None);
                }
                continue;
            };

            if msg.is_quit() {
                // Re-post so every enclosing loop also ends.
                pump.post_quit(msg.exit_code());
                tracing::debug!(target: "weft.modal", depth, exit_code = msg.exit_code(), "quit observed in modal loop");
                return;
            }

            if self.run_message_filter(depth, &msg) {
                continue;
            }
            if !modal.pre_translate(&msg) {
                pump.translate(&msg);
                self.dispatch(&msg);
                if let Some(post) = modal.post_dispatch() {
                    post.post_dispatch();
                }
            }
            self.flush_scheduled_layouts();
        }
        tracing::debug!(target: "weft.modal", depth, "modal loop left");
    }

    fn run_pre_translate(&self, msg: &Message) -> bool {
        let chain = self.inner.hooks.borrow().chain_for(msg);
        chain.iter().any(|handler| handler.pre_translate(msg))
    }

    fn run_message_filter(&self, depth: u32, msg: &Message) -> bool {
        if !self.inner.filters_enabled.get() {
            return false;
        }
        let filter = self.inner.filter.borrow().clone();
        match filter {
            Some(filter) => {
                let code = codes::MSGF_USER.saturating_add(i32::try_from(depth).unwrap_or(i32::MAX));
                filter.filter(code, msg)
            }
            None => false,
        }
    }

    /// Dispatch `msg` to its destination inside the fault boundary.
    ///
    /// Returns the destination's post-dispatch capability.
    fn dispatch(&self, msg: &Message) -> Option<Rc<dyn PostDispatchHandler>> {
        let Some(target) = msg.target else {
            tracing::trace!(target: "weft.loop", code = msg.code, "thread message not dispatched");
            return None;
        };
        let app = Arc::clone(&self.inner.app);
        app.guard_native_callback(|| self.dispatch_to(target, msg))
    }

    fn dispatch_to(
        &self,
        target: TargetId,
        msg: &Message,
    ) -> Option<Rc<dyn PostDispatchHandler>> {
        if target == TargetId::APPLICATION {
            let bridge = self.inner.app.bridge();
            match bridge.wakeup(msg) {
                Some(Wakeup::Work) => {
                    bridge.run_one();
                }
                Some(Wakeup::Layout) => self.apply_layout_batch(),
                None => {
                    tracing::trace!(target: "weft.loop", code = msg.code, "unhandled application message")
                }
            }
            return None;
        }

        if self.is_form(target) {
            match msg.code {
                codes::ENTER_SIZE_MOVE => self.enter_size_move(target),
                codes::EXIT_SIZE_MOVE => self.exit_size_move(target),
                _ => {}
            }
        }

        let resolved = self.inner.targets.borrow().resolve(target);
        let Some(resolved) = resolved else {
            tracing::trace!(target: "weft.loop", dest = target.get(), code = msg.code, "no registered target");
            return None;
        };
        if !resolved.enabled && codes::is_input(msg.code) {
            tracing::trace!(target: "weft.loop", dest = target.get(), code = msg.code, "input to disabled target discarded");
            return None;
        }
        resolved.proc_.handle(self, msg);
        resolved.post_dispatch
    }

    // -- Hooks and targets -----------------------------------------------

    /// Append a handler that sees every message of the top-level loop.
    ///
    /// Global handlers cannot be removed.
    #[track_caller]
    pub fn add_global_pre_translate_handler(&self, handler: impl PreTranslateHandler + 'static) {
        self.assert_owner();
        let mut hooks = self.inner.hooks.borrow_mut();
        hooks.add_global(Rc::new(handler));
        tracing::trace!(target: "weft.loop", globals = hooks.global_count(), "global pre-translate handler added");
    }

    /// Install the handler for messages addressed to `target`.
    ///
    /// Returns `true` if it replaced an existing handler.
    #[track_caller]
    pub fn add_pre_translate_handler_for(
        &self,
        target: TargetId,
        handler: impl PreTranslateHandler + 'static,
    ) -> bool {
        self.assert_owner();
        self.inner
            .hooks
            .borrow_mut()
            .set_for(target, Rc::new(handler))
            .is_some()
    }

    #[track_caller]
    pub fn remove_pre_translate_handler_for(&self, target: TargetId) -> bool {
        self.assert_owner();
        self.inner.hooks.borrow_mut().remove_for(target)
    }

    /// Register the window procedure for `target`. Returns `true` if it
    /// replaced a previous registration.
    ///
    /// # Panics
    ///
    /// Panics for [`TargetId::APPLICATION`], which the runtime owns.
    #[track_caller]
    pub fn register_target(&self, target: TargetId, registration: TargetRegistration) -> bool {
        self.assert_owner();
        assert!(
            target != TargetId::APPLICATION,
            "weft: the application target is reserved"
        );
        tracing::trace!(
            target: "weft.loop",
            dest = target.get(),
            post_dispatch = registration.has_post_dispatch(),
            "target registered"
        );
        self.inner.targets.borrow_mut().register(target, registration)
    }

    /// Remove `target` and its per-target pre-translate handler.
    #[track_caller]
    pub fn unregister_target(&self, target: TargetId) -> bool {
        self.assert_owner();
        self.inner.hooks.borrow_mut().remove_for(target);
        self.inner.targets.borrow_mut().unregister(target)
    }

    pub fn is_target_registered(&self, target: TargetId) -> bool {
        self.inner.targets.borrow().contains(target)
    }

    /// Enable or disable input to `target`. Returns the previous state.
    #[track_caller]
    pub fn set_target_enabled(&self, target: TargetId, enabled: bool) -> bool {
        self.assert_owner();
        self.inner.targets.borrow_mut().set_enabled(target, enabled)
    }

    pub fn is_target_enabled(&self, target: TargetId) -> bool {
        self.inner.targets.borrow().is_enabled(target)
    }

    /// Install (or clear) the modal message filter.
    #[track_caller]
    pub fn set_message_filter(&self, filter: Option<Rc<dyn MessageFilter>>) {
        self.assert_owner();
        *self.inner.filter.borrow_mut() = filter;
    }

    /// Offer modal-loop messages to the filter. Off unless configured.
    #[track_caller]
    pub fn enable_message_filter_hooks(&self, enabled: bool) {
        self.assert_owner();
        self.inner.filters_enabled.set(enabled);
    }

    // -- Identifiers -----------------------------------------------------

    #[track_caller]
    pub fn allocate_id(&self) -> Result<u32, RuntimeError> {
        self.assert_owner();
        Ok(self.inner.ids.borrow_mut().allocate()?)
    }

    /// Return `id` to the pool. Predefined ids are ignored.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not currently allocated.
    #[track_caller]
    pub fn free_id(&self, id: u32) {
        self.assert_owner();
        self.inner.ids.borrow_mut().free(id);
    }

    /// Reserve a fresh application-defined message code.
    #[track_caller]
    pub fn alloc_message_code(&self) -> Result<u32, RuntimeError> {
        self.assert_owner();
        Ok(self.inner.message_codes.borrow_mut().alloc()?)
    }

    // -- Layout ----------------------------------------------------------

    /// Attach the layout side of form `form`.
    #[track_caller]
    pub fn register_form(&self, form: FormId, layout: Rc<dyn FormLayout>) {
        self.assert_owner();
        self.inner.forms.borrow_mut().insert(form, layout);
    }

    /// Detach `form`, dropping any queued or in-flight layout for it.
    #[track_caller]
    pub fn unregister_form(&self, form: FormId) {
        self.assert_owner();
        self.inner.forms.borrow_mut().remove(&form);
        {
            let mut scheduled = self.inner.scheduled.borrow_mut();
            scheduled.order.retain(|f| *f != form);
            scheduled.completions.remove(&form);
        }
        self.inner.performer.forget(form);
        self.inner.app.bridge().forget_layout(form);
    }

    fn is_form(&self, form: FormId) -> bool {
        self.inner.forms.borrow().contains_key(&form)
    }

    /// Queue a layout pass for `form` now.
    ///
    /// Returns `false` when the form is unknown, has nothing to lay out, is
    /// in interactive resize (use
    /// [`perform_interactive_layout`](Self::perform_interactive_layout)), or
    /// the worker has stopped.
    #[track_caller]
    pub fn start_layout(&self, form: FormId, completions: Vec<Completion>) -> bool {
        self.assert_owner();
        if self.inner.performer.is_interactive(form) {
            tracing::trace!(target: "weft.layout", form = form.get(), "start refused during interactive resize");
            return false;
        }
        self.submit_layout(form, completions)
    }

    fn submit_layout(&self, form: FormId, completions: Vec<Completion>) -> bool {
        let layout = self.inner.forms.borrow().get(&form).cloned();
        let Some(layout) = layout else {
            return false;
        };
        let Some(snapshot) = layout.snapshot() else {
            return false;
        };
        self.inner
            .performer
            .submit(LayoutRequest::new(form, snapshot).with_completions(completions))
    }

    /// Mark `form` for layout at the end of the current loop iteration.
    ///
    /// Any number of calls during one dispatch produce a single request;
    /// every completion is kept.
    #[track_caller]
    pub fn schedule_layout(&self, form: FormId, completion: Option<Completion>) {
        self.assert_owner();
        let mut scheduled = self.inner.scheduled.borrow_mut();
        let scheduled = &mut *scheduled;
        let pending = scheduled.completions.entry(form).or_insert_with(|| {
            scheduled.order.push(form);
            Vec::new()
        });
        if let Some(completion) = completion {
            pending.push(completion);
        }
    }

    /// Start every scheduled layout. Forms in interactive resize stay
    /// scheduled until they leave it.
    fn flush_scheduled_layouts(&self) {
        let batch = {
            let mut scheduled = self.inner.scheduled.borrow_mut();
            if scheduled.order.is_empty() {
                return;
            }
            std::mem::take(&mut *scheduled)
        };
        let ScheduledLayouts {
            order,
            mut completions,
        } = batch;
        for form in order {
            let pending = completions.remove(&form).unwrap_or_default();
            if self.inner.performer.is_interactive(form) {
                let mut scheduled = self.inner.scheduled.borrow_mut();
                let scheduled = &mut *scheduled;
                let slot = scheduled.completions.entry(form).or_insert_with(|| {
                    scheduled.order.push(form);
                    Vec::new()
                });
                let mut later = std::mem::replace(slot, pending);
                slot.append(&mut later);
                continue;
            }
            self.submit_layout(form, pending);
        }
    }

    /// The owner entered an interactive move/resize loop for `form`.
    #[track_caller]
    pub fn enter_size_move(&self, form: FormId) {
        self.assert_owner();
        tracing::debug!(target: "weft.layout", form = form.get(), "interactive resize started");
        self.inner.performer.set_interactive(form, true);
    }

    #[track_caller]
    pub fn exit_size_move(&self, form: FormId) {
        self.assert_owner();
        tracing::debug!(target: "weft.layout", form = form.get(), "interactive resize finished");
        self.inner.performer.set_interactive(form, false);
    }

    /// Lay out `form` synchronously during interactive resize.
    ///
    /// Submits a request, blocks on the rendezvous until the worker publishes
    /// the result, applies it and runs its completions. Returns `false`
    /// outside interactive resize or when nothing could be computed.
    #[track_caller]
    pub fn perform_interactive_layout(&self, form: FormId) -> bool {
        self.assert_owner();
        if !self.inner.performer.is_interactive(form) {
            return false;
        }
        if !self.submit_layout(form, Vec::new()) {
            return false;
        }
        let _span =
            tracing::debug_span!(target: "weft.layout", "interactive_layout", form = form.get())
                .entered();
        match self.inner.performer.wait_for_result(form) {
            Some(result) => {
                self.apply_layout(&result);
                self.inner.performer.finish_applying(form);
                result.complete();
                true
            }
            None => false,
        }
    }

    pub fn layout_phase(&self, form: FormId) -> LayoutPhase {
        self.inner.performer.phase(form)
    }

    pub fn layout_stats(&self) -> LayoutStats {
        self.inner.performer.stats()
    }

    fn apply_layout(&self, result: &LayoutResult) {
        let layout = self.inner.forms.borrow().get(&result.form).cloned();
        match layout {
            Some(layout) => layout.apply(result),
            None => {
                tracing::trace!(target: "weft.layout", form = result.form.get(), "result for unregistered form dropped")
            }
        }
    }

    fn apply_layout_batch(&self) {
        let applied = self
            .inner
            .app
            .bridge()
            .drain_layouts(|result| self.apply_layout(result));
        for form in applied {
            self.inner.performer.finish_applying(form);
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("app", &self.inner.app)
            .field("depth", &self.inner.depth.get())
            .field("performer", &self.inner.performer)
            .finish_non_exhaustive()
    }
}
