#![forbid(unsafe_code)]

//! Modal components and the scoped state of one modal loop.
//!
//! [`Runtime::run_modal`](crate::Runtime::run_modal) holds three guards for
//! the duration of the loop. They are declared so that they drop in this
//! order on every exit path, unwinding included:
//!
//! 1. the owner window is re-enabled (if the loop disabled it),
//! 2. the modal is disposed,
//! 3. the loop depth is restored.

use std::cell::Cell;

use weft_core::{Message, TargetId, codes};

use crate::event_loop::Runtime;
use crate::hooks::PostDispatchHandler;

/// A component that runs its own nested message loop.
pub trait Modal {
    /// The window disabled for the duration of the loop, if any.
    fn owner(&self) -> Option<TargetId> {
        None
    }

    /// The window implemented by the modal, if it has one.
    fn window(&self) -> Option<TargetId> {
        None
    }

    /// Whether `target` is the modal's window or one of its children.
    fn contains_target(&self, target: TargetId) -> bool {
        self.window() == Some(target)
    }

    /// Called immediately before the loop starts. Typically shows the modal.
    fn enter_mode(&self, _rt: &Runtime) {}

    /// The loop runs while this returns `true`.
    fn running(&self) -> bool;

    /// Offered every message before translation. `true` consumes it.
    ///
    /// Overrides usually delegate to [`default_modal_pre_translate`] first.
    fn pre_translate(&self, msg: &Message) -> bool {
        default_modal_pre_translate(self, msg)
    }

    /// Key-down messages for the modal's windows, before translation.
    ///
    /// Hotkeys go here. `true` marks the key as handled.
    fn handle_key_down(&self, _msg: &Message) -> bool {
        false
    }

    /// Optional capability run after every dispatched message.
    fn post_dispatch(&self) -> Option<&dyn PostDispatchHandler> {
        None
    }

    /// Called exactly once, when the loop ends.
    fn dispose(&self);
}

/// Route key-down messages addressed to `modal`'s windows through
/// [`Modal::handle_key_down`].
///
/// A consumed key counts as dispatched, so the modal's post-dispatch
/// capability runs before this returns `true`.
pub fn default_modal_pre_translate<M: Modal + ?Sized>(modal: &M, msg: &Message) -> bool {
    if msg.code != codes::KEY_DOWN {
        return false;
    }
    let Some(target) = msg.target else {
        return false;
    };
    if !modal.contains_target(target) || !modal.handle_key_down(msg) {
        return false;
    }
    if let Some(post) = modal.post_dispatch() {
        post.post_dispatch();
    }
    true
}

/// Restores the loop depth on drop.
pub(crate) struct DepthGuard<'a> {
    depth: &'a Cell<u32>,
}

impl<'a> DepthGuard<'a> {
    pub(crate) fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

/// Disposes the modal on drop.
pub(crate) struct DisposeGuard<'a> {
    pub(crate) modal: &'a dyn Modal,
}

impl Drop for DisposeGuard<'_> {
    fn drop(&mut self) {
        self.modal.dispose();
    }
}

/// Re-enables the owner window on drop, if the loop disabled it.
pub(crate) struct EnableGuard<'a> {
    rt: &'a Runtime,
    owner: Option<TargetId>,
}

impl<'a> EnableGuard<'a> {
    pub(crate) fn disable(rt: &'a Runtime, owner: Option<TargetId>) -> Self {
        // Only undo what this loop did: an owner that was already disabled
        // stays disabled.
        let owner = owner.filter(|&target| rt.set_target_enabled(target, false));
        Self { rt, owner }
    }
}

impl Drop for EnableGuard<'_> {
    fn drop(&mut self) {
        if let Some(target) = self.owner {
            self.rt.set_target_enabled(target, true);
        }
    }
}
