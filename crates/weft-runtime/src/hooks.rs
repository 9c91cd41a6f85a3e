#![forbid(unsafe_code)]

//! Hook chains and dispatch targets.
//!
//! All of this is owner-thread state held by the [`Runtime`](crate::Runtime).
//! Handlers are stored as `Rc` so a chain can be snapshotted before it runs:
//! a handler is free to register or remove handlers (including itself)
//! without invalidating the iteration in progress.

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use weft_core::{Message, TargetId};

use crate::event_loop::Runtime;

/// Examines a message before translation. Returning `true` consumes it.
pub trait PreTranslateHandler {
    fn pre_translate(&self, msg: &Message) -> bool;
}

impl<F> PreTranslateHandler for F
where
    F: Fn(&Message) -> bool,
{
    fn pre_translate(&self, msg: &Message) -> bool {
        self(msg)
    }
}

/// Notified once dispatch of a message to its target has completed.
pub trait PostDispatchHandler {
    fn post_dispatch(&self);
}

impl<F> PostDispatchHandler for F
where
    F: Fn(),
{
    fn post_dispatch(&self) {
        self()
    }
}

/// A target's window procedure: the native callback of this model.
pub trait WindowProc {
    fn handle(&self, rt: &Runtime, msg: &Message);
}

impl<F> WindowProc for F
where
    F: Fn(&Runtime, &Message),
{
    fn handle(&self, rt: &Runtime, msg: &Message) {
        self(rt, msg)
    }
}

/// Modal message filter. `code` is `MSGF_USER + loop depth`.
///
/// Returning `true` skips the message.
pub trait MessageFilter {
    fn filter(&self, code: i32, msg: &Message) -> bool;
}

impl<F> MessageFilter for F
where
    F: Fn(i32, &Message) -> bool,
{
    fn filter(&self, code: i32, msg: &Message) -> bool {
        self(code, msg)
    }
}

/// What a dispatch target provides when it registers.
///
/// The post-dispatch capability is resolved here, once, rather than probed
/// on every message.
#[derive(Clone)]
pub struct TargetRegistration {
    pub(crate) proc_: Rc<dyn WindowProc>,
    pub(crate) post_dispatch: Option<Rc<dyn PostDispatchHandler>>,
}

impl TargetRegistration {
    pub fn new(proc_: impl WindowProc + 'static) -> Self {
        Self {
            proc_: Rc::new(proc_),
            post_dispatch: None,
        }
    }

    #[must_use]
    pub fn with_post_dispatch(mut self, handler: impl PostDispatchHandler + 'static) -> Self {
        self.post_dispatch = Some(Rc::new(handler));
        self
    }

    pub fn has_post_dispatch(&self) -> bool {
        self.post_dispatch.is_some()
    }
}

impl fmt::Debug for TargetRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetRegistration")
            .field("post_dispatch", &self.post_dispatch.is_some())
            .finish_non_exhaustive()
    }
}

struct TargetEntry {
    registration: TargetRegistration,
    enabled: bool,
}

/// Pre-translate chains: global (append-only) then per target.
#[derive(Default)]
pub(crate) struct HookRegistry {
    globals: Vec<Rc<dyn PreTranslateHandler>>,
    per_target: AHashMap<TargetId, Rc<dyn PreTranslateHandler>>,
}

impl HookRegistry {
    pub(crate) fn add_global(&mut self, handler: Rc<dyn PreTranslateHandler>) {
        self.globals.push(handler);
    }

    pub(crate) fn set_for(
        &mut self,
        target: TargetId,
        handler: Rc<dyn PreTranslateHandler>,
    ) -> Option<Rc<dyn PreTranslateHandler>> {
        self.per_target.insert(target, handler)
    }

    pub(crate) fn remove_for(&mut self, target: TargetId) -> bool {
        self.per_target.remove(&target).is_some()
    }

    /// The handlers that see `msg`, in the order they must run.
    pub(crate) fn chain_for(&self, msg: &Message) -> Vec<Rc<dyn PreTranslateHandler>> {
        let mut chain = self.globals.clone();
        if let Some(target) = msg.target {
            if let Some(h) = self.per_target.get(&target) {
                chain.push(Rc::clone(h));
            }
        }
        chain
    }

    pub(crate) fn global_count(&self) -> usize {
        self.globals.len()
    }
}

/// Registered dispatch targets.
#[derive(Default)]
pub(crate) struct TargetTable {
    entries: AHashMap<TargetId, TargetEntry>,
}

/// What dispatch needs from a target, detached from the table.
pub(crate) struct Resolved {
    pub(crate) proc_: Rc<dyn WindowProc>,
    pub(crate) post_dispatch: Option<Rc<dyn PostDispatchHandler>>,
    pub(crate) enabled: bool,
}

impl TargetTable {
    pub(crate) fn register(&mut self, target: TargetId, registration: TargetRegistration) -> bool {
        self.entries
            .insert(
                target,
                TargetEntry {
                    registration,
                    enabled: true,
                },
            )
            .is_some()
    }

    pub(crate) fn unregister(&mut self, target: TargetId) -> bool {
        self.entries.remove(&target).is_some()
    }

    pub(crate) fn contains(&self, target: TargetId) -> bool {
        self.entries.contains_key(&target)
    }

    pub(crate) fn resolve(&self, target: TargetId) -> Option<Resolved> {
        self.entries.get(&target).map(|e| Resolved {
            proc_: Rc::clone(&e.registration.proc_),
            post_dispatch: e.registration.post_dispatch.clone(),
            enabled: e.enabled,
        })
    }

    /// Returns the previous state; unknown targets report `false`.
    pub(crate) fn set_enabled(&mut self, target: TargetId, enabled: bool) -> bool {
        match self.entries.get_mut(&target) {
            Some(e) => std::mem::replace(&mut e.enabled, enabled),
            None => false,
        }
    }

    pub(crate) fn is_enabled(&self, target: TargetId) -> bool {
        self.entries.get(&target).is_some_and(|e| e.enabled)
    }
}
