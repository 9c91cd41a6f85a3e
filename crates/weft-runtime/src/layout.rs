#![forbid(unsafe_code)]

//! Asynchronous layout performer.
//!
//! Layout is computed off the owner thread by a single long-lived worker (one
//! per process, not per form). The owner submits a [`LayoutRequest`] holding a
//! geometry snapshot and a `Send` item tree; the worker runs it and publishes a
//! [`LayoutResult`] that the owner applies.
//!
//! # Per-form state machine
//!
//! `Idle → Requested → Computing → Applying → Idle`. A request submitted while
//! one is still `Requested` replaces it (last write wins, completion callbacks
//! are concatenated older first). A result whose form received a newer
//! request while it was computing is stale: it is dropped and its completions
//! move onto the pending request. So is a result parked on the rendezvous
//! when a newer request for its form arrives.
//!
//! # Delivery
//!
//! - Normally results are handed to a [`LayoutSink`] (the bridge), which
//!   batches them for the owner thread.
//! - While a form is in *interactive resize*, results for it are parked in a
//!   rendezvous slot and the owner blocks in
//!   [`LayoutPerformer::wait_for_result`] until one arrives. Leaving
//!   interactive resize forwards an unclaimed result to the sink.
//!
//! # Shutdown
//!
//! [`LayoutPerformer::stop`] flips the liveness flag and returns immediately.
//! An in-flight computation finishes but its result is discarded. Dropping
//! the performer stops and joins the worker.

use std::collections::VecDeque;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use ahash::{AHashMap, AHashSet};
use web_time::{Duration, Instant};
use weft_core::{Rect, Size, TargetId};

use crate::error::RuntimeError;

/// Forms are addressed by their dispatch target.
pub type FormId = TargetId;

/// Callback run on the owner thread after a layout pass is applied.
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

/// Identity of a laid-out child within its form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

/// Computed bounds for one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub item: ItemId,
    pub bounds: Rect,
}

/// A detached layout tree that can be evaluated on the worker thread.
pub trait LayoutItem: Send {
    /// Compute child placements for a form whose client area is `client`.
    fn perform(&self, client: Size) -> Vec<Placement>;
}

/// What a form hands the performer when it needs a layout pass.
pub struct LayoutSnapshot {
    pub client_size: Size,
    pub root: Box<dyn LayoutItem>,
}

/// Owner-thread side of a laid-out form.
pub trait FormLayout {
    /// Capture the current geometry. `None` skips the pass (e.g. the form is
    /// minimized or not yet created).
    fn snapshot(&self) -> Option<LayoutSnapshot>;

    /// Apply a computed result.
    fn apply(&self, result: &LayoutResult);
}

/// A queued layout pass.
pub struct LayoutRequest {
    pub form: FormId,
    pub client_size: Size,
    pub root: Box<dyn LayoutItem>,
    pub completions: Vec<Completion>,
}

impl LayoutRequest {
    pub fn new(form: FormId, snapshot: LayoutSnapshot) -> Self {
        Self {
            form,
            client_size: snapshot.client_size,
            root: snapshot.root,
            completions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_completions(mut self, completions: Vec<Completion>) -> Self {
        self.completions = completions;
        self
    }
}

impl fmt::Debug for LayoutRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutRequest")
            .field("form", &self.form)
            .field("client_size", &self.client_size)
            .field("completions", &self.completions.len())
            .finish_non_exhaustive()
    }
}

/// A computed layout pass, consumed exactly once by the owner thread.
pub struct LayoutResult {
    pub form: FormId,
    pub client_size: Size,
    pub placements: Vec<Placement>,
    pub completions: Vec<Completion>,
    /// Time spent in [`LayoutItem::perform`].
    pub elapsed: Duration,
}

impl LayoutResult {
    /// Prepend `older` completions so they run before this result's own.
    pub(crate) fn inherit_completions(&mut self, mut older: Vec<Completion>) {
        older.append(&mut self.completions);
        self.completions = older;
    }

    /// Run and consume the completion callbacks.
    pub fn complete(self) {
        for completion in self.completions {
            completion();
        }
    }
}

impl fmt::Debug for LayoutResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutResult")
            .field("form", &self.form)
            .field("client_size", &self.client_size)
            .field("placements", &self.placements)
            .field("completions", &self.completions.len())
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

/// Receives results that are not claimed through the rendezvous.
pub trait LayoutSink: Send + Sync {
    fn deliver(&self, result: LayoutResult);
}

/// Per-form layout state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPhase {
    Idle,
    Requested,
    Computing,
    Applying,
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutStats {
    pub submitted: u64,
    /// Requests absorbed by a newer request for the same form.
    pub coalesced: u64,
    pub computed: u64,
    /// Results dropped as stale, forgotten, or after stop.
    pub discarded: u64,
}

struct State {
    alive: bool,
    order: VecDeque<FormId>,
    pending: AHashMap<FormId, LayoutRequest>,
    computing: Option<FormId>,
    applying: AHashSet<FormId>,
    interactive: AHashSet<FormId>,
    ready: AHashMap<FormId, LayoutResult>,
    /// Forms unregistered while their layout was computing.
    forgotten: AHashSet<FormId>,
    stats: LayoutStats,
}

struct Shared {
    state: Mutex<State>,
    work: Condvar,
    rendezvous: Condvar,
    sink: Arc<dyn LayoutSink>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to the layout worker thread.
pub struct LayoutPerformer {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl LayoutPerformer {
    /// Start the worker thread.
    pub fn spawn(name: &str, sink: Arc<dyn LayoutSink>) -> Result<Self, RuntimeError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                alive: true,
                order: VecDeque::new(),
                pending: AHashMap::new(),
                computing: None,
                applying: AHashSet::new(),
                interactive: AHashSet::new(),
                ready: AHashMap::new(),
                forgotten: AHashSet::new(),
                stats: LayoutStats::default(),
            }),
            work: Condvar::new(),
            rendezvous: Condvar::new(),
            sink,
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || worker_loop(&worker))
            .map_err(|source| RuntimeError::Spawn {
                name: name.to_owned(),
                source,
            })?;

        tracing::debug!(target: "weft.layout", worker = name, "layout performer started");
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Queue a layout pass, superseding any unconsumed request for the form.
    ///
    /// Returns `false` (dropping the request) once the performer is stopped.
    pub fn submit(&self, mut request: LayoutRequest) -> bool {
        let form = request.form;
        let mut st = self.shared.lock();
        if !st.alive {
            return false;
        }
        st.stats.submitted += 1;
        // A parked interactive result is older than this request.
        if let Some(stale) = st.ready.remove(&form) {
            let mut completions = stale.completions;
            completions.append(&mut request.completions);
            request.completions = completions;
            st.applying.remove(&form);
            st.stats.discarded += 1;
            tracing::trace!(target: "weft.layout", form = form.get(), "parked result superseded");
        }
        let coalesced = match st.pending.entry(form) {
            Entry::Occupied(mut slot) => {
                let mut merged = std::mem::take(&mut slot.get_mut().completions);
                merged.append(&mut request.completions);
                request.completions = merged;
                slot.insert(request);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(request);
                false
            }
        };
        if coalesced {
            st.stats.coalesced += 1;
        } else {
            st.order.push_back(form);
        }
        drop(st);

        tracing::trace!(target: "weft.layout", form = form.get(), coalesced, "layout requested");
        self.shared.work.notify_one();
        true
    }

    /// Enter or leave interactive resize for `form`.
    pub fn set_interactive(&self, form: FormId, interactive: bool) {
        let mut st = self.shared.lock();
        if interactive {
            st.interactive.insert(form);
            return;
        }
        st.interactive.remove(&form);
        let unclaimed = st.ready.remove(&form);
        drop(st);
        if let Some(result) = unclaimed {
            tracing::trace!(target: "weft.layout", form = form.get(), "forwarding unclaimed interactive result");
            self.shared.sink.deliver(result);
        }
    }

    pub fn is_interactive(&self, form: FormId) -> bool {
        self.shared.lock().interactive.contains(&form)
    }

    /// Block until the worker publishes a result for `form` on the
    /// rendezvous.
    ///
    /// Returns `None` without blocking when no result can arrive there: the
    /// form is not interactive, nothing is requested or computing for it, or
    /// the worker has stopped.
    pub fn wait_for_result(&self, form: FormId) -> Option<LayoutResult> {
        let mut st = self.shared.lock();
        loop {
            if let Some(result) = st.ready.remove(&form) {
                return Some(result);
            }
            let outstanding = st.pending.contains_key(&form) || st.computing == Some(form);
            if !st.alive || !outstanding || !st.interactive.contains(&form) {
                return None;
            }
            st = self
                .shared
                .rendezvous
                .wait(st)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Mark the owner as done applying `form`'s result.
    pub fn finish_applying(&self, form: FormId) {
        self.shared.lock().applying.remove(&form);
    }

    pub fn phase(&self, form: FormId) -> LayoutPhase {
        let st = self.shared.lock();
        if st.pending.contains_key(&form) {
            LayoutPhase::Requested
        } else if st.computing == Some(form) {
            LayoutPhase::Computing
        } else if st.applying.contains(&form) {
            LayoutPhase::Applying
        } else {
            LayoutPhase::Idle
        }
    }

    /// Drop everything queued for `form` and discard its in-flight result.
    pub fn forget(&self, form: FormId) {
        let mut st = self.shared.lock();
        st.pending.remove(&form);
        st.order.retain(|f| *f != form);
        st.ready.remove(&form);
        st.interactive.remove(&form);
        st.applying.remove(&form);
        if st.computing == Some(form) {
            st.forgotten.insert(form);
        }
        drop(st);
        self.shared.rendezvous.notify_all();
    }

    pub fn stats(&self) -> LayoutStats {
        self.shared.lock().stats
    }

    pub fn is_alive(&self) -> bool {
        self.shared.lock().alive
    }

    /// Signal the worker to exit. Idempotent and non-blocking.
    pub fn stop(&self) {
        let mut st = self.shared.lock();
        if !st.alive {
            return;
        }
        st.alive = false;
        st.pending.clear();
        st.order.clear();
        drop(st);
        tracing::debug!(target: "weft.layout", "layout performer stopping");
        self.shared.work.notify_all();
        self.shared.rendezvous.notify_all();
    }

    /// Stop and join the worker.
    pub fn shutdown(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for LayoutPerformer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for LayoutPerformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutPerformer")
            .field("alive", &self.is_alive())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Marks the worker dead on every exit path, including a panicking item.
struct WorkerExit<'a>(&'a Shared);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        let mut st = self.0.lock();
        st.alive = false;
        st.computing = None;
        drop(st);
        self.0.rendezvous.notify_all();
    }
}

fn worker_loop(shared: &Shared) {
    let _exit = WorkerExit(shared);
    loop {
        let request = {
            let mut st = shared.lock();
            loop {
                if !st.alive {
                    return;
                }
                if let Some(form) = st.order.pop_front() {
                    if let Some(request) = st.pending.remove(&form) {
                        st.computing = Some(form);
                        break request;
                    }
                    continue;
                }
                st = shared.work.wait(st).unwrap_or_else(|e| e.into_inner());
            }
        };

        let form = request.form;
        let start = Instant::now();
        let placements = request.root.perform(request.client_size);
        let elapsed = start.elapsed();
        let mut result = LayoutResult {
            form,
            client_size: request.client_size,
            placements,
            completions: request.completions,
            elapsed,
        };

        let mut st = shared.lock();
        st.computing = None;
        if !st.alive {
            st.stats.discarded += 1;
            tracing::trace!(target: "weft.layout", form = form.get(), "result discarded after stop");
            return;
        }
        if st.forgotten.remove(&form) {
            st.stats.discarded += 1;
            tracing::trace!(target: "weft.layout", form = form.get(), "result discarded for forgotten form");
            continue;
        }
        let superseded = match st.pending.get_mut(&form) {
            Some(newer) => {
                // Stale: keep the callbacks, drop the geometry.
                let mut completions = std::mem::take(&mut result.completions);
                completions.append(&mut newer.completions);
                newer.completions = completions;
                true
            }
            None => false,
        };
        if superseded {
            st.stats.discarded += 1;
            tracing::trace!(target: "weft.layout", form = form.get(), "stale result discarded");
            continue;
        }
        st.stats.computed += 1;
        st.applying.insert(form);
        tracing::debug!(
            target: "weft.layout",
            form = form.get(),
            elapsed_us = elapsed.as_micros() as u64,
            placements = result.placements.len(),
            "layout computed"
        );

        if st.interactive.contains(&form) {
            if let Some(older) = st.ready.remove(&form) {
                result.inherit_completions(older.completions);
            }
            st.ready.insert(form, result);
            drop(st);
            shared.rendezvous.notify_all();
        } else {
            drop(st);
            shared.sink.deliver(result);
        }
    }
}
