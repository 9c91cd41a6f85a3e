#![forbid(unsafe_code)]

//! Cross-thread synchronization bridge.
//!
//! The bridge is the only sanctioned way for other threads to touch UI state.
//! It owns two queues that are drained on the owner thread, each woken by a
//! synthetic message posted to the application's own target:
//!
//! - **Work**: [`Bridge::synchronize`] appends a closure and posts one wakeup
//!   per closure. Each wakeup runs exactly one closure, in FIFO order, so a
//!   long queue never stalls input handling for more than one item.
//! - **Layout results**: results delivered by the layout performer are kept
//!   per form, newest wins. One wakeup is posted per batch; draining applies
//!   every queued result first (in first-arrival order) and only then runs the
//!   completion callbacks, so no observer sees a half-applied layout pass.
//!
//! Both locks are held only to push or pop; no callback runs under them.
//!
//! Work enqueued after the pump has closed is never run.

use std::collections::VecDeque;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use ahash::AHashMap;
use weft_backend::MessagePump;
use weft_core::{Message, TargetId};

use crate::layout::{FormId, LayoutResult, LayoutSink};

type Work = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct LayoutBatch {
    results: AHashMap<FormId, LayoutResult>,
    order: Vec<FormId>,
}

/// Which bridge queue a wakeup message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    Work,
    Layout,
}

pub struct Bridge {
    pump: Arc<dyn MessagePump>,
    work_code: u32,
    layout_code: u32,
    work: Mutex<VecDeque<Work>>,
    layouts: Mutex<LayoutBatch>,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Bridge {
    /// Create a bridge that wakes the owner with `work_code` and `layout_code`
    /// messages addressed to [`TargetId::APPLICATION`].
    pub fn new(pump: Arc<dyn MessagePump>, work_code: u32, layout_code: u32) -> Self {
        Self {
            pump,
            work_code,
            layout_code,
            work: Mutex::new(VecDeque::new()),
            layouts: Mutex::new(LayoutBatch::default()),
        }
    }

    /// Classify a message addressed to the application target.
    pub fn wakeup(&self, msg: &Message) -> Option<Wakeup> {
        if msg.target != Some(TargetId::APPLICATION) {
            return None;
        }
        if msg.code == self.work_code {
            Some(Wakeup::Work)
        } else if msg.code == self.layout_code {
            Some(Wakeup::Layout)
        } else {
            None
        }
    }

    /// Queue `f` to run on the owner thread. Callable from any thread.
    pub fn synchronize(&self, f: impl FnOnce() + Send + 'static) {
        let depth = {
            let mut work = relock(&self.work);
            work.push_back(Box::new(f));
            work.len()
        };
        match self
            .pump
            .post(Message::new(TargetId::APPLICATION, self.work_code))
        {
            Ok(()) => tracing::trace!(target: "weft.bridge", queued = depth, "work queued"),
            Err(err) => {
                tracing::debug!(target: "weft.bridge", error = %err, "owner loop gone; queued work will not run")
            }
        }
    }

    /// Run the oldest queued closure. Owner thread only.
    ///
    /// Returns `false` when the queue was empty.
    pub fn run_one(&self) -> bool {
        let next = relock(&self.work).pop_front();
        match next {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }

    /// Closures waiting to run.
    pub fn pending_work(&self) -> usize {
        relock(&self.work).len()
    }

    /// Queue a layout result, replacing an unapplied one for the same form.
    ///
    /// The replaced result's completions are carried forward, older first.
    pub fn synchronize_layout(&self, mut result: LayoutResult) {
        let form = result.form;
        let (first_in_batch, coalesced) = {
            let mut batch = relock(&self.layouts);
            let first = batch.results.is_empty();
            let coalesced = match batch.results.entry(form) {
                Entry::Occupied(mut slot) => {
                    let older = std::mem::take(&mut slot.get_mut().completions);
                    result.inherit_completions(older);
                    slot.insert(result);
                    true
                }
                Entry::Vacant(slot) => {
                    slot.insert(result);
                    false
                }
            };
            if !coalesced {
                batch.order.push(form);
            }
            (first, coalesced)
        };
        tracing::trace!(target: "weft.bridge", form = form.get(), coalesced, "layout result queued");
        if first_in_batch {
            if let Err(err) = self
                .pump
                .post(Message::new(TargetId::APPLICATION, self.layout_code))
            {
                tracing::debug!(target: "weft.bridge", error = %err, "owner loop gone; layout result dropped");
            }
        }
    }

    /// Apply every queued layout result, then run all their completions.
    ///
    /// Returns the applied forms in application order. Owner thread only.
    pub fn drain_layouts(&self, mut apply: impl FnMut(&LayoutResult)) -> Vec<FormId> {
        let mut batch = std::mem::take(&mut *relock(&self.layouts));
        let results: Vec<LayoutResult> = batch
            .order
            .iter()
            .filter_map(|form| batch.results.remove(form))
            .collect();
        if results.is_empty() {
            return Vec::new();
        }

        let _span = tracing::debug_span!(target: "weft.bridge", "layout_batch", results = results.len()).entered();
        for result in &results {
            apply(result);
        }
        let forms = results.iter().map(|r| r.form).collect();
        for result in results {
            result.complete();
        }
        forms
    }

    /// Drop an unapplied layout result for `form`.
    pub fn forget_layout(&self, form: FormId) {
        let mut batch = relock(&self.layouts);
        batch.results.remove(&form);
        batch.order.retain(|f| *f != form);
    }

    /// Layout results waiting to be applied.
    pub fn pending_layouts(&self) -> usize {
        relock(&self.layouts).results.len()
    }
}

impl LayoutSink for Bridge {
    fn deliver(&self, result: LayoutResult) {
        self.synchronize_layout(result);
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("work_code", &self.work_code)
            .field("layout_code", &self.layout_code)
            .field("pending_work", &self.pending_work())
            .field("pending_layouts", &self.pending_layouts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Completion, ItemId, Placement};
    use std::thread;
    use web_time::Duration;
    use weft_backend::QueuePump;
    use weft_core::{Rect, Size, codes};

    const WORK: u32 = codes::APP;
    const LAYOUT: u32 = codes::APP + 1;

    fn bridge() -> (Arc<QueuePump>, Bridge) {
        let pump = Arc::new(QueuePump::new());
        let b = Bridge::new(pump.clone(), WORK, LAYOUT);
        (pump, b)
    }

    fn form(n: u64) -> FormId {
        TargetId::new(n).unwrap()
    }

    fn result(f: FormId, w: i32, completions: Vec<Completion>) -> LayoutResult {
        LayoutResult {
            form: f,
            client_size: Size::new(w, w),
            placements: vec![Placement {
                item: ItemId(0),
                bounds: Rect::new(0, 0, w, w),
            }],
            completions,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn one_wakeup_per_synchronize() {
        let (pump, b) = bridge();
        b.synchronize(|| {});
        b.synchronize(|| {});
        assert_eq!(pump.pending(), 2);
        let msg = pump.peek().unwrap();
        assert_eq!(b.wakeup(&msg), Some(Wakeup::Work));
    }

    #[test]
    fn run_one_is_fifo_and_single() {
        let (_pump, b) = bridge();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            b.synchronize(move || log.lock().unwrap().push(i));
        }
        assert!(b.run_one());
        assert_eq!(*log.lock().unwrap(), vec![0]);
        assert!(b.run_one());
        assert!(b.run_one());
        assert!(!b.run_one());
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn work_may_synchronize_reentrantly() {
        let (_pump, b) = bridge();
        let b = Arc::new(b);
        let inner = Arc::clone(&b);
        let hit = Arc::new(Mutex::new(false));
        let hit2 = Arc::clone(&hit);
        b.synchronize(move || inner.synchronize(move || *hit2.lock().unwrap() = true));
        assert!(b.run_one());
        assert!(b.run_one());
        assert!(*hit.lock().unwrap());
    }

    #[test]
    fn synchronize_from_many_threads_runs_all() {
        let (pump, b) = bridge();
        let b = Arc::new(b);
        let count = Arc::new(Mutex::new(0usize));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let b = Arc::clone(&b);
                let count = Arc::clone(&count);
                thread::spawn(move || {
                    for _ in 0..25 {
                        let count = Arc::clone(&count);
                        b.synchronize(move || *count.lock().unwrap() += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pump.pending(), 100);
        while b.run_one() {}
        assert_eq!(*count.lock().unwrap(), 100);
    }

    #[test]
    fn synchronize_after_close_is_silent() {
        let (pump, b) = bridge();
        pump.close();
        b.synchronize(|| panic!("must never run"));
        assert_eq!(b.pending_work(), 1);
    }

    #[test]
    fn layout_batch_posts_one_wakeup() {
        let (pump, b) = bridge();
        b.synchronize_layout(result(form(2), 10, Vec::new()));
        b.synchronize_layout(result(form(3), 10, Vec::new()));
        b.synchronize_layout(result(form(2), 20, Vec::new()));
        assert_eq!(pump.pending(), 1);
        assert_eq!(b.wakeup(&pump.peek().unwrap()), Some(Wakeup::Layout));
        assert_eq!(b.pending_layouts(), 2);
    }

    #[test]
    fn drain_applies_all_before_completions() {
        let (_pump, b) = bridge();
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        for n in [4u64, 5] {
            let log = Arc::clone(&log);
            let done: Completion = Box::new(move || log.lock().unwrap().push(format!("done {n}")));
            b.synchronize_layout(result(form(n), 10, vec![done]));
        }
        let apply_log = Arc::clone(&log);
        let forms = b.drain_layouts(|r| {
            apply_log
                .lock()
                .unwrap()
                .push(format!("apply {}", r.form.get()))
        });
        assert_eq!(forms, vec![form(4), form(5)]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["apply 4", "apply 5", "done 4", "done 5"]
        );
        assert_eq!(b.pending_layouts(), 0);
        assert!(b.drain_layouts(|_| panic!("empty batch")).is_empty());
    }

    #[test]
    fn newer_result_wins_and_keeps_older_completions() {
        let (_pump, b) = bridge();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["old", "new"] {
            let log = Arc::clone(&log);
            let w = if tag == "old" { 10 } else { 20 };
            let done: Completion = Box::new(move || log.lock().unwrap().push(tag));
            b.synchronize_layout(result(form(6), w, vec![done]));
        }
        let mut applied = Vec::new();
        b.drain_layouts(|r| applied.push(r.client_size));
        assert_eq!(applied, vec![Size::new(20, 20)]);
        assert_eq!(*log.lock().unwrap(), vec!["old", "new"]);
    }

    #[test]
    fn new_batch_posts_again_after_drain() {
        let (pump, b) = bridge();
        b.synchronize_layout(result(form(7), 1, Vec::new()));
        pump.peek().unwrap();
        b.drain_layouts(|_| {});
        b.synchronize_layout(result(form(7), 2, Vec::new()));
        assert_eq!(pump.pending(), 1);
    }

    #[test]
    fn forget_layout_drops_result() {
        let (_pump, b) = bridge();
        b.synchronize_layout(result(form(8), 1, Vec::new()));
        b.forget_layout(form(8));
        assert!(b.drain_layouts(|_| panic!("forgotten")).is_empty());
    }

    #[test]
    fn wakeup_ignores_foreign_messages() {
        let (_pump, b) = bridge();
        assert_eq!(b.wakeup(&Message::new(form(9), WORK)), None);
        assert_eq!(b.wakeup(&Message::thread(WORK)), None);
        assert_eq!(
            b.wakeup(&Message::new(TargetId::APPLICATION, codes::APP + 7)),
            None
        );
    }
}
