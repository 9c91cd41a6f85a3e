//! Layout requests travelling owner → worker → bridge → owner.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use weft_core::{Message, Rect, Size, TargetId, codes};
use weft_runtime::{
    Completion, FormLayout, ItemId, LayoutItem, LayoutPhase, LayoutResult, LayoutSnapshot,
    Placement, Runtime, RuntimeConfig, TargetRegistration,
};

const FORM: TargetId = match TargetId::new(20) {
    Some(t) => t,
    None => panic!("zero target"),
};

/// Splits the client area into `n` equal columns.
struct Columns(u32);

impl LayoutItem for Columns {
    fn perform(&self, client: Size) -> Vec<Placement> {
        let n = self.0 as i32;
        let width = client.width / n;
        (0..n)
            .map(|i| Placement {
                item: ItemId(i as u32),
                bounds: Rect::new(i * width, 0, width, client.height),
            })
            .collect()
    }
}

/// Columns whose computation waits for a release signal.
struct Gated {
    release: mpsc::Receiver<()>,
}

impl LayoutItem for Gated {
    fn perform(&self, client: Size) -> Vec<Placement> {
        let _ = self.release.recv();
        Columns(2).perform(client)
    }
}

type Events = Arc<Mutex<Vec<String>>>;

struct TestForm {
    size: Cell<Option<Size>>,
    /// Gates the next snapshot's computation.
    gate: RefCell<Option<mpsc::Receiver<()>>>,
    applied: RefCell<Vec<(Size, Vec<Placement>)>>,
    applied_on: Cell<Option<ThreadId>>,
    events: Events,
}

impl TestForm {
    fn new(events: &Events) -> Rc<Self> {
        Rc::new(Self {
            size: Cell::new(Some(Size::new(200, 50))),
            gate: RefCell::new(None),
            applied: RefCell::new(Vec::new()),
            applied_on: Cell::new(None),
            events: Arc::clone(events),
        })
    }
}

impl FormLayout for TestForm {
    fn snapshot(&self) -> Option<LayoutSnapshot> {
        let client_size = self.size.get()?;
        let root: Box<dyn LayoutItem> = match self.gate.borrow_mut().take() {
            Some(release) => Box::new(Gated { release }),
            None => Box::new(Columns(2)),
        };
        Some(LayoutSnapshot { client_size, root })
    }

    fn apply(&self, result: &LayoutResult) {
        self.applied_on.set(Some(thread::current().id()));
        self.applied
            .borrow_mut()
            .push((result.client_size, result.placements.clone()));
        self.events.lock().unwrap().push("apply".into());
    }
}

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default()).unwrap()
}

fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(events: &Events, what: &str) -> Completion {
    let events = Arc::clone(events);
    let what = what.to_owned();
    Box::new(move || events.lock().unwrap().push(what))
}

fn record_and_exit(rt: &Runtime, events: &Events, what: &str) -> Completion {
    let app = rt.app().clone();
    let inner = record(events, what);
    Box::new(move || {
        inner();
        app.exit(0);
    })
}

#[test]
fn started_layout_is_applied_on_owner_then_completes() {
    let rt = runtime();
    let events = events();
    let form = TestForm::new(&events);
    rt.register_form(FORM, form.clone());

    assert!(rt.start_layout(FORM, vec![record_and_exit(&rt, &events, "done")]));
    assert_eq!(rt.run(), 0);

    assert_eq!(form.applied_on.get(), Some(thread::current().id()));
    assert_eq!(*events.lock().unwrap(), ["apply", "done"]);
    let applied = form.applied.borrow();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0, Size::new(200, 50));
    assert_eq!(
        applied[0].1,
        [
            Placement {
                item: ItemId(0),
                bounds: Rect::new(0, 0, 100, 50)
            },
            Placement {
                item: ItemId(1),
                bounds: Rect::new(100, 0, 100, 50)
            },
        ]
    );
    assert_eq!(rt.layout_phase(FORM), LayoutPhase::Idle);
}

#[test]
fn start_layout_refuses_unknown_or_empty_forms() {
    let rt = runtime();
    assert!(!rt.start_layout(FORM, Vec::new()));

    let events = events();
    let form = TestForm::new(&events);
    form.size.set(None);
    rt.register_form(FORM, form);
    assert!(!rt.start_layout(FORM, Vec::new()));
    assert_eq!(rt.layout_stats().submitted, 0);
}

#[test]
fn scheduled_layouts_coalesce_within_one_dispatch() {
    let rt = runtime();
    let events = events();
    let form = TestForm::new(&events);
    rt.register_form(FORM, form.clone());

    let ev = Arc::clone(&events);
    rt.register_target(
        FORM,
        TargetRegistration::new(move |rt: &Runtime, msg: &Message| {
            if msg.code != codes::APP + 1 {
                return;
            }
            rt.schedule_layout(FORM, Some(record(&ev, "first")));
            rt.schedule_layout(FORM, None);
            rt.schedule_layout(FORM, Some(record(&ev, "second")));
            rt.schedule_layout(FORM, Some(record_and_exit(rt, &ev, "third")));
        }),
    );

    rt.app().post_message(Message::new(FORM, codes::APP + 1)).unwrap();
    assert_eq!(rt.run(), 0);

    assert_eq!(rt.layout_stats().submitted, 1);
    assert_eq!(form.applied.borrow().len(), 1);
    assert_eq!(
        *events.lock().unwrap(),
        ["apply", "first", "second", "third"]
    );
}

#[test]
fn interactive_resize_lays_out_synchronously() {
    let rt = runtime();
    let events = events();
    let form = TestForm::new(&events);
    rt.register_form(FORM, form.clone());

    let observed = Rc::new(RefCell::new(Vec::new()));
    let obs = Rc::clone(&observed);
    let f = Rc::clone(&form);
    rt.register_target(
        FORM,
        TargetRegistration::new(move |rt: &Runtime, msg: &Message| match msg.code {
            codes::ENTER_SIZE_MOVE => {
                let started = rt.start_layout(FORM, Vec::new());
                obs.borrow_mut().push(format!("enter:{started}"));
            }
            code if code == codes::APP + 2 => {
                f.size.set(Some(Size::new(300, 60)));
                let ok = rt.perform_interactive_layout(FORM);
                obs.borrow_mut()
                    .push(format!("sync:{ok}:{}", f.applied.borrow().len()));
            }
            codes::EXIT_SIZE_MOVE => {
                obs.borrow_mut().push(format!(
                    "exit:{}",
                    rt.perform_interactive_layout(FORM)
                ));
            }
            _ => {}
        }),
    );

    for code in [codes::ENTER_SIZE_MOVE, codes::APP + 2, codes::EXIT_SIZE_MOVE] {
        rt.app().post_message(Message::new(FORM, code)).unwrap();
    }
    rt.app().exit(0);
    assert_eq!(rt.run(), 0);

    assert_eq!(*observed.borrow(), ["enter:false", "sync:true:1", "exit:false"]);
    assert_eq!(form.applied.borrow()[0].0, Size::new(300, 60));
}

#[test]
fn scheduled_layout_waits_for_interactive_resize_to_end() {
    let rt = runtime();
    let events = events();
    let form = TestForm::new(&events);
    rt.register_form(FORM, form.clone());

    let f = Rc::clone(&form);
    let ev = Arc::clone(&events);
    rt.register_target(
        FORM,
        TargetRegistration::new(move |rt: &Runtime, msg: &Message| {
            if msg.code == codes::APP + 3 {
                rt.schedule_layout(FORM, Some(record_and_exit(rt, &ev, "done")));
            }
            if msg.code == codes::EXIT_SIZE_MOVE {
                // Still parked while the exit message is being dispatched.
                assert!(f.applied.borrow().is_empty());
            }
        }),
    );

    for code in [codes::ENTER_SIZE_MOVE, codes::APP + 3, codes::EXIT_SIZE_MOVE] {
        rt.app().post_message(Message::new(FORM, code)).unwrap();
    }
    assert_eq!(rt.run(), 0);
    assert_eq!(form.applied.borrow().len(), 1);
    assert_eq!(*events.lock().unwrap(), ["apply", "done"]);
}

#[test]
fn unregistered_form_is_never_applied() {
    let rt = runtime();
    let events = events();
    let form = TestForm::new(&events);
    rt.register_form(FORM, form.clone());

    assert!(rt.start_layout(FORM, Vec::new()));
    rt.unregister_form(FORM);
    assert_ne!(rt.layout_phase(FORM), LayoutPhase::Requested);

    // Give the worker a chance to publish before the loop drains.
    let app = rt.app().clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        let inner = app.clone();
        app.synchronize(move || inner.exit(0));
    });
    assert_eq!(rt.run(), 0);
    assert!(form.applied.borrow().is_empty());
}

#[test]
fn interactive_layout_supersedes_a_parked_older_result() {
    let rt = runtime();
    let events = events();
    let form = TestForm::new(&events);
    let (release, gate) = mpsc::channel();
    *form.gate.borrow_mut() = Some(gate);
    rt.register_form(FORM, form.clone());

    assert!(rt.start_layout(FORM, vec![record(&events, "first")]));
    rt.enter_size_move(FORM);
    release.send(()).unwrap();

    // The 200x50 pass finishes after resize began and is parked.
    let deadline = Instant::now() + Duration::from_secs(5);
    while rt.layout_phase(FORM) != LayoutPhase::Applying {
        assert!(Instant::now() < deadline, "gated layout never finished");
        thread::sleep(Duration::from_millis(1));
    }

    form.size.set(Some(Size::new(300, 60)));
    assert!(rt.perform_interactive_layout(FORM));

    let applied: Vec<Size> = form.applied.borrow().iter().map(|(size, _)| *size).collect();
    assert_eq!(applied, [Size::new(300, 60)]);
    assert_eq!(*events.lock().unwrap(), ["apply", "first"]);
    assert_eq!(rt.layout_stats().discarded, 1);
    assert_eq!(rt.layout_phase(FORM), LayoutPhase::Idle);
    rt.exit_size_move(FORM);
}
