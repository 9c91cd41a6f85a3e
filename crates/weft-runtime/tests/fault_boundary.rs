//! A panic inside a window procedure never unwinds out of the loop.
//!
//! The owner thread is a dedicated thread here: after the fault it parks
//! forever, which the test process tolerates.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use weft_core::fault::REDIRECT_THREAD_NAME;
use weft_core::{Message, RedirectedPanic, TargetId, codes};
use weft_runtime::{Runtime, TargetRegistration};

const WINDOW: TargetId = match TargetId::new(9) {
    Some(t) => t,
    None => panic!("zero target"),
};

struct Report {
    message: String,
    origin: Option<String>,
    escalated_on: Option<String>,
    rendered: String,
}

fn run_faulting_owner(post: impl FnOnce(&Runtime) + Send + 'static) -> mpsc::Receiver<Report> {
    let (tx, rx) = mpsc::channel();
    let tx = Arc::new(Mutex::new(tx));
    thread::Builder::new()
        .name("weft-owner".into())
        .spawn(move || {
            let sender = Arc::clone(&tx);
            let rt = Runtime::builder()
                .escalation(move |fault: RedirectedPanic| {
                    let report = Report {
                        message: fault.message().to_owned(),
                        origin: fault.origin_thread_name().map(str::to_owned),
                        escalated_on: thread::current().name().map(str::to_owned),
                        rendered: fault.to_string(),
                    };
                    let _ = sender.lock().unwrap().send(report);
                })
                .build()
                .unwrap();
            rt.register_target(
                WINDOW,
                TargetRegistration::new(|_: &Runtime, msg: &Message| {
                    if msg.code == codes::APP + 1 {
                        panic!("window procedure failed");
                    }
                }),
            );
            post(&rt);
            rt.run();
        })
        .unwrap();
    rx
}

#[test]
fn panic_in_window_proc_is_redirected() {
    let rx = run_faulting_owner(|rt| {
        rt.app().post_message(Message::new(WINDOW, codes::APP + 1)).unwrap();
    });

    let report = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(report.message, "window procedure failed");
    assert_eq!(report.origin.as_deref(), Some("weft-owner"));
    assert_eq!(report.escalated_on.as_deref(), Some(REDIRECT_THREAD_NAME));
    assert!(report.rendered.starts_with("window procedure failed\n\n"));
    assert!(report.rendered.contains("'weft-owner'"));
}

#[test]
fn panic_in_synchronized_work_is_redirected() {
    let rx = run_faulting_owner(|rt| {
        rt.app().synchronize(|| panic!("queued work failed"));
    });

    let report = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(report.message, "queued work failed");
    assert_eq!(report.origin.as_deref(), Some("weft-owner"));
}

#[test]
fn guard_passes_values_through() {
    let rt = Runtime::builder()
        .escalation(|_: RedirectedPanic| {})
        .build()
        .unwrap();
    assert_eq!(rt.app().guard_native_callback(|| 40 + 2), 42);
}
