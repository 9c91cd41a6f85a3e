#![forbid(unsafe_code)]

//! In-process message queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use web_time::{Duration, Instant};

use weft_core::Message;

use crate::{MessagePump, PumpError};

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Message>,
    quit: Option<i32>,
    closed: bool,
}

impl State {
    fn pop(&mut self) -> Option<Message> {
        if let Some(msg) = self.queue.pop_front() {
            return Some(msg);
        }
        self.quit.take().map(Message::quit)
    }

    fn ready(&self) -> bool {
        !self.queue.is_empty() || self.quit.is_some() || self.closed
    }
}

/// A [`MessagePump`] backed by a `VecDeque` and a condition variable.
#[derive(Debug, Default)]
pub struct QueuePump {
    state: Mutex<State>,
    ready: Condvar,
}

impl QueuePump {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MessagePump for QueuePump {
    fn post(&self, msg: Message) -> Result<(), PumpError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PumpError::Closed);
        }
        state.queue.push_back(msg);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    fn post_quit(&self, exit_code: i32) {
        self.lock().quit = Some(exit_code);
        self.ready.notify_one();
    }

    fn get(&self) -> Result<Message, PumpError> {
        let mut state = self.lock();
        loop {
            if let Some(msg) = state.pop() {
                return Ok(msg);
            }
            if state.closed {
                return Err(PumpError::Closed);
            }
            state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn peek(&self) -> Option<Message> {
        self.lock().pop()
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.lock();
        let Some(timeout) = timeout else {
            while !state.ready() {
                state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
            }
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !state.ready() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
        true
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn pending(&self) -> usize {
        self.lock().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use weft_core::{TargetId, codes};

    fn msg(code: u32) -> Message {
        Message::new(TargetId::APPLICATION, code)
    }

    #[test]
    fn fifo_order() {
        let pump = QueuePump::new();
        for code in [codes::APP, codes::APP + 1, codes::APP + 2] {
            pump.post(msg(code)).unwrap();
        }
        assert_eq!(pump.pending(), 3);
        assert_eq!(pump.get().unwrap().code, codes::APP);
        assert_eq!(pump.peek().unwrap().code, codes::APP + 1);
        assert_eq!(pump.get().unwrap().code, codes::APP + 2);
        assert!(pump.peek().is_none());
    }

    #[test]
    fn quit_delivered_after_queued_messages() {
        let pump = QueuePump::new();
        pump.post(msg(codes::APP)).unwrap();
        pump.post_quit(3);
        pump.post(msg(codes::APP + 1)).unwrap();

        assert_eq!(pump.get().unwrap().code, codes::APP);
        assert_eq!(pump.get().unwrap().code, codes::APP + 1);
        let quit = pump.get().unwrap();
        assert!(quit.is_quit());
        assert_eq!(quit.exit_code(), 3);
        assert!(pump.peek().is_none());
    }

    #[test]
    fn later_quit_replaces_exit_code() {
        let pump = QueuePump::new();
        pump.post_quit(1);
        pump.post_quit(2);
        assert_eq!(pump.peek().unwrap().exit_code(), 2);
        assert!(pump.peek().is_none());
    }

    #[test]
    fn post_after_close_fails() {
        let pump = QueuePump::new();
        pump.post(msg(codes::APP)).unwrap();
        pump.close();
        assert!(pump.is_closed());
        assert_eq!(pump.post(msg(codes::APP)), Err(PumpError::Closed));
        // Already queued messages still drain.
        assert_eq!(pump.get().unwrap().code, codes::APP);
        assert_eq!(pump.get(), Err(PumpError::Closed));
    }

    #[test]
    fn wait_times_out_when_idle() {
        let pump = QueuePump::new();
        let start = Instant::now();
        assert!(!pump.wait(Some(Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_returns_immediately_when_pending() {
        let pump = QueuePump::new();
        pump.post_quit(0);
        assert!(pump.wait(Some(Duration::ZERO)));
        assert!(pump.wait(None));
    }

    #[test]
    fn get_wakes_on_cross_thread_post() {
        let pump = Arc::new(QueuePump::new());
        let poster = Arc::clone(&pump);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            poster.post(msg(codes::APP + 9)).unwrap();
        });
        assert_eq!(pump.get().unwrap().code, codes::APP + 9);
        handle.join().unwrap();
    }

    #[test]
    fn close_wakes_blocked_waiter() {
        let pump = Arc::new(QueuePump::new());
        let waiter = Arc::clone(&pump);
        let handle = thread::spawn(move || waiter.wait(None));
        thread::sleep(Duration::from_millis(20));
        pump.close();
        assert!(handle.join().unwrap());
    }
}
