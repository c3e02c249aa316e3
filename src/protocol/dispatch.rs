use std::{
    sync::{
        Mutex, PoisonError,
        mpsc::{self, RecvTimeoutError},
    },
    time::Duration,
};

use log::warn;

use super::ThreadPool;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Decides which thread observes the result of an asynchronous query.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, task: Task);
}

/// Runs completions directly on the client's IO thread.
///
/// A completion must not issue a blocking query on the same client; it would
/// wait on the thread it is running on.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Dispatcher for Immediate {
    fn dispatch(&self, task: Task) {
        task()
    }
}

impl Dispatcher for ThreadPool {
    fn dispatch(&self, task: Task) {
        if self.execute(task).is_err() {
            warn!("completion dropped: dispatcher pool has shut down");
        }
    }
}

/// Completions queued for a thread the application owns, such as a UI loop,
/// which drains them with [`DispatchQueue::run_pending`].
#[derive(Debug)]
pub struct DispatchQueue {
    sender: mpsc::Sender<Task>,
    receiver: Mutex<mpsc::Receiver<Task>>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Runs every queued completion without blocking; returns how many ran.
    pub fn run_pending(&self) -> usize {
        let receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ran = 0;
        while let Ok(task) = receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Waits up to `timeout` for one completion and runs it.
    pub fn run_next(&self, timeout: Duration) -> bool {
        let receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        match receiver.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Dispatcher for DispatchQueue {
    fn dispatch(&self, task: Task) {
        // The queue owns its receiver, so sending only fails while it is being dropped.
        let _ = self.sender.send(task);
    }
}
