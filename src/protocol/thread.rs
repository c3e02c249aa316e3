use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, mpsc},
    thread,
};

use log::{debug, warn};
use thiserror::Error;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
#[error("thread pool has shut down")]
pub struct PoolClosed;

/// Fixed set of OS threads pulling jobs from one queue.
///
/// Jobs run in submission order per worker; with a single worker the pool is
/// a strict FIFO executor.
#[derive(Debug)]
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

impl ThreadPool {
    pub fn new(size: usize) -> Self {
        Self::named("tether-worker", size)
    }

    pub fn named(name: &str, size: usize) -> Self {
        assert!(size > 0);

        let mut workers = Vec::with_capacity(size);
        let (sender, receiver) = mpsc::channel();

        let receiver = Arc::new(Mutex::new(receiver));
        let sender = Some(sender);

        for i in 0..size {
            workers.push(Worker::new(name, i, Arc::clone(&receiver)));
        }

        Self { workers, sender }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn execute<F>(&self, f: F) -> Result<(), PoolClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Box::new(f);
        self.sender
            .as_ref()
            .ok_or(PoolClosed)?
            .send(job)
            .map_err(|_| PoolClosed)
    }

    /// A submit-only handle for threads that do not own the pool.
    ///
    /// Workers only stop once every spawner has been dropped as well.
    pub fn spawner(&self) -> Option<Spawner> {
        self.sender.clone().map(|sender| Spawner { sender })
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            debug!("shutting down worker {}", worker.id);

            if worker.thread.join().is_err() {
                warn!("worker {} panicked", worker.id);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Spawner {
    sender: mpsc::Sender<Job>,
}

impl Spawner {
    pub fn execute<F>(&self, f: F) -> Result<(), PoolClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(f)).map_err(|_| PoolClosed)
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    pub fn new(name: &str, id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) -> Self {
        let thread = thread::Builder::new()
            .name(format!("{name}-{id}"))
            .spawn(move || {
                loop {
                    let msg = match receiver.lock() {
                        Ok(receiver) => receiver.recv(),
                        Err(_) => break,
                    };
                    match msg {
                        Ok(job) => {
                            debug!("worker {id} running a job");
                            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                warn!("worker {id} recovered from a panicking job");
                            }
                        }
                        Err(_) => {
                            debug!("worker {id} disconnected");
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn worker thread");

        Self { id, thread }
    }
}
