//! Fixed-size worker pool for capture jobs.
//!
//! Decouples the caller (timer tick or motion report) from capture latency by
//! running jobs on dedicated threads fed from a FIFO queue.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

/// Default number of capture workers.
pub const DEFAULT_CAPTURE_WORKERS: usize = 4;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget pool running capture jobs.
///
/// Queue capacity is unbounded: [`submit`](Self::submit) never blocks, never
/// drops a capture and returns no back-pressure signal. At most one job is
/// queued per layer change or timer tick.
///
/// A panicking job is logged and its worker keeps going. Dropping the pool
/// lets queued jobs finish, then joins the workers.
pub struct CapturePool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl CapturePool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("lapse-capture-{index}"))
                .spawn(move || worker_loop(index, receiver));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::error!(worker = index, "Failed to spawn capture worker: {}", e),
            }
        }

        tracing::debug!(workers = workers.len(), "Capture pool started");

        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queue a job. Jobs start in submission order.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(Box::new(job)).is_err() {
            tracing::warn!("Capture pool closed, dropping capture job");
        }
    }

    /// Number of live worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs queued but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }
}

impl Default for CapturePool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_WORKERS)
    }
}

impl Drop for CapturePool {
    fn drop(&mut self) {
        // Closing the channel ends each worker's loop once the queue drains.
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!("Capture pool stopped");
    }
}

fn worker_loop(index: usize, receiver: Receiver<Job>) {
    for job in receiver.iter() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            tracing::warn!(
                worker = index,
                "Capture job panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
