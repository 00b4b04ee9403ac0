//! A fixed-size worker pool over a channel mailbox.
//!
//! Used by the driver to run CPU-side callbacks off the home thread. Tasks
//! are `FnOnce` boxes; `wait_idle` blocks until the queue has drained and all
//! workers are parked again.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    /// Tasks queued or currently executing.
    pending: Mutex<usize>,
    idle: Condvar,
}

pub struct ThreadPool {
    sender: Option<Sender<Task>>,
    state: Arc<PoolState>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver): (Sender<Task>, Receiver<Task>) = unbounded();
        let state = Arc::new(PoolState {
            pending: Mutex::new(0),
            idle: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|i| {
                let receiver = receiver.clone();
                let state = state.clone();
                thread::Builder::new()
                    .name(format!("moulin-worker-{i}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            task();
                            let mut pending = state.pending.lock();
                            *pending -= 1;
                            if *pending == 0 {
                                state.idle.notify_all();
                            }
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        ThreadPool {
            sender: Some(sender),
            state,
            workers,
        }
    }

    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        *self.state.pending.lock() += 1;
        self.sender
            .as_ref()
            .expect("thread pool is shut down")
            .send(Box::new(task))
            .expect("worker threads are gone");
    }

    /// Number of tasks queued or executing.
    pub fn queue_size(&self) -> usize {
        *self.state.pending.lock()
    }

    /// Blocks until every submitted task has finished.
    pub fn wait_idle(&self) {
        let mut pending = self.state.pending.lock();
        while *pending != 0 {
            self.state.idle.wait(&mut pending);
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Closing the channel lets the workers drain and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_all_tasks() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
        assert_eq!(pool.queue_size(), 0);
    }
}
