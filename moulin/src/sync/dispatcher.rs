//! CPU-sync dispatcher.
//!
//! A small actor that runs host callbacks once a timeline semaphore reaches a
//! value: submissions are `(semaphore, value, task)`; a dispatcher thread
//! multi-waits on every pending condition plus an interrupt semaphore, and
//! hands fired tasks to the worker pool. Shutdown signals the interrupt and
//! joins the thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::trace;

use crate::device::{Device, SemaphoreHandle};
use crate::utils::thread_pool::ThreadPool;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Pending {
    semaphore: SemaphoreHandle,
    value: u64,
    task: Task,
}

pub struct SyncDispatcher {
    sender: Sender<Pending>,
    interrupt: SemaphoreHandle,
    interrupt_counter: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SyncDispatcher {
    pub fn new(device: Arc<dyn Device>, pool: Arc<ThreadPool>) -> Self {
        let (sender, receiver): (Sender<Pending>, Receiver<Pending>) = unbounded();
        let interrupt = device.create_timeline_semaphore(0);
        let interrupt_counter = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let interrupt = interrupt.clone();
            let interrupt_counter = interrupt_counter.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("moulin-sync-dispatcher".into())
                .spawn(move || {
                    dispatcher_loop(device, pool, receiver, interrupt, interrupt_counter, stop)
                })
                .expect("failed to spawn dispatcher thread")
        };

        SyncDispatcher {
            sender,
            interrupt,
            interrupt_counter,
            stop,
            thread: Some(thread),
        }
    }

    /// Runs `task` on the worker pool once `semaphore` reaches `value`.
    pub fn submit(
        &self,
        semaphore: SemaphoreHandle,
        value: u64,
        task: impl FnOnce() + Send + 'static,
    ) {
        self.sender
            .send(Pending {
                semaphore,
                value,
                task: Box::new(task),
            })
            .expect("dispatcher thread is gone");
        self.wake();
    }

    fn wake(&self) {
        let v = self.interrupt_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.interrupt.signal(v);
    }
}

impl Drop for SyncDispatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn dispatcher_loop(
    device: Arc<dyn Device>,
    pool: Arc<ThreadPool>,
    receiver: Receiver<Pending>,
    interrupt: SemaphoreHandle,
    interrupt_counter: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
) {
    let mut waiting: Vec<Pending> = Vec::new();

    loop {
        // Take everything submitted since the last wakeup.
        while let Ok(pending) = receiver.try_recv() {
            waiting.push(pending);
        }

        if stop.load(Ordering::SeqCst) {
            trace!(abandoned = waiting.len(), "sync dispatcher shutting down");
            return;
        }

        // Position 0 is always the interrupt, so a submit or shutdown wakes
        // the wait.
        let mut waits: Vec<(SemaphoreHandle, u64)> = Vec::with_capacity(waiting.len() + 1);
        waits.push((
            interrupt.clone(),
            interrupt_counter.load(Ordering::SeqCst) + 1,
        ));
        for pending in &waiting {
            waits.push((pending.semaphore.clone(), pending.value));
        }

        match device.wait_semaphores_any(&waits, Some(Duration::from_millis(100))) {
            Some(0) | None => {
                // Interrupted or timed out: re-check the mailbox and the
                // stop flag.
            }
            Some(index) => {
                let fired = waiting.swap_remove(index - 1);
                pool.submit(fired.task);
            }
        }
    }
}
