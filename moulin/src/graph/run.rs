//! Per-iteration run context.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use parking_lot::Mutex;

use crate::device::{Queue, SemaphoreHandle, SemaphoreSignal, SemaphoreWait};
use crate::profiler::ProfilerHandle;
use crate::sync::dispatcher::SyncDispatcher;
use crate::sync::ring::InFlightData;
use crate::utils::to_seconds;

pub type SubmitCallback = Box<dyn FnOnce(&dyn Queue, &mut GraphRun) + 'static>;

/// Data of a single graph run.
///
/// Handed to every node's process call. Nodes attach semaphores and submit
/// callbacks here; the driver consumes them when it submits the recorded
/// command buffer.
pub struct GraphRun {
    pub(crate) iteration: u64,
    pub(crate) total_iteration: u64,
    pub(crate) in_flight_index: u32,
    pub(crate) iterations_in_flight: u32,

    pub(crate) time_delta: Duration,
    pub(crate) elapsed: Duration,
    pub(crate) elapsed_since_connect: Duration,

    pub(crate) wait_semaphores: Vec<SemaphoreWait>,
    pub(crate) signal_semaphores: Vec<SemaphoreSignal>,
    pub(crate) submit_callbacks: Vec<SubmitCallback>,
    pub(crate) events: Vec<String>,

    pub(crate) needs_rebuild: bool,
    pub(crate) profiler: Option<ProfilerHandle>,
    pub(crate) in_flight_data: Option<Arc<Mutex<InFlightData>>>,
    pub(crate) dispatcher: Option<Arc<SyncDispatcher>>,
}

impl GraphRun {
    pub(crate) fn new() -> Self {
        GraphRun {
            iteration: 0,
            total_iteration: 0,
            in_flight_index: 0,
            iterations_in_flight: 1,
            time_delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            elapsed_since_connect: Duration::ZERO,
            wait_semaphores: Vec::new(),
            signal_semaphores: Vec::new(),
            submit_callbacks: Vec::new(),
            events: Vec::new(),
            needs_rebuild: false,
            profiler: None,
            in_flight_data: None,
            dispatcher: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn reset(
        &mut self,
        iteration: u64,
        total_iteration: u64,
        in_flight_index: u32,
        iterations_in_flight: u32,
        time_delta: Duration,
        elapsed: Duration,
        elapsed_since_connect: Duration,
        profiler: Option<ProfilerHandle>,
        in_flight_data: Arc<Mutex<InFlightData>>,
        dispatcher: Arc<SyncDispatcher>,
    ) {
        self.iteration = iteration;
        self.total_iteration = total_iteration;
        self.in_flight_index = in_flight_index;
        self.iterations_in_flight = iterations_in_flight;
        self.time_delta = time_delta;
        self.elapsed = elapsed;
        self.elapsed_since_connect = elapsed_since_connect;
        self.wait_semaphores.clear();
        self.signal_semaphores.clear();
        self.submit_callbacks.clear();
        self.events.clear();
        self.needs_rebuild = false;
        self.profiler = profiler;
        self.in_flight_data = Some(in_flight_data);
        self.dispatcher = Some(dispatcher);
    }

    /// Iterations since the last rebuild, 0-indexed.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Iterations since driver creation, 0-indexed.
    pub fn total_iteration(&self) -> u64 {
        self.total_iteration
    }

    /// The ring slot of this run. Processing of the previous iteration with
    /// this index is guaranteed to have finished.
    pub fn in_flight_index(&self) -> u32 {
        self.in_flight_index
    }

    /// Number of iterations that may be in flight at any time.
    pub fn iterations_in_flight(&self) -> u32 {
        self.iterations_in_flight
    }

    /// Time difference to the previous iteration's start.
    pub fn time_delta_duration(&self) -> Duration {
        self.time_delta
    }

    pub fn time_delta(&self) -> f64 {
        to_seconds(self.time_delta)
    }

    /// Elapsed time since driver creation.
    pub fn elapsed_duration(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed(&self) -> f64 {
        to_seconds(self.elapsed)
    }

    /// Elapsed time since the last rebuild.
    pub fn elapsed_since_connect_duration(&self) -> Duration {
        self.elapsed_since_connect
    }

    pub fn elapsed_since_connect(&self) -> f64 {
        to_seconds(self.elapsed_since_connect)
    }

    /// The submission waits on `semaphore` reaching `value` before the given
    /// stages execute. Pass value 0 for binary semaphores.
    pub fn add_wait_semaphore(
        &mut self,
        semaphore: SemaphoreHandle,
        stage_mask: vk::PipelineStageFlags2,
        value: u64,
    ) {
        self.wait_semaphores.push(SemaphoreWait {
            semaphore,
            value,
            stage_mask,
        });
    }

    /// The submission signals `semaphore` to `value` when it completes.
    pub fn add_signal_semaphore(&mut self, semaphore: SemaphoreHandle, value: u64) {
        self.signal_semaphores.push(SemaphoreSignal { semaphore, value });
    }

    /// Runs `callback` on the driver thread right after the submission.
    pub fn add_submit_callback(
        &mut self,
        callback: impl FnOnce(&dyn Queue, &mut GraphRun) + 'static,
    ) {
        self.submit_callbacks.push(Box::new(callback));
    }

    /// Asks the driver to rebuild the graph before the next iteration.
    pub fn request_rebuild(&mut self) {
        self.needs_rebuild = true;
    }

    /// Emits a string event to the run's observers.
    pub fn emit_event(&mut self, event: impl Into<String>) {
        self.events.push(event.into());
    }

    /// Profiler attached to this run, if profiling is enabled.
    pub fn profiler(&self) -> Option<&ProfilerHandle> {
        self.profiler.as_ref()
    }

    /// Per-node user data of the current ring slot. Entries live until the
    /// slot comes around again.
    pub fn in_flight_data(&self) -> Arc<Mutex<InFlightData>> {
        self.in_flight_data
            .clone()
            .expect("run context is not active")
    }

    /// Dispatcher for host callbacks gated on timeline semaphores.
    pub fn sync_dispatcher(&self) -> Arc<SyncDispatcher> {
        self.dispatcher.clone().expect("run context is not active")
    }
}
