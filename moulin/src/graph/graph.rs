//! The graph driver.
//!
//! Owns the node table and all resource allocations. A rebuild validates the
//! desired edges, orders the delay-0 subgraph topologically, allocates every
//! output (one copy per delay step) and precomputes, for each node and each
//! iteration phase, the exact resource instance every connector sees. Each
//! run then advances one iteration in a bounded ring of in-flight slots,
//! batching the barriers the connectors emit around every node's process
//! call.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fixedbitset::FixedBitSet;
use slotmap::{SecondaryMap, SlotMap};
use tracing::{debug, info, trace_span, warn};

use crate::alloc::ResourceAllocator;
use crate::connectors::{ConnectorStatus, InputConnector, OutputConnector};
use crate::device::{
    CommandBuffer, DescriptorSet, DescriptorSetLayoutBinding, Device, Queue, SemaphoreHandle,
    SemaphoreSignal, SubmitInfo,
};
use crate::error::GraphError;
use crate::graph::node::{BuildIo, ConnectedIo, Node, NodeIo, NodeStatistics, PhaseIo};
use crate::graph::registry::NodeRegistry;
use crate::graph::run::GraphRun;
use crate::profiler::{ProfileReport, Profiler};
use crate::resources::{GraphResource, ResourceId, ResourceKind};
use crate::sync::dispatcher::SyncDispatcher;
use crate::sync::ring::RingSlot;
use crate::utils::lcm;
use crate::utils::thread_pool::ThreadPool;

slotmap::new_key_type! {
    /// Index of a node in the driver-owned node table.
    pub struct NodeId;
}

/// One resolved incoming edge: the producing node and its output index.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ResolvedInput {
    pub(crate) src: NodeId,
    pub(crate) output: usize,
}

/// Resource instances for one iteration phase, one entry per connector.
#[derive(Clone, Debug, Default)]
pub(crate) struct ResourceSet {
    pub(crate) inputs: Vec<Option<ResourceId>>,
    pub(crate) outputs: Vec<ResourceId>,
}

#[derive(Copy, Clone, Debug)]
pub(crate) enum ConnectorRef {
    Input(usize),
    Output(usize),
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct BindingRef {
    pub(crate) binding: u32,
    pub(crate) connector: ConnectorRef,
}

pub(crate) struct SlotDescriptor {
    pub(crate) set: Box<dyn DescriptorSet>,
    /// `(uid, generation)` last written per binding; `None` until first
    /// write, `(0, 0)` for the dummy fallback.
    pub(crate) written: Vec<Option<(u64, u64)>>,
}

/// Build artifacts of one node, valid for one graph-build epoch.
pub(crate) struct NodeBuild {
    pub(crate) outputs: Vec<OutputConnector>,
    pub(crate) resolved_inputs: Vec<Option<ResolvedInput>>,
    pub(crate) output_consumers: Vec<Vec<(NodeId, usize)>>,
    /// Per output: `max_delay + 1` resource copies.
    pub(crate) output_resources: Vec<Vec<ResourceId>>,
    /// Per phase `s in [0, period)`: the resource instance per connector.
    pub(crate) resource_sets: Vec<ResourceSet>,
    pub(crate) period: u32,
    pub(crate) bindings: Vec<BindingRef>,
    pub(crate) descriptor_layout: Vec<DescriptorSetLayoutBinding>,
    /// One descriptor set per ring slot; empty when the layout is empty.
    pub(crate) descriptor_sets: Vec<SlotDescriptor>,
}

pub(crate) struct NodeData {
    /// Taken out of the slot while a hook runs on the node.
    pub(crate) node: Option<Box<dyn Node>>,
    pub(crate) identifier: String,
    pub(crate) type_name: String,
    /// Disable flag controlled through properties.
    pub(crate) user_disabled: bool,
    /// Effective flag: user-disabled or failed during the current build.
    pub(crate) disabled: bool,
    pub(crate) errors: Vec<String>,
    pub(crate) stats: NodeStatistics,
    pub(crate) inputs: Vec<InputConnector>,
    /// dst_input name -> (src identifier, src output name). Keyed on the
    /// sink, so duplicate edges into one input are impossible.
    pub(crate) desired_incoming: BTreeMap<String, (String, String)>,
    /// (src output name, dst identifier, dst input name).
    pub(crate) desired_outgoing: BTreeSet<(String, String, String)>,
    pub(crate) build: Option<NodeBuild>,
}

pub(crate) enum DeferredEdit {
    RemoveNode(String),
}

/// The graph driver. See the crate documentation for the overall model.
pub struct Graph {
    pub(crate) device: Arc<dyn Device>,
    pub(crate) queue: Arc<dyn Queue>,
    pub(crate) allocator: Arc<dyn ResourceAllocator>,
    pub(crate) aliasing_allocator: Arc<dyn ResourceAllocator>,
    pub(crate) registry: NodeRegistry,
    pub(crate) thread_pool: Arc<ThreadPool>,
    pub(crate) dispatcher: Arc<SyncDispatcher>,

    pub(crate) nodes: SlotMap<NodeId, NodeData>,
    pub(crate) node_for_identifier: BTreeMap<String, NodeId>,
    pub(crate) resources: SlotMap<ResourceId, GraphResource>,
    pub(crate) next_resource_uid: u64,

    /// Signalled by the queue with the submission counter value when an
    /// iteration's GPU work completes.
    pub(crate) graph_timeline: SemaphoreHandle,
    pub(crate) submit_counter: u64,
    pub(crate) ring: Vec<RingSlot>,
    pub(crate) desired_iterations_in_flight: u32,
    pub(crate) ring_wait_timeout: Option<Duration>,

    pub(crate) flat_topology: Vec<NodeId>,
    pub(crate) built: bool,
    pub(crate) needs_rebuild: bool,
    pub(crate) run_in_progress: bool,
    pub(crate) last_build_error: Option<GraphError>,
    pub(crate) deferred: Vec<DeferredEdit>,

    pub(crate) iteration: u64,
    pub(crate) total_iteration: u64,
    pub(crate) last_iteration_start: Option<Instant>,
    pub(crate) time_reference: Instant,
    pub(crate) time_connect_reference: Instant,
    /// 0: system clock, 1: fixed elapsed time, 2: fixed delta.
    pub(crate) time_overwrite_mode: usize,
    /// Seconds in mode 1, milliseconds in mode 2.
    pub(crate) time_overwrite_value: f32,
    pub(crate) overwritten_elapsed: Duration,
    pub(crate) limit_fps: u32,
    pub(crate) profiling: bool,
    pub(crate) flush_pool_at_run_start: bool,
    pub(crate) last_profile_report: Option<ProfileReport>,
    pub(crate) last_gpu_wait: Duration,

    pub(crate) run: GraphRun,
    pub(crate) event_listeners: Vec<Box<dyn Fn(&str) + Send>>,
}

impl Graph {
    pub fn new(
        device: Arc<dyn Device>,
        queue: Arc<dyn Queue>,
        allocator: Arc<dyn ResourceAllocator>,
        aliasing_allocator: Arc<dyn ResourceAllocator>,
        registry: NodeRegistry,
    ) -> Graph {
        let thread_pool = Arc::new(ThreadPool::new(2));
        let dispatcher = Arc::new(SyncDispatcher::new(device.clone(), thread_pool.clone()));
        let graph_timeline = device.create_timeline_semaphore(0);
        let now = Instant::now();

        Graph {
            device,
            queue,
            allocator,
            aliasing_allocator,
            registry,
            thread_pool,
            dispatcher,
            nodes: SlotMap::with_key(),
            node_for_identifier: BTreeMap::new(),
            resources: SlotMap::with_key(),
            next_resource_uid: 0,
            graph_timeline,
            submit_counter: 0,
            ring: Vec::new(),
            desired_iterations_in_flight: 2,
            ring_wait_timeout: None,
            flat_topology: Vec::new(),
            built: false,
            needs_rebuild: true,
            run_in_progress: false,
            last_build_error: None,
            deferred: Vec::new(),
            iteration: 0,
            total_iteration: 0,
            last_iteration_start: None,
            time_reference: now,
            time_connect_reference: now,
            time_overwrite_mode: 0,
            time_overwrite_value: 0.0,
            overwritten_elapsed: Duration::ZERO,
            limit_fps: 0,
            profiling: false,
            flush_pool_at_run_start: true,
            last_profile_report: None,
            last_gpu_wait: Duration::ZERO,
            run: GraphRun::new(),
            event_listeners: Vec::new(),
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Iterations since the last successful rebuild.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Iterations since driver creation.
    pub fn total_iteration(&self) -> u64 {
        self.total_iteration
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.node_for_identifier.keys().map(String::as_str)
    }

    /// Errors recorded on a node during the last build or run.
    pub fn node_errors(&self, identifier: &str) -> Option<&[String]> {
        let id = *self.node_for_identifier.get(identifier)?;
        Some(&self.nodes[id].errors)
    }

    /// The type name a node was added under.
    pub fn node_type_name(&self, identifier: &str) -> Option<&str> {
        let id = *self.node_for_identifier.get(identifier)?;
        Some(&self.nodes[id].type_name)
    }

    pub fn node_statistics(&self, identifier: &str) -> Option<&NodeStatistics> {
        let id = *self.node_for_identifier.get(identifier)?;
        Some(&self.nodes[id].stats)
    }

    /// Bound on concurrently in-flight iterations; applied at the next
    /// rebuild.
    pub fn set_iterations_in_flight(&mut self, iterations: u32) {
        let iterations = iterations.max(1);
        if iterations != self.desired_iterations_in_flight {
            self.desired_iterations_in_flight = iterations;
            self.needs_rebuild = true;
        }
    }

    /// Timeout for acquiring a ring slot; `None` waits indefinitely.
    pub fn set_ring_wait_timeout(&mut self, timeout: Option<Duration>) {
        self.ring_wait_timeout = timeout;
    }

    /// Caps the iteration rate with a CPU sleep at iteration end; 0 disables.
    pub fn set_fps_limit(&mut self, fps: u32) {
        self.limit_fps = fps;
    }

    /// Time overwrite: mode 0 follows the system clock, mode 1 pins elapsed
    /// time to `value` seconds, mode 2 fixes the delta to `value`
    /// milliseconds.
    pub fn set_time_overwrite(&mut self, mode: usize, value: f32) {
        if self.time_overwrite_mode != 0 && mode == 0 {
            // Move the reference so elapsed time does not jump.
            self.time_reference = Instant::now() - self.overwritten_elapsed;
        }
        self.time_overwrite_mode = mode.min(2);
        self.time_overwrite_value = value;
    }

    pub fn set_profiling(&mut self, enable: bool) {
        self.profiling = enable;
    }

    /// Whether the worker-pool queue is drained at the start of every run.
    /// Keeps the queue bounded; enabled by default.
    pub fn set_flush_pool_at_run_start(&mut self, enable: bool) {
        self.flush_pool_at_run_start = enable;
    }

    /// Report collected from the iteration that last completed, if profiling
    /// is enabled.
    pub fn last_profile_report(&self) -> Option<&ProfileReport> {
        self.last_profile_report.as_ref()
    }

    /// Registers an observer for the string events nodes emit during runs.
    pub fn add_event_listener(&mut self, listener: impl Fn(&str) + Send + 'static) {
        self.event_listeners.push(Box::new(listener));
    }

    pub fn sync_dispatcher(&self) -> Arc<SyncDispatcher> {
        self.dispatcher.clone()
    }

    /// Marks the graph for a rebuild before the next iteration.
    pub fn request_rebuild(&mut self) {
        self.needs_rebuild = true;
    }

    /// Blocks until every in-flight iteration has completed.
    pub fn wait(&mut self) {
        let _span = trace_span!("graph_wait").entered();
        for slot in &self.ring {
            if slot.submitted_value > 0 {
                let _ = self.graph_timeline.wait(slot.submitted_value, None);
            }
        }
    }

    /// Advances the graph by one iteration, rebuilding first if required.
    pub fn run(&mut self) -> Result<(), GraphError> {
        if self.flush_pool_at_run_start {
            self.thread_pool.wait_idle();
        }

        if self.needs_rebuild {
            if let Err(err) = self.rebuild() {
                self.built = false;
                self.last_build_error = Some(err.clone());
                warn!(error = %err, "graph rebuild failed");
                return Err(err);
            }
        }
        if !self.built {
            return Err(self
                .last_build_error
                .clone()
                .unwrap_or_else(|| GraphError::Submit("graph is not built".into())));
        }

        let _span = trace_span!("graph_run", iteration = self.total_iteration).entered();

        // (1) Acquire the ring slot of this iteration.
        let k = (self.total_iteration % self.ring.len() as u64) as usize;
        let wait_value = self.ring[k].submitted_value;
        if wait_value > 0 {
            let started = Instant::now();
            if !self
                .graph_timeline
                .wait(wait_value, self.ring_wait_timeout)
            {
                return Err(GraphError::RingWaitTimeout);
            }
            self.last_gpu_wait = started.elapsed();
        } else {
            self.last_gpu_wait = Duration::ZERO;
        }

        // The slot's previous iteration is complete; collect its profile.
        if self.profiling {
            if self.ring[k].profiler.is_none() {
                self.ring[k].profiler = Some(Profiler::new());
            }
            let report = self.ring[k].profiler.as_ref().unwrap().take_report();
            if !report.entries.is_empty() {
                self.last_profile_report = Some(report);
            }
        } else {
            self.ring[k].profiler = None;
        }

        // (2) Timing.
        let now = Instant::now();
        let raw_delta = self
            .last_iteration_start
            .map(|t| now.duration_since(t))
            .unwrap_or_default();
        self.last_iteration_start = Some(now);
        let (time_delta, elapsed) = match self.time_overwrite_mode {
            1 => {
                let elapsed = Duration::from_secs_f64(self.time_overwrite_value.max(0.0) as f64);
                let delta = elapsed.saturating_sub(self.overwritten_elapsed);
                self.overwritten_elapsed = elapsed;
                (delta, elapsed)
            }
            2 => {
                let delta =
                    Duration::from_secs_f64(self.time_overwrite_value.max(0.0) as f64 / 1000.0);
                self.overwritten_elapsed += delta;
                (delta, self.overwritten_elapsed)
            }
            _ => (raw_delta, now.duration_since(self.time_reference)),
        };
        let elapsed_since_connect = now.duration_since(self.time_connect_reference);

        // (3) Fresh run context and command buffer.
        self.ring[k].command_pool.reset();
        let mut cmd = self.ring[k].command_pool.begin();
        self.run.reset(
            self.iteration,
            self.total_iteration,
            k as u32,
            self.ring.len() as u32,
            time_delta,
            elapsed,
            elapsed_since_connect,
            self.ring[k].profiler.clone(),
            self.ring[k].user_data.clone(),
            self.dispatcher.clone(),
        );
        self.run_in_progress = true;

        // (4) Process every node in topology order.
        let order = self.flat_topology.clone();
        for id in order {
            if !self.nodes[id].disabled {
                self.run_node(id, k, cmd.as_mut());
            }
        }

        // (5) + (6) End and submit with the collected semaphores.
        cmd.end();
        self.submit_counter += 1;
        let signal_value = self.submit_counter;
        let waits = std::mem::take(&mut self.run.wait_semaphores);
        let mut signals = std::mem::take(&mut self.run.signal_semaphores);
        signals.push(SemaphoreSignal {
            semaphore: self.graph_timeline.clone(),
            value: signal_value,
        });
        let submitted = self.queue.submit(SubmitInfo {
            command_buffer: cmd.as_mut(),
            waits: &waits,
            signals: &signals,
        });
        if let Err(err) = submitted {
            self.run_in_progress = false;
            return Err(GraphError::Submit(err.to_string()));
        }
        self.ring[k].submitted_value = signal_value;

        let callbacks = std::mem::take(&mut self.run.submit_callbacks);
        for callback in callbacks {
            callback(&*self.queue, &mut self.run);
        }

        let events = std::mem::take(&mut self.run.events);
        for event in &events {
            for listener in &self.event_listeners {
                listener(event);
            }
        }

        self.needs_rebuild |= self.run.needs_rebuild;
        self.iteration += 1;
        self.total_iteration += 1;
        self.run_in_progress = false;

        let deferred = std::mem::take(&mut self.deferred);
        for edit in deferred {
            match edit {
                DeferredEdit::RemoveNode(identifier) => {
                    self.remove_node_now(&identifier);
                }
            }
        }

        // Iteration-rate limiter.
        if self.limit_fps > 0 {
            let target = Duration::from_secs_f64(1.0 / self.limit_fps as f64);
            let spent = now.elapsed();
            if spent < target {
                let sleep = target - spent;
                self.ring[k].cpu_sleep_time = sleep;
                std::thread::sleep(sleep);
            } else {
                self.ring[k].cpu_sleep_time = Duration::ZERO;
            }
        }

        Ok(())
    }

    /// Runs one node: pre-barriers, descriptor updates, process,
    /// post-barriers. Node failures are recorded and disable the node; they
    /// never abort the iteration.
    fn run_node(&mut self, id: NodeId, k: usize, cmd: &mut dyn CommandBuffer) {
        let identifier = self.nodes[id].identifier.clone();
        let set = {
            let build = self.nodes[id].build.as_ref().expect("node was not built");
            let s = (self.iteration % build.period as u64) as usize;
            build.resource_sets[s].clone()
        };

        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();
        let mut in_flags = vec![false; set.inputs.len()];
        let mut out_flags = vec![false; set.outputs.len()];
        let mut failure: Option<String> = None;

        // Input pre-process, flushed as one dependency.
        for (j, rid) in set.inputs.iter().enumerate() {
            let Some(rid) = *rid else { continue };
            let status = self.nodes[id].inputs[j].on_pre_process(
                &mut self.resources[rid],
                &mut image_barriers,
                &mut buffer_barriers,
            );
            match status {
                Ok(flags) => in_flags[j] = flags.contains(ConnectorStatus::NEEDS_DESCRIPTOR_UPDATE),
                Err(err) => {
                    failure = Some(err.to_string());
                    break;
                }
            }
        }
        flush_barriers(cmd, &mut image_barriers, &mut buffer_barriers);

        // Output pre-process, flushed as one dependency.
        if failure.is_none() {
            for (o, rid) in set.outputs.iter().enumerate() {
                let status = {
                    let build = self.nodes[id].build.as_ref().unwrap();
                    build.outputs[o].on_pre_process(
                        &mut self.resources[*rid],
                        &mut image_barriers,
                        &mut buffer_barriers,
                    )
                };
                match status {
                    Ok(flags) => {
                        out_flags[o] = flags.contains(ConnectorStatus::NEEDS_DESCRIPTOR_UPDATE)
                    }
                    Err(err) => {
                        failure = Some(err.to_string());
                        break;
                    }
                }
            }
            flush_barriers(cmd, &mut image_barriers, &mut buffer_barriers);
        }

        // Batched descriptor updates for this slot's set.
        if failure.is_none() {
            let nd = &mut self.nodes[id];
            let build = nd.build.as_mut().unwrap();
            if !build.descriptor_layout.is_empty() {
                let slot_desc = &mut build.descriptor_sets[k];
                for (bi, bref) in build.bindings.iter().enumerate() {
                    let (rid, force) = match bref.connector {
                        ConnectorRef::Input(j) => (set.inputs[j], in_flags[j]),
                        ConnectorRef::Output(o) => (Some(set.outputs[o]), out_flags[o]),
                    };
                    match rid {
                        Some(rid) => {
                            let res = &self.resources[rid];
                            let current = (res.uid(), res.generation());
                            let since = match slot_desc.written[bi] {
                                Some((uid, generation)) if uid == current.0 && !force => {
                                    if generation == current.1 {
                                        continue;
                                    }
                                    Some(generation)
                                }
                                _ => None,
                            };
                            match bref.connector {
                                ConnectorRef::Input(j) => nd.inputs[j].write_descriptor(
                                    slot_desc.set.as_mut(),
                                    bref.binding,
                                    Some(res),
                                    &*self.allocator,
                                    since,
                                ),
                                ConnectorRef::Output(o) => build.outputs[o].write_descriptor(
                                    slot_desc.set.as_mut(),
                                    bref.binding,
                                    res,
                                ),
                            }
                            slot_desc.written[bi] = Some(current);
                        }
                        None => {
                            // Unconnected optional input: bind the dummy once.
                            if slot_desc.written[bi].is_none() {
                                if let ConnectorRef::Input(j) = bref.connector {
                                    nd.inputs[j].write_descriptor(
                                        slot_desc.set.as_mut(),
                                        bref.binding,
                                        None,
                                        &*self.allocator,
                                        None,
                                    );
                                }
                                slot_desc.written[bi] = Some((0, 0));
                            }
                        }
                    }
                }
            }
        }

        // Process.
        if failure.is_none() {
            let io_inputs: Vec<(String, Option<ResourceId>)> = {
                let nd = &self.nodes[id];
                nd.inputs
                    .iter()
                    .zip(&set.inputs)
                    .map(|(c, rid)| (c.name().to_string(), *rid))
                    .collect()
            };
            let io_outputs: Vec<(String, ResourceId)> = {
                let build = self.nodes[id].build.as_ref().unwrap();
                build
                    .outputs
                    .iter()
                    .zip(&set.outputs)
                    .map(|(c, rid)| (c.name().to_string(), *rid))
                    .collect()
            };

            let mut node = self.nodes[id].node.take().expect("node is already running");
            let started = Instant::now();
            let result = {
                let nd = &mut self.nodes[id];
                let descriptor_set = nd
                    .build
                    .as_mut()
                    .unwrap()
                    .descriptor_sets
                    .get_mut(k)
                    .map(|s| s.set.as_mut() as &mut dyn DescriptorSet);
                let mut io = NodeIo {
                    resources: &mut self.resources,
                    inputs: io_inputs,
                    outputs: io_outputs,
                };
                node.process(&mut self.run, cmd, descriptor_set, &mut io)
            };
            let duration = started.elapsed();
            self.nodes[id].node = Some(node);

            let stats = &mut self.nodes[id].stats;
            stats.runs += 1;
            stats.last_process = duration;
            stats.total_process += duration;
            if let Some(profiler) = &self.run.profiler {
                profiler.record(&identifier, duration);
            }

            if let Err(err) = result {
                failure = Some(err.to_string());
            }
        }

        // Post-process for inputs and outputs, one combined dependency.
        if failure.is_none() {
            for (j, rid) in set.inputs.iter().enumerate() {
                let Some(rid) = *rid else { continue };
                if let Err(err) = self.nodes[id].inputs[j].on_post_process(&mut self.resources[rid])
                {
                    failure = Some(err.to_string());
                    break;
                }
            }
        }
        if failure.is_none() {
            for (o, rid) in set.outputs.iter().enumerate() {
                let status = {
                    let build = self.nodes[id].build.as_ref().unwrap();
                    build.outputs[o].on_post_process(&mut self.resources[*rid], &identifier, k)
                };
                if let Err(err) = status {
                    failure = Some(err.to_string());
                    break;
                }
            }
            flush_barriers(cmd, &mut image_barriers, &mut buffer_barriers);
        }

        if let Some(message) = failure {
            warn!(node = %identifier, error = %message, "node failed, disabling");
            let nd = &mut self.nodes[id];
            nd.errors.push(message);
            nd.disabled = true;
        }
    }

    /// Rebuilds topology, allocations and resource sets from the desired
    /// edges. On failure the previous build is left in place untouched.
    pub(crate) fn rebuild(&mut self) -> Result<(), GraphError> {
        let _span = trace_span!("graph_rebuild").entered();

        // Never touch allocations while iterations are in flight.
        self.wait();

        let ring_size = self.desired_iterations_in_flight.max(1);
        if self.ring.len() != ring_size as usize {
            self.ring = (0..ring_size)
                .map(|_| RingSlot::new(self.device.as_ref()))
                .collect();
        }

        for (_, data) in self.nodes.iter_mut() {
            data.disabled = data.user_disabled;
            data.errors.clear();
        }

        // Deterministic ordering domain: nodes sorted by identifier.
        let sorted: Vec<(String, NodeId)> = self
            .node_for_identifier
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        let dense: HashMap<NodeId, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, (_, id))| (*id, i))
            .collect();

        // Resolve the desired edges per input (V1, V3, V4).
        let incoming = self.resolve_incoming(&sorted)?;

        // Topological order over delay-0 edges; feedback edges only count
        // for allocation.
        let (order, staged) = self.order_and_describe(&sorted, &dense, &incoming)?;

        // Resolve edges against the now-known outputs (V2) and collect the
        // consumers of every output.
        let (resolved, consumers) = self.resolve_edges(&sorted, &dense, &incoming, &staged)?;

        // Allocation, in graph order so the aliasing allocator sees
        // liveness through record order.
        let (new_resources, output_resources) = self.allocate(&order, &staged, &consumers)?;

        // Resource-set precomputation and descriptor layouts.
        let builds = self.precompute(&sorted, &dense, &staged, &resolved, &consumers,
            &output_resources, ring_size)?;

        // Commit: from here on nothing can fail.
        self.resources = new_resources;
        let mut staged = staged;
        let mut builds = builds;
        for (_, id) in &sorted {
            let mut build = builds.remove(*id);
            if let Some(build) = build.as_mut() {
                if let Some(staged_outputs) = staged.remove(*id) {
                    build.outputs = staged_outputs.outputs;
                }
            }
            self.nodes[*id].build = build;
        }
        self.flat_topology = order
            .into_iter()
            .filter(|id| !self.nodes[*id].disabled)
            .collect();
        self.iteration = 0;
        self.time_connect_reference = Instant::now();
        self.overwritten_elapsed = Duration::ZERO;
        self.built = true;
        self.needs_rebuild = false;
        self.last_build_error = None;

        // Build hooks see the committed per-phase views.
        let order = self.flat_topology.clone();
        for id in order {
            let io = self.build_io(id);
            let mut node = self.nodes[id].node.take().expect("node is already running");
            let result = node.on_build(&io);
            self.nodes[id].node = Some(node);
            if let Err(err) = result {
                let nd = &mut self.nodes[id];
                warn!(node = %nd.identifier, error = %err, "on_build failed, disabling node");
                nd.errors.push(err.to_string());
                nd.disabled = true;
            }
        }
        self.flat_topology.retain(|id| !self.nodes[*id].disabled);

        info!(
            nodes = self.flat_topology.len(),
            resources = self.resources.len(),
            iterations_in_flight = ring_size,
            "graph rebuilt"
        );
        Ok(())
    }

    /// Per node (dense order): the `(producer, output name)` feeding each
    /// input, with edit-level validation.
    fn resolve_incoming(
        &self,
        sorted: &[(String, NodeId)],
    ) -> Result<Vec<Vec<Option<(NodeId, String)>>>, GraphError> {
        let mut incoming = Vec::with_capacity(sorted.len());
        for (name, id) in sorted {
            let data = &self.nodes[*id];
            let mut per_input: Vec<Option<(NodeId, String)>> = vec![None; data.inputs.len()];
            let mut seen: HashSet<(NodeId, String, u32)> = HashSet::new();

            for (dst_input, (src_ident, src_output)) in &data.desired_incoming {
                let Some(j) = data.inputs.iter().position(|i| i.name() == dst_input) else {
                    return Err(GraphError::InvalidConnection(format!(
                        "node '{name}' has no input '{dst_input}'"
                    )));
                };
                let Some(&src_id) = self.node_for_identifier.get(src_ident) else {
                    warn!(node = %name, input = %dst_input, src = %src_ident,
                        "desired edge references an unknown node, ignoring");
                    continue;
                };
                let input = &data.inputs[j];
                if src_id == *id && input.delay() == 0 {
                    return Err(GraphError::InvalidConnection(format!(
                        "node '{name}' is connected to itself with delay 0; \
                         feedback edges need a delay of at least 1"
                    )));
                }
                if self.nodes[src_id].disabled {
                    // Outputs of a disabled node are absent.
                    continue;
                }
                if !seen.insert((src_id, src_output.clone(), input.delay())) {
                    return Err(GraphError::InvalidConnection(format!(
                        "node '{name}' accesses the same copy of '{src_ident}.{src_output}' \
                         twice (delay {})",
                        input.delay()
                    )));
                }
                per_input[j] = Some((src_id, src_output.clone()));
            }

            for (j, input) in data.inputs.iter().enumerate() {
                if per_input[j].is_none() && !input.is_optional() {
                    return Err(GraphError::MissingInput(format!(
                        "input '{}' of node '{}' is not connected",
                        input.name(),
                        name
                    )));
                }
            }
            incoming.push(per_input);
        }
        Ok(incoming)
    }

    /// Orders the delay-0 subgraph and calls `describe_outputs` in that
    /// order, so a node sees its producers' resolved outputs.
    fn order_and_describe(
        &mut self,
        sorted: &[(String, NodeId)],
        dense: &HashMap<NodeId, usize>,
        incoming: &[Vec<Option<(NodeId, String)>>],
    ) -> Result<(Vec<NodeId>, SecondaryMap<NodeId, StagedOutputs>), GraphError> {
        let n = sorted.len();
        let mut dep_count = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, (_, id)) in sorted.iter().enumerate() {
            if self.nodes[*id].disabled {
                continue;
            }
            for (j, edge) in incoming[i].iter().enumerate() {
                let Some((src, _)) = edge else { continue };
                if self.nodes[*id].inputs[j].delay() == 0 {
                    dep_count[i] += 1;
                    successors[dense[src]].push(i);
                }
            }
        }

        let mut ready: BTreeSet<(String, NodeId)> = sorted
            .iter()
            .enumerate()
            .filter(|(i, (_, id))| !self.nodes[*id].disabled && dep_count[*i] == 0)
            .map(|(_, entry)| entry.clone())
            .collect();
        let mut visited = FixedBitSet::with_capacity(n);
        let mut order: Vec<NodeId> = Vec::with_capacity(n);
        let mut staged: SecondaryMap<NodeId, StagedOutputs> = SecondaryMap::new();

        while let Some((name, id)) = ready.pop_first() {
            let i = dense[&id];
            visited.insert(i);
            order.push(id);

            // A connected delay-0 producer without an output of the desired
            // name is a bad edge (absent producers were filtered earlier).
            for (input, edge) in self.nodes[id].inputs.iter().zip(&incoming[i]) {
                if let Some((src, out_name)) = edge {
                    if input.delay() == 0
                        && !self.nodes[*src].disabled
                        && staged
                            .get(*src)
                            .map(|s| !s.by_name.contains_key(out_name))
                            .unwrap_or(false)
                    {
                        return Err(GraphError::InvalidConnection(format!(
                            "node '{}' has no output '{}'",
                            self.nodes[*src].identifier, out_name
                        )));
                    }
                }
            }

            let mut node = self.nodes[id].node.take().expect("node is already running");

            // Resolved producer info for the node's inputs. Feedback and
            // unconnected optional inputs stay unresolved.
            let described = {
                let data = &self.nodes[id];
                let entries: Vec<(&str, Option<&OutputConnector>)> = data
                    .inputs
                    .iter()
                    .zip(&incoming[i])
                    .map(|(input, edge)| {
                        let output = match edge {
                            Some((src, out_name)) if input.delay() == 0 => staged
                                .get(*src)
                                .filter(|_| !self.nodes[*src].disabled)
                                .and_then(|s| s.by_name.get(out_name).map(|&k| &s.outputs[k])),
                            _ => None,
                        };
                        (input.name(), output)
                    })
                    .collect();
                node.describe_outputs(&ConnectedIo { entries })
            };
            self.nodes[id].node = Some(node);

            match described {
                Ok(outputs) => {
                    let mut by_name = HashMap::with_capacity(outputs.len());
                    for (k, output) in outputs.iter().enumerate() {
                        if by_name.insert(output.name().to_string(), k).is_some() {
                            return Err(GraphError::Connector(format!(
                                "node '{}' declares two outputs named '{}'",
                                name,
                                output.name()
                            )));
                        }
                    }
                    debug!(node = %name, outputs = outputs.len(), "described outputs");
                    staged.insert(id, StagedOutputs { outputs, by_name });
                }
                Err(err) => {
                    let nd = &mut self.nodes[id];
                    warn!(node = %name, error = %err, "describe_outputs failed, disabling node");
                    nd.errors.push(err.to_string());
                    nd.disabled = true;
                }
            }

            for &succ in &successors[i] {
                dep_count[succ] -= 1;
                if dep_count[succ] == 0 {
                    ready.insert(sorted[succ].clone());
                }
            }
        }

        let unvisited: Vec<&str> = sorted
            .iter()
            .enumerate()
            .filter(|(i, (_, id))| !self.nodes[*id].disabled && !visited.contains(*i))
            .map(|(_, (name, _))| name.as_str())
            .collect();
        if !unvisited.is_empty() {
            return Err(GraphError::NotAcyclic(format!(
                "the delay-0 subgraph contains a cycle through: {}",
                unvisited.join(", ")
            )));
        }

        Ok((order, staged))
    }

    /// Final edge resolution (V2 and the host-delay rule) plus the consumer
    /// lists of every output.
    #[allow(clippy::type_complexity)]
    fn resolve_edges(
        &self,
        sorted: &[(String, NodeId)],
        dense: &HashMap<NodeId, usize>,
        incoming: &[Vec<Option<(NodeId, String)>>],
        staged: &SecondaryMap<NodeId, StagedOutputs>,
    ) -> Result<
        (
            Vec<Vec<Option<ResolvedInput>>>,
            SecondaryMap<NodeId, Vec<Vec<(NodeId, usize)>>>,
        ),
        GraphError,
    > {
        let mut consumers: SecondaryMap<NodeId, Vec<Vec<(NodeId, usize)>>> = SecondaryMap::new();
        for (_, id) in sorted {
            if let Some(s) = staged.get(*id) {
                consumers.insert(*id, vec![Vec::new(); s.outputs.len()]);
            }
        }

        let mut resolved: Vec<Vec<Option<ResolvedInput>>> = Vec::with_capacity(sorted.len());
        for (name, id) in sorted {
            let data = &self.nodes[*id];
            let i = dense[id];
            let mut per_input: Vec<Option<ResolvedInput>> = vec![None; data.inputs.len()];
            if data.disabled {
                resolved.push(per_input);
                continue;
            }

            for (j, edge) in incoming[i].iter().enumerate() {
                let Some((src, out_name)) = edge else { continue };
                let input = &data.inputs[j];
                let Some(src_staged) = staged.get(*src).filter(|_| !self.nodes[*src].disabled)
                else {
                    if input.is_optional() {
                        continue;
                    }
                    return Err(GraphError::MissingInput(format!(
                        "input '{}' of node '{}' is fed by disabled node '{}'",
                        input.name(),
                        name,
                        self.nodes[*src].identifier
                    )));
                };
                let Some(&k) = src_staged.by_name.get(out_name) else {
                    return Err(GraphError::InvalidConnection(format!(
                        "node '{}' has no output '{}'",
                        self.nodes[*src].identifier, out_name
                    )));
                };
                let output = &src_staged.outputs[k];
                input.accepts(output).map_err(|message| {
                    GraphError::InvalidConnection(format!(
                        "{}.{} -> {}.{}: {}",
                        self.nodes[*src].identifier,
                        out_name,
                        name,
                        input.name(),
                        message
                    ))
                })?;
                if input.delay() > 0
                    && matches!(input, InputConnector::Host(_))
                    && !output.is_persistent()
                {
                    return Err(GraphError::InvalidConnection(format!(
                        "host input '{}.{}' reads with delay {} from transient output \
                         '{}.{}'; the payload is released within its iteration, make the \
                         output persistent",
                        name,
                        input.name(),
                        input.delay(),
                        self.nodes[*src].identifier,
                        out_name
                    )));
                }
                consumers[*src][k].push((*id, j));
                per_input[j] = Some(ResolvedInput { src: *src, output: k });
            }
            resolved.push(per_input);
        }
        Ok((resolved, consumers))
    }

    /// Creates `max_delay + 1` copies per output, in graph order.
    #[allow(clippy::type_complexity)]
    fn allocate(
        &mut self,
        order: &[NodeId],
        staged: &SecondaryMap<NodeId, StagedOutputs>,
        consumers: &SecondaryMap<NodeId, Vec<Vec<(NodeId, usize)>>>,
    ) -> Result<
        (
            SlotMap<ResourceId, GraphResource>,
            SecondaryMap<NodeId, Vec<Vec<ResourceId>>>,
        ),
        GraphError,
    > {
        let _span = trace_span!("allocate_outputs").entered();
        let ring_size = self.ring.len() as u32;
        let mut new_resources: SlotMap<ResourceId, GraphResource> = SlotMap::with_key();
        let mut output_resources: SecondaryMap<NodeId, Vec<Vec<ResourceId>>> = SecondaryMap::new();

        for id in order {
            if self.nodes[*id].disabled {
                continue;
            }
            let Some(s) = staged.get(*id) else { continue };
            let mut per_output = Vec::with_capacity(s.outputs.len());
            for (k, output) in s.outputs.iter().enumerate() {
                let consumer_refs: Vec<(&str, &InputConnector)> = consumers[*id][k]
                    .iter()
                    .map(|(dst, j)| {
                        let dst_data = &self.nodes[*dst];
                        (dst_data.identifier.as_str(), &dst_data.inputs[*j])
                    })
                    .collect();
                let max_delay = consumer_refs
                    .iter()
                    .map(|(_, input)| input.delay())
                    .max()
                    .unwrap_or(0);

                let mut copies = Vec::with_capacity(max_delay as usize + 1);
                for copy in 0..=max_delay {
                    let kind = output.create_resource(
                        &consumer_refs,
                        &*self.allocator,
                        &*self.aliasing_allocator,
                        copy,
                        ring_size,
                    )?;
                    self.next_resource_uid += 1;
                    copies.push(new_resources.insert(GraphResource::new(
                        self.next_resource_uid,
                        kind,
                    )));
                }
                debug!(
                    node = %self.nodes[*id].identifier,
                    output = %output.name(),
                    copies = max_delay + 1,
                    persistent = output.is_persistent(),
                    "allocated output"
                );
                per_output.push(copies);
            }
            output_resources.insert(*id, per_output);
        }
        Ok((new_resources, output_resources))
    }

    /// Computes each node's resource-set period and the per-phase instance
    /// tables, then the descriptor layouts and per-slot sets.
    #[allow(clippy::too_many_arguments, clippy::type_complexity)]
    fn precompute(
        &self,
        sorted: &[(String, NodeId)],
        dense: &HashMap<NodeId, usize>,
        staged: &SecondaryMap<NodeId, StagedOutputs>,
        resolved: &[Vec<Option<ResolvedInput>>],
        consumers: &SecondaryMap<NodeId, Vec<Vec<(NodeId, usize)>>>,
        output_resources: &SecondaryMap<NodeId, Vec<Vec<ResourceId>>>,
        ring_size: u32,
    ) -> Result<SecondaryMap<NodeId, NodeBuild>, GraphError> {
        let _span = trace_span!("prepare_resource_sets").entered();
        let mut builds: SecondaryMap<NodeId, NodeBuild> = SecondaryMap::new();

        for (_, id) in sorted {
            if self.nodes[*id].disabled {
                continue;
            }
            let Some(s) = staged.get(*id) else { continue };
            let data = &self.nodes[*id];
            let i = dense[id];
            let own_resources = &output_resources[*id];

            // The node's period is the lcm of the copy counts of every
            // resource it touches.
            let mut counts: Vec<u64> = Vec::new();
            for r in &resolved[i] {
                if let Some(r) = r {
                    counts.push(output_resources[r.src][r.output].len() as u64);
                }
            }
            for copies in own_resources {
                counts.push(copies.len() as u64);
            }
            let period = lcm(counts) as u32;

            let mut resource_sets = Vec::with_capacity(period as usize);
            for set_idx in 0..period {
                let inputs = resolved[i]
                    .iter()
                    .zip(&data.inputs)
                    .map(|(r, input)| {
                        r.as_ref().map(|r| {
                            let copies = &output_resources[r.src][r.output];
                            let c = copies.len() as u32;
                            copies[((set_idx + c - input.delay()) % c) as usize]
                        })
                    })
                    .collect();
                let outputs = own_resources
                    .iter()
                    .map(|copies| copies[(set_idx as usize) % copies.len()])
                    .collect();
                resource_sets.push(ResourceSet { inputs, outputs });
            }

            // Descriptor layout: inputs first, then outputs, in declaration
            // order.
            let mut layout = Vec::new();
            let mut bindings = Vec::new();
            for (j, input) in data.inputs.iter().enumerate() {
                let source = resolved[i][j].map(|r| &staged[r.src].outputs[r.output]);
                if let Some(info) = input.descriptor_info(source) {
                    let binding = layout.len() as u32;
                    layout.push(DescriptorSetLayoutBinding {
                        binding,
                        descriptor_type: info.descriptor_type,
                        descriptor_count: info.descriptor_count,
                        stage_flags: info.stage_flags,
                    });
                    bindings.push(BindingRef {
                        binding,
                        connector: ConnectorRef::Input(j),
                    });
                }
            }
            for (o, output) in s.outputs.iter().enumerate() {
                if let Some(info) = output.descriptor_info() {
                    let binding = layout.len() as u32;
                    layout.push(DescriptorSetLayoutBinding {
                        binding,
                        descriptor_type: info.descriptor_type,
                        descriptor_count: info.descriptor_count,
                        stage_flags: info.stage_flags,
                    });
                    bindings.push(BindingRef {
                        binding,
                        connector: ConnectorRef::Output(o),
                    });
                }
            }
            let descriptor_sets = if layout.is_empty() {
                Vec::new()
            } else {
                (0..ring_size)
                    .map(|_| SlotDescriptor {
                        set: self.device.create_descriptor_set(&layout),
                        written: vec![None; bindings.len()],
                    })
                    .collect()
            };

            builds.insert(
                *id,
                NodeBuild {
                    // The staged output connectors move in at commit time.
                    outputs: Vec::new(),
                    resolved_inputs: resolved[i].clone(),
                    output_consumers: consumers[*id].clone(),
                    output_resources: own_resources.clone(),
                    resource_sets,
                    period,
                    bindings,
                    descriptor_layout: layout,
                    descriptor_sets,
                },
            );
        }
        Ok(builds)
    }

    /// Per-phase resource views for a node's `on_build` hook.
    fn build_io(&self, id: NodeId) -> BuildIo {
        let data = &self.nodes[id];
        let build = data.build.as_ref().expect("node was not built");
        let phases = build
            .resource_sets
            .iter()
            .map(|set| PhaseIo {
                inputs: data
                    .inputs
                    .iter()
                    .zip(&set.inputs)
                    .map(|(c, rid)| {
                        (
                            c.name().to_string(),
                            rid.map(|r| NodeIo::view(&self.resources[r])),
                        )
                    })
                    .collect(),
                outputs: build
                    .outputs
                    .iter()
                    .zip(&set.outputs)
                    .map(|(c, rid)| (c.name().to_string(), NodeIo::view(&self.resources[*rid])))
                    .collect(),
            })
            .collect();
        BuildIo { phases }
    }

    /// Snapshot of the built topology: copy counts, periods and the
    /// precomputed instance tables. Two snapshots of an unedited graph
    /// compare equal across rebuilds.
    pub fn layout(&self) -> Option<GraphLayout> {
        if !self.built {
            return None;
        }

        let mut origin: SecondaryMap<ResourceId, (String, String, u32)> = SecondaryMap::new();
        for &id in &self.flat_topology {
            let data = &self.nodes[id];
            let build = data.build.as_ref()?;
            for (k, copies) in build.output_resources.iter().enumerate() {
                for (c, rid) in copies.iter().enumerate() {
                    origin.insert(
                        *rid,
                        (
                            data.identifier.clone(),
                            build.outputs[k].name().to_string(),
                            c as u32,
                        ),
                    );
                }
            }
        }

        let mut nodes = Vec::new();
        for &id in &self.flat_topology {
            let data = &self.nodes[id];
            let build = data.build.as_ref()?;
            let outputs = build
                .outputs
                .iter()
                .zip(&build.output_resources)
                .map(|(output, copies)| {
                    let usage = match self.resources.get(copies[0]) {
                        Some(res) => match &res.kind {
                            ResourceKind::Image(r) => {
                                format!("{:?}", r.image.create_info.usage)
                            }
                            ResourceKind::Buffer(r) => {
                                format!("{:?}", r.buffer.create_info.usage)
                            }
                            _ => String::new(),
                        },
                        None => String::new(),
                    };
                    OutputLayout {
                        name: output.name().to_string(),
                        kind: match output {
                            OutputConnector::Image(_) => "image",
                            OutputConnector::Buffer(_) => "buffer",
                            OutputConnector::Host(_) => "host",
                            OutputConnector::TextureArray(_) => "texture-array",
                        }
                        .to_string(),
                        copies: copies.len() as u32,
                        persistent: output.is_persistent(),
                        usage,
                    }
                })
                .collect();
            let input_bindings = build
                .resource_sets
                .iter()
                .map(|set| {
                    set.inputs
                        .iter()
                        .map(|rid| rid.and_then(|r| origin.get(r).cloned()))
                        .collect()
                })
                .collect();
            let output_bindings = build
                .resource_sets
                .iter()
                .map(|set| {
                    set.outputs
                        .iter()
                        .map(|rid| origin.get(*rid).map(|(_, _, c)| *c).unwrap_or(0))
                        .collect()
                })
                .collect();
            nodes.push(NodeLayout {
                identifier: data.identifier.clone(),
                period: build.period,
                outputs,
                input_bindings,
                output_bindings,
            });
        }
        Some(GraphLayout { nodes })
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        // Drain all in-flight work before resources are released.
        self.wait();
    }
}

pub(crate) struct StagedOutputs {
    pub(crate) outputs: Vec<OutputConnector>,
    pub(crate) by_name: HashMap<String, usize>,
}

fn flush_barriers(
    cmd: &mut dyn CommandBuffer,
    image_barriers: &mut Vec<crate::device::ImageBarrier>,
    buffer_barriers: &mut Vec<crate::device::BufferBarrier>,
) {
    if !image_barriers.is_empty() || !buffer_barriers.is_empty() {
        cmd.barrier(image_barriers, buffer_barriers);
        image_barriers.clear();
        buffer_barriers.clear();
    }
}

/// Introspection snapshot of a built graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphLayout {
    pub nodes: Vec<NodeLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    pub identifier: String,
    /// Resource-set period of the node.
    pub period: u32,
    pub outputs: Vec<OutputLayout>,
    /// Per phase, per input: `(producer, output, copy index)`.
    pub input_bindings: Vec<Vec<Option<(String, String, u32)>>>,
    /// Per phase, per output: the copy index written.
    pub output_bindings: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub name: String,
    pub kind: String,
    pub copies: u32,
    pub persistent: bool,
    pub usage: String,
}
