//! Recording device backends and small node implementations used by the
//! integration tests. No GPU is involved: command buffers, semaphores and
//! allocators log what the driver asks of them.

#![allow(dead_code)]

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use moulin::vk;
use moulin::{
    BufferBarrier, BufferCreateInfo, BufferHandle, CommandBuffer, CommandPool, ConnectedIo,
    DescriptorSet, DescriptorSetLayoutBinding, Device, Graph, GraphRun, HostIn, HostOut, Image,
    ImageBarrier, ImageCreateInfo, ImageHandle, ImageIn, ImageOut, InputConnector, Node, NodeIo,
    NodeRegistry, NodeResult, OutputConnector, Queue, ResourceAllocator, Semaphore,
    SemaphoreHandle, SemaphoreSignal, SubmitError, SubmitInfo, Texture, TextureHandle,
};

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

// --- command stream -----------------------------------------------------

#[derive(Clone)]
pub enum Command {
    Barrier(Vec<ImageBarrier>, Vec<BufferBarrier>),
    Marker(String),
}

pub type CommandLog = Arc<Mutex<Vec<Command>>>;

pub struct TestCommandBuffer {
    log: CommandLog,
}

impl TestCommandBuffer {
    pub fn marker(&mut self, label: impl Into<String>) {
        self.log.lock().unwrap().push(Command::Marker(label.into()));
    }
}

impl CommandBuffer for TestCommandBuffer {
    fn barrier(&mut self, image_barriers: &[ImageBarrier], buffer_barriers: &[BufferBarrier]) {
        self.log.lock().unwrap().push(Command::Barrier(
            image_barriers.to_vec(),
            buffer_barriers.to_vec(),
        ));
    }

    fn end(&mut self) {}

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct TestCommandPool {
    log: CommandLog,
}

impl CommandPool for TestCommandPool {
    fn reset(&mut self) {}

    fn begin(&mut self) -> Box<dyn CommandBuffer> {
        Box::new(TestCommandBuffer {
            log: self.log.clone(),
        })
    }
}

// --- semaphores ---------------------------------------------------------

pub struct TestSemaphore {
    state: Mutex<u64>,
    cv: Condvar,
}

impl TestSemaphore {
    pub fn new(initial: u64) -> Self {
        TestSemaphore {
            state: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }
}

impl Semaphore for TestSemaphore {
    fn value(&self) -> u64 {
        *self.state.lock().unwrap()
    }

    fn signal(&self, value: u64) {
        let mut state = self.state.lock().unwrap();
        if value > *state {
            *state = value;
            self.cv.notify_all();
        }
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap();
        while *state < value {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self.cv.wait_timeout(state, deadline - now).unwrap();
                    state = guard;
                }
                None => {
                    state = self.cv.wait(state).unwrap();
                }
            }
        }
        true
    }
}

// --- queue --------------------------------------------------------------

/// Queue stub. With `auto_signal` every submission completes instantly;
/// without it completions are released manually via [`signal_next`].
///
/// [`signal_next`]: TestQueue::signal_next
pub struct TestQueue {
    auto_signal: bool,
    pending: Mutex<VecDeque<Vec<SemaphoreSignal>>>,
    pub submissions: Mutex<usize>,
}

impl TestQueue {
    pub fn new(auto_signal: bool) -> Arc<Self> {
        Arc::new(TestQueue {
            auto_signal,
            pending: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(0),
        })
    }

    /// Completes the oldest pending submission.
    pub fn signal_next(&self) -> bool {
        let Some(signals) = self.pending.lock().unwrap().pop_front() else {
            return false;
        };
        for signal in signals {
            signal.semaphore.signal(signal.value);
        }
        true
    }
}

impl Queue for TestQueue {
    fn submit(&self, submit: SubmitInfo<'_>) -> Result<(), SubmitError> {
        *self.submissions.lock().unwrap() += 1;
        let signals = submit.signals.to_vec();
        if self.auto_signal {
            for signal in &signals {
                signal.semaphore.signal(signal.value);
            }
        } else {
            self.pending.lock().unwrap().push_back(signals);
        }
        Ok(())
    }
}

// --- descriptor sets ----------------------------------------------------

pub struct TestDescriptorSet {
    log: Arc<Mutex<Vec<String>>>,
}

impl DescriptorSet for TestDescriptorSet {
    fn write_image(
        &mut self,
        binding: u32,
        array_element: u32,
        texture: &TextureHandle,
        layout: vk::ImageLayout,
    ) {
        self.log.lock().unwrap().push(format!(
            "image binding={} element={} name={} layout={:?}",
            binding, array_element, texture.image.name, layout
        ));
    }

    fn write_buffer(&mut self, binding: u32, buffer: &BufferHandle) {
        self.log
            .lock()
            .unwrap()
            .push(format!("buffer binding={} name={}", binding, buffer.name));
    }
}

// --- device -------------------------------------------------------------

pub struct TestDevice {
    pub log: CommandLog,
    pub descriptor_log: Arc<Mutex<Vec<String>>>,
}

impl TestDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(TestDevice {
            log: Arc::new(Mutex::new(Vec::new())),
            descriptor_log: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

impl Device for TestDevice {
    fn create_command_pool(&self) -> Box<dyn CommandPool> {
        Box::new(TestCommandPool {
            log: self.log.clone(),
        })
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> SemaphoreHandle {
        Arc::new(TestSemaphore::new(initial_value))
    }

    fn create_descriptor_set(
        &self,
        _layout: &[DescriptorSetLayoutBinding],
    ) -> Box<dyn DescriptorSet> {
        Box::new(TestDescriptorSet {
            log: self.descriptor_log.clone(),
        })
    }

    fn wait_semaphores_any(
        &self,
        waits: &[(SemaphoreHandle, u64)],
        timeout: Option<Duration>,
    ) -> Option<usize> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            for (index, (semaphore, value)) in waits.iter().enumerate() {
                if semaphore.value() >= *value {
                    return Some(index);
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return None;
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

// --- allocators ---------------------------------------------------------

#[derive(Clone, Debug)]
pub struct AllocationRecord {
    pub name: String,
    pub kind: &'static str,
    pub aliasing: bool,
}

pub struct TestAllocator {
    aliasing: bool,
    pub records: Arc<Mutex<Vec<AllocationRecord>>>,
    dummy: TextureHandle,
}

impl TestAllocator {
    pub fn new(aliasing: bool, records: Arc<Mutex<Vec<AllocationRecord>>>) -> Arc<Self> {
        let dummy_image = Arc::new(Image {
            name: "dummy".into(),
            create_info: ImageCreateInfo::color_2d(
                vk::Format::R8G8B8A8_UNORM,
                vk::Extent3D {
                    width: 1,
                    height: 1,
                    depth: 1,
                },
                vk::ImageUsageFlags::SAMPLED,
            ),
            handle: vk::Image::null(),
        });
        Arc::new(TestAllocator {
            aliasing,
            records,
            dummy: Arc::new(Texture {
                image: dummy_image,
                view: vk::ImageView::null(),
            }),
        })
    }
}

impl ResourceAllocator for TestAllocator {
    fn create_image(
        &self,
        create_info: &ImageCreateInfo,
        name: &str,
    ) -> Result<ImageHandle, moulin::AllocationError> {
        self.records.lock().unwrap().push(AllocationRecord {
            name: name.to_string(),
            kind: "image",
            aliasing: self.aliasing,
        });
        Ok(Arc::new(Image {
            name: name.to_string(),
            create_info: *create_info,
            handle: vk::Image::null(),
        }))
    }

    fn create_buffer(
        &self,
        create_info: &BufferCreateInfo,
        name: &str,
    ) -> Result<BufferHandle, moulin::AllocationError> {
        self.records.lock().unwrap().push(AllocationRecord {
            name: name.to_string(),
            kind: "buffer",
            aliasing: self.aliasing,
        });
        Ok(Arc::new(moulin::Buffer {
            name: name.to_string(),
            create_info: *create_info,
            handle: vk::Buffer::null(),
        }))
    }

    fn create_texture(&self, image: &ImageHandle) -> Result<TextureHandle, moulin::AllocationError> {
        Ok(Arc::new(Texture {
            image: image.clone(),
            view: vk::ImageView::null(),
        }))
    }

    fn dummy_texture(&self) -> TextureHandle {
        self.dummy.clone()
    }
}

// --- fixture ------------------------------------------------------------

pub struct Fixture {
    pub device: Arc<TestDevice>,
    pub queue: Arc<TestQueue>,
    pub allocator: Arc<TestAllocator>,
    pub aliasing_allocator: Arc<TestAllocator>,
    pub records: Arc<Mutex<Vec<AllocationRecord>>>,
}

impl Fixture {
    pub fn new() -> Fixture {
        Self::with_queue(TestQueue::new(true))
    }

    pub fn with_queue(queue: Arc<TestQueue>) -> Fixture {
        init_tracing();
        let records = Arc::new(Mutex::new(Vec::new()));
        Fixture {
            device: TestDevice::new(),
            queue,
            allocator: TestAllocator::new(false, records.clone()),
            aliasing_allocator: TestAllocator::new(true, records.clone()),
            records,
        }
    }

    pub fn graph(&self) -> Graph {
        self.graph_with_registry(NodeRegistry::new())
    }

    pub fn graph_with_registry(&self, registry: NodeRegistry) -> Graph {
        Graph::new(
            self.device.clone(),
            self.queue.clone(),
            self.allocator.clone(),
            self.aliasing_allocator.clone(),
            registry,
        )
    }

    pub fn commands(&self) -> Vec<Command> {
        self.device.log.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.device.log.lock().unwrap().clear();
    }

    /// The image barriers in recording order, flattened across batches.
    pub fn image_barriers(&self) -> Vec<ImageBarrier> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                Command::Barrier(images, _) => Some(images),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn allocations(&self) -> Vec<AllocationRecord> {
        self.records.lock().unwrap().clone()
    }
}

// --- nodes --------------------------------------------------------------

fn marker(cmd: &mut dyn CommandBuffer, label: &str) {
    if let Some(cmd) = cmd.as_any_mut().downcast_mut::<TestCommandBuffer>() {
        cmd.marker(label);
    }
}

/// Produces one managed image.
pub struct SourceNode {
    pub label: String,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub persistent: bool,
}

impl SourceNode {
    pub fn new(label: &str, width: u32, height: u32) -> Self {
        SourceNode {
            label: label.to_string(),
            format: vk::Format::R8G8B8A8_UNORM,
            width,
            height,
            persistent: false,
        }
    }
}

impl Node for SourceNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        Vec::new()
    }

    fn describe_outputs(&mut self, _io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        let mut out = ImageOut::compute_write("out", self.format, self.width, self.height);
        if self.persistent {
            out = out.persistent();
        }
        Ok(vec![OutputConnector::Image(out)])
    }

    fn process(
        &mut self,
        _run: &mut GraphRun,
        cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        _io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        marker(cmd, &format!("{}:process", self.label));
        Ok(())
    }
}

/// Consumes one managed image with a compute read.
pub struct SinkNode {
    pub label: String,
    pub optional: bool,
}

impl SinkNode {
    pub fn new(label: &str) -> Self {
        SinkNode {
            label: label.to_string(),
            optional: false,
        }
    }
}

impl Node for SinkNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        let mut input = ImageIn::compute_read("in");
        if self.optional {
            input = input.optional();
        }
        vec![InputConnector::Image(input)]
    }

    fn describe_outputs(&mut self, _io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        Ok(Vec::new())
    }

    fn process(
        &mut self,
        _run: &mut GraphRun,
        cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        _io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        marker(cmd, &format!("{}:process", self.label));
        Ok(())
    }
}

/// Consumes one image via transfer and produces one sized like its input.
pub struct PassthroughNode {
    pub label: String,
}

impl PassthroughNode {
    pub fn new(label: &str) -> Self {
        PassthroughNode {
            label: label.to_string(),
        }
    }
}

impl Node for PassthroughNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        vec![InputConnector::Image(ImageIn::compute_read("in"))]
    }

    fn describe_outputs(&mut self, io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        let info = io
            .image_create_info("in")
            .ok_or("input is not an image")?;
        Ok(vec![OutputConnector::Image(ImageOut::compute_write(
            "out",
            info.format,
            info.extent.width,
            info.extent.height,
        ))])
    }

    fn process(
        &mut self,
        _run: &mut GraphRun,
        cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        _io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        marker(cmd, &format!("{}:process", self.label));
        Ok(())
    }
}

/// Reads an image with the transfer-src layout (for layout-conflict tests).
pub struct TransferSinkNode {
    pub label: String,
}

impl Node for TransferSinkNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        vec![InputConnector::Image(ImageIn::transfer_src("in"))]
    }

    fn describe_outputs(&mut self, _io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        Ok(Vec::new())
    }

    fn process(
        &mut self,
        _run: &mut GraphRun,
        cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        _io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        marker(cmd, &format!("{}:process", self.label));
        Ok(())
    }
}

/// Writes an image and reads its own output of `delay` iterations ago.
pub struct FeedbackNode {
    pub delay: u32,
}

impl Node for FeedbackNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        vec![InputConnector::Image(
            ImageIn::compute_read("in").with_delay(self.delay),
        )]
    }

    fn describe_outputs(&mut self, _io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        Ok(vec![OutputConnector::Image(ImageOut::compute_write(
            "out",
            vk::Format::R8G8B8A8_UNORM,
            8,
            8,
        ))])
    }

    fn process(
        &mut self,
        _run: &mut GraphRun,
        cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        _io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        marker(cmd, "feedback:process");
        Ok(())
    }
}

/// Consumes an image at a configurable delay.
pub struct DelaySinkNode {
    pub delay: u32,
}

impl Node for DelaySinkNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        vec![InputConnector::Image(
            ImageIn::compute_read("in").with_delay(self.delay),
        )]
    }

    fn describe_outputs(&mut self, _io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        Ok(Vec::new())
    }

    fn process(
        &mut self,
        _run: &mut GraphRun,
        _cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        _io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        Ok(())
    }
}

/// Fails its `describe_outputs` hook.
pub struct FailingNode;

impl Node for FailingNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        Vec::new()
    }

    fn describe_outputs(&mut self, _io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        Err("deliberate failure".into())
    }

    fn process(
        &mut self,
        _run: &mut GraphRun,
        _cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        _io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        Ok(())
    }
}

/// Produces a host payload carrying the current iteration number.
pub struct HostProducerNode {
    pub persistent: bool,
    pub set_every_iteration: bool,
}

impl Node for HostProducerNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        Vec::new()
    }

    fn describe_outputs(&mut self, _io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        let mut out = HostOut::new::<u64>("out");
        if self.persistent {
            out = out.persistent();
        }
        Ok(vec![OutputConnector::Host(out)])
    }

    fn process(
        &mut self,
        run: &mut GraphRun,
        _cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        if self.set_every_iteration || run.iteration() == 0 {
            io.set_output_host("out", run.iteration())?;
        }
        Ok(())
    }
}

/// Records the host payloads it observes.
pub struct HostConsumerNode {
    pub delay: u32,
    pub seen: Arc<Mutex<Vec<Option<u64>>>>,
}

impl Node for HostConsumerNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        vec![InputConnector::Host(
            HostIn::new::<u64>("in").with_delay(self.delay),
        )]
    }

    fn describe_outputs(&mut self, _io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        Ok(Vec::new())
    }

    fn process(
        &mut self,
        _run: &mut GraphRun,
        _cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        let value = io.input_host::<u64>("in").map(|v| *v);
        self.seen.lock().unwrap().push(value);
        Ok(())
    }
}

/// A configurable node for properties round-trips.
#[derive(Default)]
pub struct CounterNode {
    pub value: u32,
}

impl Node for CounterNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        Vec::new()
    }

    fn describe_outputs(&mut self, _io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        Ok(Vec::new())
    }

    fn process(
        &mut self,
        _run: &mut GraphRun,
        _cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        _io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        Ok(())
    }

    fn properties(&mut self, props: &mut dyn moulin::Properties) -> moulin::NodeStatus {
        props.config_u32("value", &mut self.value, "an arbitrary counter");
        moulin::NodeStatus::empty()
    }
}

/// Emits a string event every iteration.
pub struct EventNode;

impl Node for EventNode {
    fn describe_inputs(&self) -> Vec<InputConnector> {
        Vec::new()
    }

    fn describe_outputs(&mut self, _io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>> {
        Ok(Vec::new())
    }

    fn process(
        &mut self,
        run: &mut GraphRun,
        _cmd: &mut dyn CommandBuffer,
        _descriptor_set: Option<&mut dyn DescriptorSet>,
        _io: &mut NodeIo<'_>,
    ) -> NodeResult<()> {
        run.emit_event("tick");
        Ok(())
    }
}

/// Registry with every node type used by the reload tests.
pub fn test_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register("source", "produces one image", || {
        SourceNode::new("source", 16, 16)
    });
    registry.register("passthrough", "one image in, one image out", || {
        PassthroughNode::new("passthrough")
    });
    registry.register("sink", "consumes one image", || SinkNode::new("sink"));
    registry.register("counter", "configurable counter", CounterNode::default);
    registry
}
