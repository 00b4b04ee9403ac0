//! End-to-end driver scenarios against the recording backends.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use moulin::vk;
use moulin::{Device as _, GraphError, InputConnector, Node, ResourceAllocator as _};

#[test]
fn identity_pipeline() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();

    graph
        .add_node_object("source", Box::new(SourceNode::new("src", 4, 4)), Some("src"))
        .unwrap();
    graph
        .add_node_object("sink", Box::new(SinkNode::new("sink")), Some("sink"))
        .unwrap();
    graph.add_connection("src", "sink", "out", "in").unwrap();

    for _ in 0..3 {
        graph.run().unwrap();
    }

    // One allocation for the single transient output, from the aliasing
    // allocator.
    let allocations = fixture.allocations();
    assert_eq!(allocations.len(), 1);
    assert!(allocations[0].aliasing);

    // Per iteration: one barrier before the producer (write acquisition,
    // discarding), one before the consumer (read acquisition), each flushed
    // as its own dependency.
    let commands = fixture.commands();
    let per_iteration: Vec<&[Command]> = commands.chunks(4).collect();
    assert_eq!(commands.len(), 12);
    for chunk in per_iteration {
        let Command::Barrier(images, _) = &chunk[0] else {
            panic!("expected the producer's pre-barrier");
        };
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(images[0].new_layout, vk::ImageLayout::GENERAL);

        assert!(matches!(&chunk[1], Command::Marker(m) if m == "src:process"));

        let Command::Barrier(images, _) = &chunk[2] else {
            panic!("expected the consumer's pre-barrier");
        };
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(images[0].new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(images[0].src_access_mask, vk::AccessFlags2::SHADER_WRITE);
        assert_eq!(images[0].dst_access_mask, vk::AccessFlags2::SHADER_READ);

        assert!(matches!(&chunk[3], Command::Marker(m) if m == "sink:process"));
    }
}

#[test]
fn feedback_delay_one_uses_two_copies() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();

    graph
        .add_node_object("feedback", Box::new(FeedbackNode { delay: 1 }), Some("n"))
        .unwrap();
    graph.add_connection("n", "n", "out", "in").unwrap();

    for _ in 0..4 {
        graph.run().unwrap();
    }

    let layout = graph.layout().unwrap();
    let node = &layout.nodes[0];
    assert_eq!(node.outputs[0].copies, 2);
    assert_eq!(node.period, 2);

    // Phase s reads the copy written in phase s - 1.
    for s in 0..2usize {
        let read = node.input_bindings[s][0].as_ref().unwrap();
        let written_previous = node.output_bindings[(s + 1) % 2][0];
        assert_eq!(read.2, written_previous);
        // Closed form: (s + copies - delay) % copies.
        assert_eq!(read.2, ((s + 2 - 1) % 2) as u32);
    }
}

#[test]
fn fan_out_layout_conflict_fails_naming_both_sinks() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();

    graph
        .add_node_object("source", Box::new(SourceNode::new("src", 4, 4)), Some("src"))
        .unwrap();
    graph
        .add_node_object("sink", Box::new(SinkNode::new("a")), Some("a"))
        .unwrap();
    graph
        .add_node_object(
            "transfer-sink",
            Box::new(TransferSinkNode { label: "b".into() }),
            Some("b"),
        )
        .unwrap();
    graph.add_connection("src", "a", "out", "in").unwrap();
    graph.add_connection("src", "b", "out", "in").unwrap();

    let err = graph.run().unwrap_err();
    match &err {
        GraphError::Connector(message) => {
            assert!(message.contains("a.in"), "missing first sink: {message}");
            assert!(message.contains("b.in"), "missing second sink: {message}");
        }
        other => panic!("expected a connector error, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 2);

    // The driver refuses to run until the graph is fixed.
    assert!(graph.run().is_err());
    assert!(graph.remove_node("b"));
    graph.run().unwrap();
}

#[test]
fn serial_chain_aliases_and_orders_consumption() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();

    graph
        .add_node_object("source", Box::new(SourceNode::new("a", 1024, 1024)), Some("a"))
        .unwrap();
    graph
        .add_node_object("passthrough", Box::new(PassthroughNode::new("b")), Some("b"))
        .unwrap();
    graph
        .add_node_object("sink", Box::new(SinkNode::new("c")), Some("c"))
        .unwrap();
    graph.add_connection("a", "b", "out", "in").unwrap();
    graph.add_connection("b", "c", "out", "in").unwrap();

    graph.run().unwrap();

    // Both transient images come from the aliasing allocator, with records
    // created in graph order (the implicit liveness contract).
    let allocations = fixture.allocations();
    assert_eq!(allocations.len(), 2);
    assert!(allocations.iter().all(|a| a.aliasing));
    assert!(allocations[0].name.contains("out"));

    // A is fully consumed (read barrier) before B is first written.
    let barriers = fixture.image_barriers();
    let a_read = barriers
        .iter()
        .position(|b| {
            b.image.create_info.extent.width == 1024
                && b.new_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        })
        .expect("a must be acquired for reading");
    let b_write = barriers
        .iter()
        .enumerate()
        .filter(|(_, b)| b.new_layout == vk::ImageLayout::GENERAL)
        .map(|(i, _)| i)
        .nth(1)
        .expect("b must be acquired for writing");
    assert!(a_read < b_write, "a consumed at {a_read}, b written at {b_write}");
}

#[test]
fn ring_occupancy_blocks_at_capacity() {
    let queue = TestQueue::new(false);
    let fixture = Fixture::with_queue(queue.clone());
    let mut graph = fixture.graph();
    graph.set_iterations_in_flight(2);
    graph.set_ring_wait_timeout(Some(Duration::from_millis(50)));

    graph
        .add_node_object("source", Box::new(SourceNode::new("src", 4, 4)), Some("src"))
        .unwrap();

    graph.run().unwrap();
    graph.run().unwrap();

    // Both ring slots are occupied and the queue never signals: the third
    // iteration must block in the ring-slot wait.
    match graph.run() {
        Err(GraphError::RingWaitTimeout) => {}
        other => panic!("expected a ring wait timeout, got {other:?}"),
    }

    // Completing the oldest submission unblocks the slot.
    assert!(queue.signal_next());
    graph.run().unwrap();
    assert_eq!(*queue.submissions.lock().unwrap(), 3);

    // Drain the remaining submissions so the driver can shut down.
    while queue.signal_next() {}
}

#[test]
fn reload_reproduces_the_same_schedule() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph_with_registry(test_registry());

    graph.add_node("source", Some("src")).unwrap();
    graph.add_node("passthrough", Some("p1")).unwrap();
    graph.add_node("passthrough", Some("p2")).unwrap();
    graph.add_node("sink", Some("end")).unwrap();
    graph.add_node("counter", Some("cnt")).unwrap();
    graph.add_connection("src", "p1", "out", "in").unwrap();
    graph.add_connection("p1", "p2", "out", "in").unwrap();
    graph.add_connection("p2", "end", "out", "in").unwrap();

    graph.run().unwrap();
    graph.run().unwrap();
    let dump = graph.dump_json();
    let reference_layout = graph.layout().unwrap();
    let reference_commands = fixture.commands().len();
    drop(graph);

    // A fresh driver reconstructed from the dump produces the same
    // topology, allocation plan and command stream.
    let fixture2 = Fixture::new();
    let mut graph2 = fixture2.graph_with_registry(test_registry());
    graph2.load_json(dump.clone());
    graph2.run().unwrap();
    graph2.run().unwrap();

    assert_eq!(graph2.layout().unwrap(), reference_layout);
    assert_eq!(fixture2.commands().len(), reference_commands);
    assert_eq!(graph2.dump_json(), dump);
}

#[test]
fn events_reach_listeners_after_submit() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    graph.add_event_listener(move |event| sink.lock().unwrap().push(event.to_string()));

    graph
        .add_node_object("event", Box::new(EventNode), Some("ev"))
        .unwrap();
    graph.run().unwrap();
    graph.run().unwrap();

    assert_eq!(*events.lock().unwrap(), vec!["tick", "tick"]);
}

#[test]
fn submit_callbacks_run_on_the_driver_thread() {
    struct CallbackNode {
        hits: Arc<Mutex<u32>>,
    }

    impl Node for CallbackNode {
        fn describe_inputs(&self) -> Vec<InputConnector> {
            Vec::new()
        }

        fn describe_outputs(
            &mut self,
            _io: &moulin::ConnectedIo<'_>,
        ) -> moulin::NodeResult<Vec<moulin::OutputConnector>> {
            Ok(Vec::new())
        }

        fn process(
            &mut self,
            run: &mut moulin::GraphRun,
            _cmd: &mut dyn moulin::CommandBuffer,
            _descriptor_set: Option<&mut dyn moulin::DescriptorSet>,
            _io: &mut moulin::NodeIo<'_>,
        ) -> moulin::NodeResult<()> {
            let hits = self.hits.clone();
            run.add_submit_callback(move |_queue, _run| {
                *hits.lock().unwrap() += 1;
            });
            Ok(())
        }
    }

    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    let hits = Arc::new(Mutex::new(0));
    graph
        .add_node_object(
            "callback",
            Box::new(CallbackNode { hits: hits.clone() }),
            Some("cb"),
        )
        .unwrap();

    graph.run().unwrap();
    graph.run().unwrap();
    assert_eq!(*hits.lock().unwrap(), 2);
}

#[test]
fn dispatcher_runs_tasks_once_the_semaphore_fires() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let fired = Arc::new(Mutex::new(false));
    let semaphore = fixture.device.create_timeline_semaphore(0);
    {
        let fired = fired.clone();
        graph
            .sync_dispatcher()
            .submit(semaphore.clone(), 5, move || {
                *fired.lock().unwrap() = true;
            });
    }

    std::thread::sleep(Duration::from_millis(20));
    assert!(!*fired.lock().unwrap());

    semaphore.signal(5);
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !*fired.lock().unwrap() {
        assert!(std::time::Instant::now() < deadline, "task never ran");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn texture_array_slots_reach_readers_and_descriptors() {
    use moulin::{ConnectedIo, OutputConnector, TextureArrayIn, TextureArrayOut, TextureHandle};

    struct ArrayWriter {
        texture: TextureHandle,
    }

    impl Node for ArrayWriter {
        fn describe_inputs(&self) -> Vec<InputConnector> {
            Vec::new()
        }

        fn describe_outputs(
            &mut self,
            _io: &ConnectedIo<'_>,
        ) -> moulin::NodeResult<Vec<OutputConnector>> {
            Ok(vec![OutputConnector::TextureArray(TextureArrayOut::new(
                "array", 4,
            ))])
        }

        fn process(
            &mut self,
            _run: &mut moulin::GraphRun,
            _cmd: &mut dyn moulin::CommandBuffer,
            _descriptor_set: Option<&mut dyn moulin::DescriptorSet>,
            io: &mut moulin::NodeIo<'_>,
        ) -> moulin::NodeResult<()> {
            let array = io
                .output_texture_array_mut("array")
                .ok_or("array output missing")?;
            array.set(1, Some(self.texture.clone()), vk::ImageLayout::GENERAL);
            Ok(())
        }
    }

    struct ArrayReader;

    impl Node for ArrayReader {
        fn describe_inputs(&self) -> Vec<InputConnector> {
            vec![InputConnector::TextureArray(TextureArrayIn::compute_read(
                "in",
            ))]
        }

        fn describe_outputs(
            &mut self,
            _io: &ConnectedIo<'_>,
        ) -> moulin::NodeResult<Vec<OutputConnector>> {
            Ok(Vec::new())
        }

        fn process(
            &mut self,
            _run: &mut moulin::GraphRun,
            _cmd: &mut dyn moulin::CommandBuffer,
            _descriptor_set: Option<&mut dyn moulin::DescriptorSet>,
            io: &mut moulin::NodeIo<'_>,
        ) -> moulin::NodeResult<()> {
            let array = io.input_texture_array("in").ok_or("array input missing")?;
            if array.get(1).is_none() {
                return Err("slot 1 should be bound".into());
            }
            Ok(())
        }
    }

    let fixture = Fixture::new();
    let mut graph = fixture.graph();

    let streamed_image = fixture
        .allocator
        .create_image(
            &moulin::ImageCreateInfo::color_2d(
                vk::Format::R8G8B8A8_UNORM,
                vk::Extent3D {
                    width: 32,
                    height: 32,
                    depth: 1,
                },
                vk::ImageUsageFlags::SAMPLED,
            ),
            "streamed",
        )
        .unwrap();
    let streamed = fixture.allocator.create_texture(&streamed_image).unwrap();

    graph
        .add_node_object("array-writer", Box::new(ArrayWriter { texture: streamed }), Some("w"))
        .unwrap();
    graph
        .add_node_object("array-reader", Box::new(ArrayReader), Some("r"))
        .unwrap();
    graph.add_connection("w", "r", "array", "in").unwrap();

    for _ in 0..3 {
        graph.run().unwrap();
    }
    assert!(graph.node_errors("r").unwrap().is_empty());

    // The bound texture is transitioned to the readers' layout once per
    // iteration (the writer re-binds it in GENERAL every time).
    let transitions: Vec<_> = fixture
        .image_barriers()
        .into_iter()
        .filter(|b| {
            b.image.name == "streamed"
                && b.new_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        })
        .collect();
    assert_eq!(transitions.len(), 3);

    // Descriptor writes: the full table once per ring slot (dummy in the
    // unbound slots), then nothing while the table is unchanged.
    let writes = fixture.device.descriptor_log.lock().unwrap();
    assert_eq!(writes.len(), 8);
    assert!(writes.iter().any(|w| w.contains("name=dummy")));
    assert!(writes.iter().any(|w| w.contains("name=streamed")));
}

#[test]
fn buffer_pipeline_emits_buffer_barriers() {
    use moulin::{BufferIn, BufferOut, ConnectedIo, OutputConnector};

    struct BufferSource;
    impl Node for BufferSource {
        fn describe_inputs(&self) -> Vec<InputConnector> {
            Vec::new()
        }
        fn describe_outputs(
            &mut self,
            _io: &ConnectedIo<'_>,
        ) -> moulin::NodeResult<Vec<OutputConnector>> {
            Ok(vec![OutputConnector::Buffer(BufferOut::compute_write(
                "out", 4096,
            ))])
        }
        fn process(
            &mut self,
            _run: &mut moulin::GraphRun,
            _cmd: &mut dyn moulin::CommandBuffer,
            _descriptor_set: Option<&mut dyn moulin::DescriptorSet>,
            _io: &mut moulin::NodeIo<'_>,
        ) -> moulin::NodeResult<()> {
            Ok(())
        }
    }

    struct BufferSink;
    impl Node for BufferSink {
        fn describe_inputs(&self) -> Vec<InputConnector> {
            vec![InputConnector::Buffer(BufferIn::compute_read("in"))]
        }
        fn describe_outputs(
            &mut self,
            _io: &ConnectedIo<'_>,
        ) -> moulin::NodeResult<Vec<OutputConnector>> {
            Ok(Vec::new())
        }
        fn process(
            &mut self,
            _run: &mut moulin::GraphRun,
            _cmd: &mut dyn moulin::CommandBuffer,
            _descriptor_set: Option<&mut dyn moulin::DescriptorSet>,
            io: &mut moulin::NodeIo<'_>,
        ) -> moulin::NodeResult<()> {
            io.input_buffer("in").ok_or("buffer missing")?;
            Ok(())
        }
    }

    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    graph
        .add_node_object("buffer-source", Box::new(BufferSource), Some("src"))
        .unwrap();
    graph
        .add_node_object("buffer-sink", Box::new(BufferSink), Some("sink"))
        .unwrap();
    graph.add_connection("src", "sink", "out", "in").unwrap();

    graph.run().unwrap();

    let allocations = fixture.allocations();
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].kind, "buffer");

    // The consumer's read barrier carries the combined masks.
    let read = fixture
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            Command::Barrier(_, buffers) if !buffers.is_empty() => Some(buffers),
            _ => None,
        })
        .nth(1)
        .expect("expected a read barrier batch");
    assert_eq!(read[0].src_access_mask, vk::AccessFlags2::SHADER_WRITE);
    assert_eq!(read[0].dst_access_mask, vk::AccessFlags2::SHADER_READ);
}

#[test]
fn in_flight_data_is_kept_per_ring_slot() {
    struct SlotCounterNode {
        observed: Arc<Mutex<Vec<u64>>>,
    }

    impl Node for SlotCounterNode {
        fn describe_inputs(&self) -> Vec<InputConnector> {
            Vec::new()
        }
        fn describe_outputs(
            &mut self,
            _io: &moulin::ConnectedIo<'_>,
        ) -> moulin::NodeResult<Vec<moulin::OutputConnector>> {
            Ok(Vec::new())
        }
        fn process(
            &mut self,
            run: &mut moulin::GraphRun,
            _cmd: &mut dyn moulin::CommandBuffer,
            _descriptor_set: Option<&mut dyn moulin::DescriptorSet>,
            _io: &mut moulin::NodeIo<'_>,
        ) -> moulin::NodeResult<()> {
            let data = run.in_flight_data();
            let mut data = data.lock();
            let counter = data.get_or_insert_with("slot-counter", || 0u64);
            self.observed.lock().unwrap().push(*counter);
            *counter += 1;
            Ok(())
        }
    }

    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    graph.set_iterations_in_flight(2);
    let observed = Arc::new(Mutex::new(Vec::new()));
    graph
        .add_node_object(
            "slot-counter",
            Box::new(SlotCounterNode {
                observed: observed.clone(),
            }),
            Some("sc"),
        )
        .unwrap();

    for _ in 0..4 {
        graph.run().unwrap();
    }
    // Two slots alternate, each carrying its own counter.
    assert_eq!(*observed.lock().unwrap(), vec![0, 0, 1, 1]);
}

#[test]
fn fixed_delta_overwrites_the_clock() {
    struct TimeProbeNode {
        samples: Arc<Mutex<Vec<(f64, f64)>>>,
    }

    impl Node for TimeProbeNode {
        fn describe_inputs(&self) -> Vec<InputConnector> {
            Vec::new()
        }
        fn describe_outputs(
            &mut self,
            _io: &moulin::ConnectedIo<'_>,
        ) -> moulin::NodeResult<Vec<moulin::OutputConnector>> {
            Ok(Vec::new())
        }
        fn process(
            &mut self,
            run: &mut moulin::GraphRun,
            _cmd: &mut dyn moulin::CommandBuffer,
            _descriptor_set: Option<&mut dyn moulin::DescriptorSet>,
            _io: &mut moulin::NodeIo<'_>,
        ) -> moulin::NodeResult<()> {
            self.samples
                .lock()
                .unwrap()
                .push((run.time_delta(), run.elapsed()));
            Ok(())
        }
    }

    let fixture = Fixture::new();
    let mut graph = fixture.graph();
    graph.set_time_overwrite(2, 16.0);
    let samples = Arc::new(Mutex::new(Vec::new()));
    graph
        .add_node_object(
            "time-probe",
            Box::new(TimeProbeNode {
                samples: samples.clone(),
            }),
            Some("probe"),
        )
        .unwrap();

    for _ in 0..3 {
        graph.run().unwrap();
    }

    let samples = samples.lock().unwrap();
    for (i, (delta, elapsed)) in samples.iter().enumerate() {
        assert!((delta - 0.016).abs() < 1e-9, "delta was {delta}");
        let expected = 0.016 * (i + 1) as f64;
        assert!((elapsed - expected).abs() < 1e-9, "elapsed was {elapsed}");
    }
}
