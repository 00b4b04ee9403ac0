//! moulin: a processing-graph core for Vulkan-style devices.
//!
//! Users declare nodes with typed input/output connectors and desired edges
//! between them. The driver validates the topology, allocates and aliases
//! the GPU resources behind every output, precomputes which resource
//! instance each connector sees in every iteration phase (this is how
//! delayed feedback edges work without runtime shuffling), and drives a
//! bounded ring of in-flight iterations with the barriers and layout
//! transitions each node requires.
//!
//! The Vulkan bindings themselves are external collaborators: everything
//! the driver needs from them is behind the traits in [`device`] and
//! [`alloc`].

pub use ash::{self, vk};

pub use crate::{
    alloc::{
        Buffer, BufferCreateInfo, BufferHandle, Image, ImageCreateInfo, ImageHandle,
        ResourceAllocator, Texture, TextureHandle,
    },
    connectors::{
        BufferIn, BufferOut, ConnectorStatus, DescriptorInfo, HostIn, HostOut, ImageIn, ImageOut,
        InputConnector, OutputConnector, TextureArrayIn, TextureArrayOut,
    },
    device::{
        all_levels_and_layers, BufferBarrier, CommandBuffer, CommandPool, DescriptorSet,
        DescriptorSetLayoutBinding, Device, ImageBarrier, Queue, Semaphore, SemaphoreHandle,
        SemaphoreSignal, SemaphoreWait, SubmitError, SubmitInfo,
    },
    error::{AllocationError, GraphError, NodeError, NodeResult},
    graph::{
        BuildIo, ConnectedIo, ConnectionDesc, Graph, GraphLayout, GraphRun, Node, NodeId, NodeIo,
        NodeLayout, NodeRegistry, NodeStatistics, NodeStatus, OutputLayout, PhaseIo, ResourceView,
    },
    profiler::{ProfileEntry, ProfileReport, Profiler, ProfilerHandle},
    properties::{JsonDumpProperties, JsonLoadProperties, Properties},
    resources::{
        BufferResource, GraphResource, HostResource, ImageResource, ResourceId,
        TextureArrayResource,
    },
    sync::{InFlightData, SyncDispatcher},
};

pub mod alloc;
pub mod connectors;
pub mod device;
pub mod error;
pub mod graph;
pub mod profiler;
pub mod properties;
pub mod resources;
pub mod sync;
pub mod utils;
