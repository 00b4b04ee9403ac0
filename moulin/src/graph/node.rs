//! The node contract and the resolved I/O views handed to node hooks.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use slotmap::SlotMap;

use crate::alloc::{BufferHandle, ImageCreateInfo, ImageHandle, TextureHandle};
use crate::connectors::{InputConnector, OutputConnector};
use crate::device::{CommandBuffer, DescriptorSet};
use crate::error::{NodeError, NodeResult};
use crate::graph::run::GraphRun;
use crate::properties::Properties;
use crate::resources::{GraphResource, ResourceId, ResourceKind, TextureArrayResource};

bitflags! {
    /// Status bits returned from [`Node::properties`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeStatus: u32 {
        /// The change requires a graph rebuild.
        const NEEDS_REBUILD = 1 << 0;
        /// The node asks to be removed from the graph.
        const REMOVE_NODE = 1 << 1;
    }
}

/// A user-supplied processing unit.
///
/// Inputs are declared once, when the node is added to the graph. Outputs are
/// declared at build time, after the inputs have been resolved, so an output
/// can depend on the producing side of an input (e.g. inherit its extent).
pub trait Node: Send {
    /// Declared input connectors. Called once when the node enters the graph.
    fn describe_inputs(&self) -> Vec<InputConnector>;

    /// Declared output connectors. `io` carries the resolved producer output
    /// for every connected delay-0 input; feedback and unconnected optional
    /// inputs resolve to `None`.
    fn describe_outputs(&mut self, io: &ConnectedIo<'_>) -> NodeResult<Vec<OutputConnector>>;

    /// Called after allocation with the precomputed per-phase resources.
    fn on_build(&mut self, _io: &BuildIo) -> NodeResult<()> {
        Ok(())
    }

    /// Records the node's work for one iteration.
    fn process(
        &mut self,
        run: &mut GraphRun,
        cmd: &mut dyn CommandBuffer,
        descriptor_set: Option<&mut dyn DescriptorSet>,
        io: &mut NodeIo<'_>,
    ) -> NodeResult<()>;

    /// Publishes configuration and status.
    fn properties(&mut self, _props: &mut dyn Properties) -> NodeStatus {
        NodeStatus::empty()
    }
}

/// Execution statistics of one node.
#[derive(Debug, Clone, Default)]
pub struct NodeStatistics {
    pub runs: u64,
    pub last_process: Duration,
    pub total_process: Duration,
}

/// Resolved producer-side information, passed to
/// [`describe_outputs`](Node::describe_outputs).
pub struct ConnectedIo<'a> {
    pub(crate) entries: Vec<(&'a str, Option<&'a OutputConnector>)>,
}

impl<'a> ConnectedIo<'a> {
    /// The producing output connected to `input_name`, if resolved.
    pub fn output(&self, input_name: &str) -> Option<&'a OutputConnector> {
        self.entries
            .iter()
            .find(|(name, _)| *name == input_name)
            .and_then(|(_, output)| *output)
    }

    /// Create info of the image feeding `input_name`.
    pub fn image_create_info(&self, input_name: &str) -> Option<&'a ImageCreateInfo> {
        match self.output(input_name)? {
            OutputConnector::Image(out) => Some(&out.create_info),
            _ => None,
        }
    }
}

/// A cheap, read-only view of one resource instance, used in
/// [`Node::on_build`].
#[derive(Clone)]
pub enum ResourceView {
    Image(ImageHandle),
    Buffer(BufferHandle),
    TextureArray { array_size: u32 },
    Host,
}

/// Resolved resources for one iteration phase.
pub struct PhaseIo {
    pub(crate) inputs: Vec<(String, Option<ResourceView>)>,
    pub(crate) outputs: Vec<(String, ResourceView)>,
}

impl PhaseIo {
    pub fn input(&self, name: &str) -> Option<&ResourceView> {
        self.inputs
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn output(&self, name: &str) -> Option<&ResourceView> {
        self.outputs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn input_image(&self, name: &str) -> Option<ImageHandle> {
        match self.input(name)? {
            ResourceView::Image(image) => Some(image.clone()),
            _ => None,
        }
    }

    pub fn output_image(&self, name: &str) -> Option<ImageHandle> {
        match self.output(name)? {
            ResourceView::Image(image) => Some(image.clone()),
            _ => None,
        }
    }
}

/// Per-phase resource views passed to [`Node::on_build`]. One entry per
/// phase `s` of the node's resource-set period.
pub struct BuildIo {
    pub(crate) phases: Vec<PhaseIo>,
}

impl BuildIo {
    pub fn period(&self) -> usize {
        self.phases.len()
    }

    pub fn phase(&self, s: usize) -> &PhaseIo {
        &self.phases[s]
    }

    pub fn phases(&self) -> impl Iterator<Item = &PhaseIo> {
        self.phases.iter()
    }
}

/// The resolved I/O of one process call.
///
/// Resources returned here are borrowed references into the graph's resource
/// table; they are valid only inside the call.
pub struct NodeIo<'a> {
    pub(crate) resources: &'a mut SlotMap<ResourceId, GraphResource>,
    pub(crate) inputs: Vec<(String, Option<ResourceId>)>,
    pub(crate) outputs: Vec<(String, ResourceId)>,
}

impl<'a> NodeIo<'a> {
    fn input_id(&self, name: &str) -> Option<ResourceId> {
        self.inputs
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, id)| *id)
    }

    fn output_id(&self, name: &str) -> Option<ResourceId> {
        self.outputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    /// Whether the (optional) input `name` is connected.
    pub fn is_connected(&self, name: &str) -> bool {
        self.input_id(name).is_some()
    }

    pub fn input_image(&self, name: &str) -> Option<ImageHandle> {
        let res = self.resources.get(self.input_id(name)?)?;
        Some(res.as_image()?.image.clone())
    }

    pub fn input_texture(&self, name: &str) -> Option<TextureHandle> {
        let res = self.resources.get(self.input_id(name)?)?;
        res.as_image()?.texture.clone()
    }

    pub fn output_image(&self, name: &str) -> Option<ImageHandle> {
        let res = self.resources.get(self.output_id(name)?)?;
        Some(res.as_image()?.image.clone())
    }

    pub fn input_buffer(&self, name: &str) -> Option<BufferHandle> {
        let res = self.resources.get(self.input_id(name)?)?;
        Some(res.as_buffer()?.buffer.clone())
    }

    pub fn output_buffer(&self, name: &str) -> Option<BufferHandle> {
        let res = self.resources.get(self.output_id(name)?)?;
        Some(res.as_buffer()?.buffer.clone())
    }

    /// The host payload read by input `name`. `None` when the input is
    /// unconnected or the payload was already released.
    pub fn input_host<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let res = self.resources.get(self.input_id(name)?)?;
        let payload = res.as_host()?.payload()?.clone();
        payload.downcast::<T>().ok()
    }

    /// Sets the payload of host output `name` for this iteration.
    pub fn set_output_host<T: Any + Send + Sync>(
        &mut self,
        name: &str,
        value: T,
    ) -> NodeResult<()> {
        let id = self
            .output_id(name)
            .ok_or_else(|| NodeError(format!("no output named '{name}'")))?;
        let res = self.resources[id]
            .as_host_mut()
            .ok_or_else(|| NodeError(format!("output '{name}' is not a host output")))?;
        if res.type_id != TypeId::of::<T>() {
            return Err(NodeError(format!(
                "output '{name}' carries {}, not {}",
                res.type_name(),
                std::any::type_name::<T>()
            )));
        }
        res.set_payload(Arc::new(value));
        Ok(())
    }

    pub fn input_texture_array(&self, name: &str) -> Option<&TextureArrayResource> {
        self.resources.get(self.input_id(name)?)?.as_texture_array()
    }

    /// Mutable access to the slot table of texture-array output `name`.
    pub fn output_texture_array_mut(&mut self, name: &str) -> Option<&mut TextureArrayResource> {
        let id = self.output_id(name)?;
        self.resources.get_mut(id)?.as_texture_array_mut()
    }

    pub(crate) fn view(resource: &GraphResource) -> ResourceView {
        match &resource.kind {
            ResourceKind::Image(r) => ResourceView::Image(r.image.clone()),
            ResourceKind::Buffer(r) => ResourceView::Buffer(r.buffer.clone()),
            ResourceKind::Host(_) => ResourceView::Host,
            ResourceKind::TextureArray(r) => ResourceView::TextureArray {
                array_size: r.len() as u32,
            },
        }
    }
}
