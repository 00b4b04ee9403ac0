//! The processing graph: nodes, topology, allocation and execution.

mod edit;
#[allow(clippy::module_inception)]
mod graph;
mod node;
mod properties;
mod registry;
mod run;

pub use graph::{Graph, GraphLayout, NodeId, NodeLayout, OutputLayout};
pub use node::{
    BuildIo, ConnectedIo, Node, NodeIo, NodeStatistics, NodeStatus, PhaseIo, ResourceView,
};
pub use properties::ConnectionDesc;
pub use registry::NodeRegistry;
pub use run::GraphRun;
