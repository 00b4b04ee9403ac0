//! Error types for graph editing, building and execution.
//!
//! Driver-side failures (`GraphError`) abort the operation that raised them;
//! node-side failures (`NodeError`) are captured into the node's error list
//! and disable the node, while the rest of the graph keeps running.

use thiserror::Error;

/// Errors raised by the resource allocators.
#[derive(Debug, Clone, Error)]
pub enum AllocationError {
    #[error("out of device memory: {0}")]
    OutOfMemory(String),
    #[error("unsupported resource: {0}")]
    Unsupported(String),
}

/// Errors raised by the graph driver.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// Connector variants at both ends of an edge are incompatible, or an
    /// edge references a connector that does not exist.
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    /// A connector rejected its configuration, e.g. two sinks requesting
    /// different layouts for the same resource copy.
    #[error("connector error: {0}")]
    Connector(String),

    /// A non-optional input was left unconnected at build time.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// The delay-0 subgraph contains a cycle.
    #[error("graph is not acyclic: {0}")]
    NotAcyclic(String),

    /// The underlying allocator rejected an allocation; the build aborts.
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// A node hook failed. Recorded on the node; the node is disabled.
    #[error("node '{node}' failed: {message}")]
    Node { node: String, message: String },

    #[error("graph already contains a node with identifier '{0}'")]
    DuplicateIdentifier(String),
    #[error("the identifier '{0}' is reserved")]
    ReservedIdentifier(String),
    #[error("node identifier cannot be empty")]
    EmptyIdentifier,
    #[error("graph does not contain a node '{0}'")]
    UnknownNode(String),
    #[error("no node type '{0}' is registered")]
    UnknownType(String),

    /// Waiting for a ring slot's prior iteration exceeded the configured
    /// acquire timeout. The iteration was not consumed.
    #[error("timed out waiting for an in-flight iteration to complete")]
    RingWaitTimeout,

    /// The queue rejected the submission.
    #[error("queue submission failed: {0}")]
    Submit(String),
}

impl GraphError {
    /// Process exit code for command-line tools built on the driver:
    /// 2 for an invalid graph, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            GraphError::InvalidConnection(_)
            | GraphError::Connector(_)
            | GraphError::MissingInput(_)
            | GraphError::NotAcyclic(_) => 2,
            _ => 1,
        }
    }
}

/// Error returned from node hooks (`describe_outputs`, `on_build`, `process`).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct NodeError(pub String);

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        NodeError(message.into())
    }
}

impl From<&str> for NodeError {
    fn from(message: &str) -> Self {
        NodeError(message.to_string())
    }
}

impl From<String> for NodeError {
    fn from(message: String) -> Self {
        NodeError(message)
    }
}

impl From<AllocationError> for NodeError {
    fn from(err: AllocationError) -> Self {
        NodeError(err.to_string())
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
