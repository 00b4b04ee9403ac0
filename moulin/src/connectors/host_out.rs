//! Output connector for host-side payloads.

use std::any::TypeId;

use crate::connectors::{ConnectorStatus, InputConnector};
use crate::error::GraphError;
use crate::resources::{HostResource, ResourceKind};

/// Produces a host payload (an `Arc`ed value) for consumption by
/// [`HostIn`](super::HostIn) connectors.
///
/// The node must set the payload during every process call; post-process
/// fails otherwise. For transient outputs the payload is released as soon as
/// every same-iteration consumer has read it.
#[derive(Debug)]
pub struct HostOut {
    pub(crate) name: String,
    pub(crate) persistent: bool,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
}

impl HostOut {
    pub fn new<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        HostOut {
            name: name.into(),
            persistent: false,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// The payload survives until overwritten; consumers never release it.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub(crate) fn create_resource(
        &self,
        consumers: &[(&str, &InputConnector)],
    ) -> Result<ResourceKind, GraphError> {
        let expected = if self.persistent {
            None
        } else {
            Some(consumers.iter().filter(|(_, i)| i.delay() == 0).count() as u32)
        };
        Ok(ResourceKind::Host(HostResource::new(
            expected,
            self.type_id,
            self.type_name,
        )))
    }

    pub(crate) fn post_process(
        &self,
        res: &mut HostResource,
        node: &str,
    ) -> Result<ConnectorStatus, GraphError> {
        if res.payload.is_none() {
            return Err(GraphError::Connector(format!(
                "node '{}' did not set the payload for output '{}'",
                node, self.name
            )));
        }
        res.processed_consumers = 0;
        if res.expected_consumers == Some(0) {
            // Nothing reads it this iteration.
            res.payload = None;
        }
        Ok(ConnectorStatus::empty())
    }
}
