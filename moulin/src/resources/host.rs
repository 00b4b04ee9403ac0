//! Host-side payloads shared between nodes.

use std::any::{Any, TypeId};
use std::sync::Arc;

pub type HostPayload = Arc<dyn Any + Send + Sync>;

/// A host-pointer resource. The producing node sets the payload during its
/// process call; each consumer's post-process increments the processed
/// counter, and when it reaches the expected count the payload is dropped so
/// large host allocations do not linger past their last reader.
#[derive(Debug)]
pub struct HostResource {
    pub(crate) payload: Option<HostPayload>,
    /// `None` for persistent outputs: the payload is never auto-released.
    pub(crate) expected_consumers: Option<u32>,
    pub(crate) processed_consumers: u32,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
}

impl HostResource {
    pub(crate) fn new(
        expected_consumers: Option<u32>,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Self {
        HostResource {
            payload: None,
            expected_consumers,
            processed_consumers: 0,
            type_id,
            type_name,
        }
    }

    pub fn payload(&self) -> Option<&HostPayload> {
        self.payload.as_ref()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn set_payload(&mut self, payload: HostPayload) {
        self.payload = Some(payload);
    }

    /// Marks one consumer as done; drops the payload when all have read it.
    pub(crate) fn consume(&mut self) {
        self.processed_consumers += 1;
        if let Some(expected) = self.expected_consumers {
            if self.processed_consumers >= expected {
                self.payload = None;
            }
        }
    }
}
