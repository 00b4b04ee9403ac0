//! Input connector for host-side payloads.

use std::any::TypeId;

use crate::resources::HostResource;

/// Receives a host payload produced by a [`HostOut`](super::HostOut) of the
/// same type. Contributes no barriers and no descriptor; its post-process
/// participates in the payload's consumer counting.
#[derive(Debug)]
pub struct HostIn {
    pub(crate) name: String,
    pub(crate) delay: u32,
    pub(crate) optional: bool,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
}

impl HostIn {
    pub fn new<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        HostIn {
            name: name.into(),
            delay: 0,
            optional: false,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Reads the payload of `delay` iterations ago. Only valid towards
    /// persistent host outputs; transient payloads are released within the
    /// iteration that produced them.
    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub(crate) fn post_process(&self, res: &mut HostResource) {
        res.consume();
    }
}
