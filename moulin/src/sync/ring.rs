//! Ring of in-flight iteration slots.
//!
//! Iteration `i` runs in slot `i % K`. Each slot owns a command pool, the
//! timeline value its last submission signals on completion, a per-node
//! user-data table, and an optional profiler instance. Before a slot is
//! reused, its prior iteration must have signalled completion.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::device::{CommandPool, Device};
use crate::profiler::ProfilerHandle;

/// Per-node user data kept alive for the duration of a slot's iteration
/// (per-iteration staging buffers, query pools and the like).
#[derive(Default)]
pub struct InFlightData {
    entries: HashMap<String, Box<dyn Any + Send>>,
}

impl InFlightData {
    /// Returns the entry for `key`, inserting it first if absent.
    pub fn get_or_insert_with<T: Any + Send>(
        &mut self,
        key: &str,
        init: impl FnOnce() -> T,
    ) -> &mut T {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Box::new(init()))
            .downcast_mut()
            .expect("in-flight entry was previously inserted with a different type")
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

pub struct RingSlot {
    pub(crate) command_pool: Box<dyn CommandPool>,
    /// Timeline value signalled when this slot's last submission completes;
    /// 0 while the slot has never been submitted.
    pub(crate) submitted_value: u64,
    pub(crate) user_data: Arc<Mutex<InFlightData>>,
    pub(crate) profiler: Option<ProfilerHandle>,
    /// CPU time spent sleeping in the iteration-rate limiter.
    pub(crate) cpu_sleep_time: Duration,
}

impl RingSlot {
    pub(crate) fn new(device: &dyn Device) -> Self {
        RingSlot {
            command_pool: device.create_command_pool(),
            submitted_value: 0,
            user_data: Arc::new(Mutex::new(InFlightData::default())),
            profiler: None,
            cpu_sleep_time: Duration::ZERO,
        }
    }
}
