//! CPU-side profiling of graph runs.
//!
//! One profiler instance is attached per ring slot so a report is only
//! collected once the slot's iteration has fully completed; collection never
//! races an in-flight run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEntry {
    pub label: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileReport {
    pub entries: Vec<ProfileEntry>,
}

#[derive(Debug, Default)]
pub struct Profiler {
    entries: Mutex<Vec<ProfileEntry>>,
}

pub type ProfilerHandle = Arc<Profiler>;

impl Profiler {
    pub fn new() -> ProfilerHandle {
        Arc::new(Profiler::default())
    }

    /// Starts a labeled span; the measurement is recorded when the returned
    /// guard drops.
    pub fn scope(self: &Arc<Self>, label: impl Into<String>) -> ProfileScope {
        ProfileScope {
            profiler: self.clone(),
            label: label.into(),
            start: Instant::now(),
        }
    }

    pub fn record(&self, label: impl Into<String>, duration: Duration) {
        self.entries.lock().push(ProfileEntry {
            label: label.into(),
            duration,
        });
    }

    /// Takes the collected entries, leaving the profiler empty for the next
    /// iteration of its ring slot.
    pub fn take_report(&self) -> ProfileReport {
        ProfileReport {
            entries: std::mem::take(&mut *self.entries.lock()),
        }
    }
}

pub struct ProfileScope {
    profiler: ProfilerHandle,
    label: String,
    start: Instant,
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        self.profiler
            .record(std::mem::take(&mut self.label), self.start.elapsed());
    }
}
