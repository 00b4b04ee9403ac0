//! In-flight iteration pacing and CPU-side synchronization helpers.

pub mod dispatcher;
pub mod ring;

pub use dispatcher::SyncDispatcher;
pub use ring::{InFlightData, RingSlot};
