//! High-precision monotonic timing.
//!
//! All capture timestamps come from a single process-wide anchor so that
//! events from different sensor threads are comparable.

pub mod timebase;

pub use timebase::{Duration, Timebase, Timestamp};
