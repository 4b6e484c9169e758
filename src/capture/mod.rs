//! Event and frame capture pipeline.
//!
//! Backends produce raw events into bounded lock-free channels; the trace
//! collector filters and persists them. Screen frames flow from the
//! adaptive scheduler through a bounded worker pool to disk. Every queue in
//! the pipeline is bounded with drop-on-full semantics.

pub mod backend;
pub mod channel;
pub mod frames;
pub mod pool;
#[cfg(target_os = "macos")]
pub mod quartz;
pub mod scroll;
pub mod session;
pub mod synthetic;
pub mod types;

pub use backend::{BackendChain, Capability, EventBackend, NullBackend};
pub use channel::{EventChannel, EventSink, EventStream};
pub use frames::{FrameBudget, FrameScheduler, SchedulerConfig};
pub use pool::{EncodePool, EncodePoolConfig};
pub use scroll::{ScrollFilter, ScrollFilterConfig};
pub use session::{CaptureSession, SessionOptions, SessionSummary};
pub use types::{EventKind, EventPayload, MouseButton, RawEvent};
