//! # Traceloom
//!
//! Records a user's device interaction (screen frames, keyboard, mouse,
//! scroll) into an append-only trace, then distills the trace into a
//! structured workflow description through three offline batch stages.
//!
//! ## Overview
//!
//! The capture side runs continuously and memory-bounded: platform
//! backends deliver raw events into bounded lock-free channels, a scroll
//! filter folds high-rate scroll ticks into aggregated records, and an
//! adaptive frame scheduler feeds a fixed worker pool that encodes and
//! writes screen frames. Everything lands in the trace store.
//!
//! The induction side runs later, offline and sequential: trajectory
//! merging deduplicates the trace, segmentation finds state-transition
//! boundaries, and semantic merging folds adjacent segments that share
//! intent, ending in `workflow.json` and `workflow.txt`.
//!
//! ## Architecture
//!
//! - [`time`]: monotonic timebase shared by every sensor thread
//! - [`capture`]: backends, channels, scroll filter, frame scheduler,
//!   encode pool, and session orchestration
//! - [`trace`]: append-only trace record persistence
//! - [`induce`]: the three-stage offline induction pipeline
//! - [`app`]: CLI and configuration management
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────────────┐   ┌─────────────┐
//! │ Backends │──▶│ Channels │──▶│ Scroll Filter │──▶│ Trace Store │
//! └──────────┘   └─────────┘   └───────────────┘   └─────────────┘
//!                                                        ▲
//! ┌───────────┐   ┌──────────────┐   ┌─────────────┐     │
//! │ Scheduler │──▶│ Bounded Queue │──▶│ Encode Pool │─────┘
//! └───────────┘   └──────────────┘   └─────────────┘
//!
//! trace.jsonl → merge → segment → induce → workflow.json / workflow.txt
//! ```

pub mod app;
pub mod capture;
pub mod induce;
pub mod time;
pub mod trace;

// Re-export commonly used types
pub use capture::session::{CaptureSession, SessionOptions, SessionSummary};
pub use capture::types::{EventKind, EventPayload, RawEvent};
pub use induce::{Segment, Workflow};
pub use time::{Timebase, Timestamp};
pub use trace::{TraceRecord, TraceStore};

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for capture and induction
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A backend could not be constructed or started (non-fatal: triggers
    /// fallback or disables the capability)
    #[error("event backend error: {0}")]
    Backend(String),

    /// A per-frame or per-component capture failure (non-fatal: skipped)
    #[error("capture error: {0}")]
    Capture(String),

    /// Trace persistence failure (retried with bounded backoff, then
    /// dropped and reported)
    #[error("trace persistence error: {0}")]
    Persistence(String),

    /// An induction stage failed; prior-stage artifacts remain intact
    #[error("{stage} stage failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
