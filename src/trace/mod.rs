//! Trace persistence.
//!
//! Everything the capture pipeline emits ends up here: an append-only,
//! crash-tolerant log of trace records under the session data directory.

pub mod record;
pub mod store;

pub use record::{TracePayload, TraceRecord};
pub use store::{read_trace, TraceSink, TraceStore, TraceStoreConfig, TRACE_FILE_NAME};
