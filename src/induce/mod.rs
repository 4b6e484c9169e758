//! Offline workflow induction pipeline.
//!
//! Three composable batch stages over a shared data directory, each
//! reading the previous stage's persisted artifact and writing its own:
//!
//! ```text
//! trace.jsonl → [merge] → actions_merged.json → [segment] → segments.json
//!             → [induce] → workflow.json + workflow.txt
//! ```
//!
//! Stages are sequential and single-threaded; a failed stage leaves the
//! prior artifacts intact, so a retry resumes where the pipeline stopped.

pub mod action;
pub mod merge;
pub mod segment;
pub mod semantic;
pub mod writer;

pub use action::{Action, MergedTrace, Segment, SegmentSet, Workflow};
pub use merge::{MergeConfig, TrajectoryMerger};
pub use segment::{Segmenter, SegmenterConfig};
pub use semantic::{MergeOutcome, SemanticMergeConfig, SemanticMerger};
pub use writer::WorkflowWriter;
