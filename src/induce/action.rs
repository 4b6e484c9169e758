//! Induction Data Model
//!
//! Actions, segments, and workflows, plus the persisted stage artifacts the
//! offline pipeline communicates through. Each stage reads the previous
//! stage's artifact and writes its own, so a failed run resumes from the
//! last successfully written file.

use crate::capture::types::{DeviceId, EventKind};
use crate::time::{Duration, Timestamp};
use crate::trace::{TracePayload, TraceRecord};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Artifact format version
pub const ARTIFACT_FORMAT_VERSION: &str = "1.0";

/// Stage artifact file names inside the data directory
pub const MERGED_FILE_NAME: &str = "actions_merged.json";
pub const SEGMENTS_FILE_NAME: &str = "segments.json";
pub const WORKFLOW_JSON_FILE_NAME: &str = "workflow.json";
pub const WORKFLOW_TEXT_FILE_NAME: &str = "workflow.txt";

/// A normalized, deduplicated unit of user activity.
///
/// Created only by the trajectory merger (one action per trace record at
/// first, then folded); immutable afterwards. The time range is always a
/// subset of the union of the source records' timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique id
    pub id: Uuid,
    /// Start of the covered time range
    pub started_at: Timestamp,
    /// End of the covered time range
    pub ended_at: Timestamp,
    /// Device or display the source records came from
    pub device: DeviceId,
    /// Application context, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Normalized payload (counts accumulate as records fold in)
    pub payload: TracePayload,
    /// Number of trace records folded into this action
    pub sources: u32,
}

impl Action {
    /// Lift a trace record into a single-source action
    pub fn from_record(record: TraceRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: record.started_at(),
            ended_at: record.timestamp,
            device: record.device,
            app: record.app,
            payload: record.payload,
            sources: 1,
        }
    }

    /// The action kind
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Gap between the end of this action and the start of `next`
    pub fn gap_before(&self, next: &Action) -> Duration {
        next.started_at.duration_since(self.ended_at)
    }
}

/// Index of an event kind into a fixed histogram
pub fn kind_index(kind: EventKind) -> usize {
    match kind {
        EventKind::Keyboard => 0,
        EventKind::Mouse => 1,
        EventKind::Scroll => 2,
        EventKind::Frame => 3,
    }
}

/// An ordered, non-empty run of actions bounded by two transition points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Unique id
    pub id: Uuid,
    /// Derived semantic label
    pub label: String,
    /// Actions in temporal order
    pub actions: Vec<Action>,
}

impl Segment {
    /// Create a segment from a non-empty action run, deriving its label
    pub fn new(actions: Vec<Action>) -> Self {
        debug_assert!(!actions.is_empty(), "segments are never empty");
        let label = derive_label(&actions);
        Self {
            id: Uuid::new_v4(),
            label,
            actions,
        }
    }

    /// Start of the segment (first action)
    pub fn started_at(&self) -> Timestamp {
        self.actions.first().map(|a| a.started_at).unwrap_or_default()
    }

    /// End of the segment (last action)
    pub fn ended_at(&self) -> Timestamp {
        self.actions.last().map(|a| a.ended_at).unwrap_or_default()
    }

    /// Normalized histogram of action kinds
    pub fn kind_histogram(&self) -> [f64; 4] {
        let mut histogram = [0.0f64; 4];
        for action in &self.actions {
            histogram[kind_index(action.kind())] += 1.0;
        }
        let total: f64 = histogram.iter().sum();
        if total > 0.0 {
            for bucket in &mut histogram {
                *bucket /= total;
            }
        }
        histogram
    }

    /// Most frequent action kind (ties resolve to the lower kind index, so
    /// the result is deterministic)
    pub fn dominant_kind(&self) -> Option<EventKind> {
        let mut counts = [0usize; 4];
        for action in &self.actions {
            counts[kind_index(action.kind())] += 1;
        }
        let (best, &count) = counts
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))?;
        if count == 0 {
            return None;
        }
        Some(match best {
            0 => EventKind::Keyboard,
            1 => EventKind::Mouse,
            2 => EventKind::Scroll,
            _ => EventKind::Frame,
        })
    }

    /// Most frequent known application context, if any
    pub fn dominant_app(&self) -> Option<String> {
        let mut counts: std::collections::BTreeMap<&str, usize> = Default::default();
        for action in &self.actions {
            if let Some(app) = action.app.as_deref() {
                *counts.entry(app).or_default() += 1;
            }
        }
        // BTreeMap iteration keeps ties deterministic
        counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
            .map(|(app, _)| app.to_string())
    }

    /// Absorb a later segment: concatenate actions preserving order and
    /// re-derive the label
    pub fn absorb(&mut self, later: Segment) {
        self.actions.extend(later.actions);
        self.label = derive_label(&self.actions);
    }
}

/// Derive a human-readable label from an action run
fn derive_label(actions: &[Action]) -> String {
    let mut counts = [0usize; 4];
    let mut apps: std::collections::BTreeMap<&str, usize> = Default::default();
    for action in actions {
        counts[kind_index(action.kind())] += 1;
        if let Some(app) = action.app.as_deref() {
            *apps.entry(app).or_default() += 1;
        }
    }

    let verb = match counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(i, _)| i)
    {
        Some(0) => "typing",
        Some(1) => "clicking",
        Some(2) => "scrolling",
        _ => "viewing",
    };

    match apps
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(app, _)| app)
    {
        Some(app) => format!("{verb} in {app}"),
        None => verb.to_string(),
    }
}

/// The final ordered sequence of (possibly merged) segments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Artifact format version
    pub format_version: String,
    /// Unique workflow id
    pub id: Uuid,
    /// Wall-clock generation time
    pub generated_at: DateTime<Utc>,
    /// Segments in temporal order
    pub segments: Vec<Segment>,
}

impl Workflow {
    /// Build a workflow from ordered segments
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION.to_string(),
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            segments,
        }
    }
}

/// Stage 1 artifact: the merged action sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedTrace {
    pub format_version: String,
    pub generated_at: DateTime<Utc>,
    /// Trace records the merge started from
    pub source_records: usize,
    /// Merged actions in temporal order
    pub actions: Vec<Action>,
}

impl MergedTrace {
    pub fn new(source_records: usize, actions: Vec<Action>) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION.to_string(),
            generated_at: Utc::now(),
            source_records,
            actions,
        }
    }
}

/// Stage 2 artifact: the detected segments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSet {
    pub format_version: String,
    pub generated_at: DateTime<Utc>,
    /// Segments in temporal order
    pub segments: Vec<Segment>,
}

impl SegmentSet {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION.to_string(),
            generated_at: Utc::now(),
            segments,
        }
    }
}

/// Save a stage artifact atomically: write to a temp file, then rename.
/// A crash mid-write leaves the previous artifact intact.
pub fn save_artifact<T: Serialize>(value: &T, path: &Path) -> crate::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a stage artifact, mapping a missing or unreadable file into a
/// stage error naming the stage that needs it.
pub fn load_artifact<T: DeserializeOwned>(path: &Path, stage: &'static str) -> crate::Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| crate::Error::Stage {
        stage,
        message: format!("cannot read {}: {e}", path.display()),
    })?;
    serde_json::from_str(&content).map_err(|e| crate::Error::Stage {
        stage,
        message: format!("cannot parse {}: {e}", path.display()),
    })
}
