//! Trajectory Merger (induction stage 1)
//!
//! Deduplicates the raw trace: one sequential scan folding adjacent
//! records of the same kind whose time gap is below the adjacency
//! threshold and whose payloads are equivalent under a kind-specific
//! relation. Idempotent: merging a merged sequence changes nothing.

use super::action::{load_artifact, save_artifact, Action, MergedTrace, MERGED_FILE_NAME};
use crate::time::Duration;
use crate::trace::{read_trace, TracePayload, TRACE_FILE_NAME};
use std::path::Path;
use tracing::info;

/// Merger thresholds
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Maximum gap between adjacent records for them to merge
    pub adjacency_threshold: Duration,
    /// Maximum cursor distance for two clicks to count as the same target
    pub click_radius_px: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            adjacency_threshold: Duration::from_millis(500),
            click_radius_px: 8.0,
        }
    }
}

/// Sequential-scan deduplicator
#[derive(Debug, Default)]
pub struct TrajectoryMerger {
    config: MergeConfig,
}

impl TrajectoryMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Merge an ordered action sequence.
    ///
    /// Scans left to right; each incoming action either folds into the
    /// last output action or starts a new one. Once an action stops being
    /// the last output it is final, which is what makes the pass
    /// idempotent.
    pub fn merge(&self, actions: Vec<Action>) -> Vec<Action> {
        let mut merged: Vec<Action> = Vec::with_capacity(actions.len());

        for action in actions {
            if let Some(last) = merged.last_mut() {
                if self.can_merge(last, &action) {
                    fold(last, action);
                    continue;
                }
            }
            merged.push(action);
        }

        merged
    }

    fn can_merge(&self, earlier: &Action, later: &Action) -> bool {
        earlier.kind() == later.kind()
            && earlier.device == later.device
            && earlier.gap_before(later) < self.config.adjacency_threshold
            && self.payloads_equivalent(&earlier.payload, &later.payload)
    }

    /// Kind-specific payload equivalence
    fn payloads_equivalent(&self, a: &TracePayload, b: &TracePayload) -> bool {
        match (a, b) {
            // Repeated identical key within the window
            (TracePayload::Key { token: ta, .. }, TracePayload::Key { token: tb, .. }) => ta == tb,
            // Same button on the same target
            (
                TracePayload::Click {
                    button: ba,
                    x: xa,
                    y: ya,
                    ..
                },
                TracePayload::Click {
                    button: bb,
                    x: xb,
                    y: yb,
                    ..
                },
            ) => {
                let dx = xa - xb;
                let dy = ya - yb;
                ba == bb && (dx * dx + dy * dy).sqrt() <= self.config.click_radius_px
            }
            // Continued scrolling in the same dominant direction
            (TracePayload::Scroll { .. }, TracePayload::Scroll { .. }) => {
                scroll_direction(a) == scroll_direction(b)
            }
            // Frame references never merge
            (TracePayload::Frame { .. }, TracePayload::Frame { .. }) => false,
            _ => false,
        }
    }
}

/// Dominant scroll axis and sign: (axis, sign) where axis 0 = horizontal,
/// 1 = vertical. Used as the equivalence class for scroll merging.
fn scroll_direction(payload: &TracePayload) -> (u8, i8) {
    match payload {
        TracePayload::Scroll { dx, dy, .. } => {
            if dy.abs() >= dx.abs() {
                (1, signum(*dy))
            } else {
                (0, signum(*dx))
            }
        }
        _ => (0, 0),
    }
}

fn signum(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

/// Fold `later` into `earlier`, widening the time range and accumulating
/// the payload counts.
fn fold(earlier: &mut Action, later: Action) {
    earlier.ended_at = earlier.ended_at.max(later.ended_at);
    earlier.sources += later.sources;
    if earlier.app.is_none() {
        earlier.app = later.app;
    }

    match (&mut earlier.payload, later.payload) {
        (TracePayload::Key { count, .. }, TracePayload::Key { count: added, .. }) => {
            *count += added;
        }
        (TracePayload::Click { count, .. }, TracePayload::Click { count: added, .. }) => {
            *count += added;
        }
        (
            TracePayload::Scroll {
                dx,
                dy,
                distance,
                x,
                y,
                events,
                window_ms,
                flush,
            },
            TracePayload::Scroll {
                dx: bdx,
                dy: bdy,
                distance: bdistance,
                x: bx,
                y: by,
                events: bevents,
                flush: bflush,
                ..
            },
        ) => {
            *dx += bdx;
            *dy += bdy;
            *distance += bdistance;
            *x = bx;
            *y = by;
            *events += bevents;
            *window_ms = earlier
                .ended_at
                .duration_since(earlier.started_at)
                .as_millis();
            *flush = bflush;
        }
        _ => {}
    }
}

/// Run the merge stage over a data directory: read the trace log, lift
/// records into actions, merge, and write `actions_merged.json`.
pub fn run(data_dir: &Path, config: MergeConfig) -> crate::Result<MergedTrace> {
    let trace_path = data_dir.join(TRACE_FILE_NAME);
    let records = read_trace(&trace_path).map_err(|e| crate::Error::Stage {
        stage: "merge",
        message: format!("cannot read {}: {e}", trace_path.display()),
    })?;
    let source_records = records.len();

    let actions: Vec<Action> = records.into_iter().map(Action::from_record).collect();
    let merged = TrajectoryMerger::new(config).merge(actions);

    info!(
        records = source_records,
        actions = merged.len(),
        "trajectory merge complete"
    );

    let artifact = MergedTrace::new(source_records, merged);
    save_artifact(&artifact, &data_dir.join(MERGED_FILE_NAME))?;
    Ok(artifact)
}

/// Load the merge stage's artifact (for the next stage)
pub fn load(data_dir: &Path, stage: &'static str) -> crate::Result<MergedTrace> {
    load_artifact(&data_dir.join(MERGED_FILE_NAME), stage)
}
