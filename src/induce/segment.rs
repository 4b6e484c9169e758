//! Segmenter (induction stage 2)
//!
//! Partitions the merged action sequence into ordered, non-overlapping
//! segments. A boundary opens wherever the feature distance between a
//! sliding window of recent actions and the next action crosses a fixed
//! threshold. Fully deterministic: same input and thresholds, same
//! boundaries.
//!
//! The distance is a weighted sum of three signals:
//!   - action-kind change against the window's dominant kind
//!   - application context change against the window's dominant app
//!   - temporal gap, normalized by `gap_scale` and capped at 1

use super::action::{kind_index, save_artifact, Action, Segment, SegmentSet, SEGMENTS_FILE_NAME};
use super::merge;
use crate::capture::types::EventKind;
use crate::time::Duration;
use std::path::Path;
use tracing::info;

/// Segmenter thresholds and feature weights
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Boundary opens when the feature distance exceeds this
    pub boundary_threshold: f64,
    /// Number of recent actions in the sliding window
    pub window: usize,
    /// Gap that saturates the temporal feature
    pub gap_scale: Duration,
    /// Weight of the kind-change feature
    pub kind_weight: f64,
    /// Weight of the context-change feature
    pub context_weight: f64,
    /// Weight of the temporal-gap feature
    pub gap_weight: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            boundary_threshold: 0.5,
            window: 4,
            gap_scale: Duration::from_millis(3000),
            kind_weight: 0.45,
            context_weight: 0.35,
            gap_weight: 0.20,
        }
    }
}

/// Boundary detector over a fixed temporal scan
#[derive(Debug, Default)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    /// Partition `actions` into segments. Every action lands in exactly one
    /// segment and order is preserved; no gaps, no overlaps.
    pub fn segment(&self, actions: &[Action]) -> Vec<Segment> {
        if actions.is_empty() {
            return Vec::new();
        }

        let mut segments = Vec::new();
        let mut current: Vec<Action> = vec![actions[0].clone()];

        for action in &actions[1..] {
            let window_start = current.len().saturating_sub(self.config.window);
            let window = &current[window_start..];

            if self.boundary_distance(window, action) > self.config.boundary_threshold {
                segments.push(Segment::new(std::mem::take(&mut current)));
            }
            current.push(action.clone());
        }

        segments.push(Segment::new(current));
        segments
    }

    /// Feature distance between the recent-action window and the next
    /// action. Deterministic and side-effect free.
    pub fn boundary_distance(&self, window: &[Action], next: &Action) -> f64 {
        if window.is_empty() {
            return 0.0;
        }

        let kind_change = if window_dominant_kind(window) != Some(next.kind()) {
            1.0
        } else {
            0.0
        };

        let context_change = match (window_dominant_app(window), next.app.as_deref()) {
            (Some(window_app), Some(next_app)) if window_app != next_app => 1.0,
            _ => 0.0,
        };

        let gap = window
            .last()
            .map(|last| last.gap_before(next))
            .unwrap_or(Duration::ZERO);
        let gap_feature =
            (gap.as_millis() as f64 / self.config.gap_scale.as_millis().max(1) as f64).min(1.0);

        self.config.kind_weight * kind_change
            + self.config.context_weight * context_change
            + self.config.gap_weight * gap_feature
    }
}

fn window_dominant_kind(window: &[Action]) -> Option<EventKind> {
    let mut counts = [0usize; 4];
    for action in window {
        counts[kind_index(action.kind())] += 1;
    }
    let best = counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))?;
    Some(match best.0 {
        0 => EventKind::Keyboard,
        1 => EventKind::Mouse,
        2 => EventKind::Scroll,
        _ => EventKind::Frame,
    })
}

fn window_dominant_app(window: &[Action]) -> Option<String> {
    let mut counts: std::collections::BTreeMap<&str, usize> = Default::default();
    for action in window {
        if let Some(app) = action.app.as_deref() {
            *counts.entry(app).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(app, _)| app.to_string())
}

/// Run the segment stage: load the merged actions, detect boundaries, and
/// write `segments.json`.
pub fn run(data_dir: &Path, config: SegmenterConfig) -> crate::Result<SegmentSet> {
    let merged = merge::load(data_dir, "segment")?;

    let segments = Segmenter::new(config).segment(&merged.actions);
    info!(
        actions = merged.actions.len(),
        segments = segments.len(),
        "segmentation complete"
    );

    let artifact = SegmentSet::new(segments);
    save_artifact(&artifact, &data_dir.join(SEGMENTS_FILE_NAME))?;
    Ok(artifact)
}

/// Load the segment stage's artifact (for the next stage)
pub fn load(data_dir: &Path, stage: &'static str) -> crate::Result<SegmentSet> {
    super::action::load_artifact(&data_dir.join(SEGMENTS_FILE_NAME), stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::MouseButton;
    use crate::time::Timestamp;
    use crate::trace::TracePayload;
    use uuid::Uuid;

    fn action(at_ms: u64, payload: TracePayload, app: Option<&str>) -> Action {
        Action {
            id: Uuid::new_v4(),
            started_at: Timestamp::from_millis(at_ms),
            ended_at: Timestamp::from_millis(at_ms),
            device: 0,
            app: app.map(|s| s.to_string()),
            payload,
            sources: 1,
        }
    }

    fn key(at_ms: u64, app: Option<&str>) -> Action {
        action(
            at_ms,
            TracePayload::Key {
                token: "a".into(),
                count: 1,
            },
            app,
        )
    }

    fn click(at_ms: u64, app: Option<&str>) -> Action {
        action(
            at_ms,
            TracePayload::Click {
                button: MouseButton::Left,
                x: 0.0,
                y: 0.0,
                count: 1,
            },
            app,
        )
    }

    #[test]
    fn test_empty_input_yields_no_segments() {
        assert!(Segmenter::default().segment(&[]).is_empty());
    }

    #[test]
    fn test_uniform_burst_stays_one_segment() {
        let actions: Vec<Action> = (0..10).map(|i| key(i * 100, Some("Notes"))).collect();
        let segments = Segmenter::default().segment(&actions);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].actions.len(), 10);
    }

    #[test]
    fn test_long_gap_opens_boundary() {
        // Same kind and app, but a gap past the saturation point:
        // 0.45 (no kind change) * 0 + 0.35 * 0 + 0.20 * 1 = 0.20 < 0.5,
        // so a pure gap is not enough on its own...
        let mut actions: Vec<Action> = (0..4).map(|i| key(i * 100, None)).collect();
        actions.push(key(60_000, None));
        let segments = Segmenter::default().segment(&actions);
        assert_eq!(segments.len(), 1, "gap alone stays under the threshold");

        // ...but a kind change plus a modest pause crosses it:
        // 0.45 + 0.20 * (1000/3000) ≈ 0.52 > 0.5
        let mut actions: Vec<Action> = (0..4).map(|i| key(i * 100, None)).collect();
        actions.push(click(1300, None));
        let segments = Segmenter::default().segment(&actions);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_app_switch_opens_boundary() {
        // Context change alone: 0.35 < 0.5. Context + kind change: 0.8 > 0.5.
        let actions = vec![
            key(0, Some("Notes")),
            key(100, Some("Notes")),
            click(200, Some("Safari")),
        ];
        let segments = Segmenter::default().segment(&actions);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].actions.len(), 2);
        assert_eq!(segments[1].actions.len(), 1);
    }

    #[test]
    fn test_segments_partition_without_gaps_or_overlaps() {
        let mut actions = Vec::new();
        for i in 0..6 {
            actions.push(key(i * 200, Some("Notes")));
        }
        for i in 0..6 {
            actions.push(click(5000 + i * 200, Some("Safari")));
        }
        for i in 0..6 {
            actions.push(key(15_000 + i * 200, Some("Terminal")));
        }

        let segments = Segmenter::default().segment(&actions);
        assert!(segments.len() >= 2);

        // Partition: every action appears exactly once, in order
        let flattened: Vec<&Action> = segments.iter().flat_map(|s| s.actions.iter()).collect();
        assert_eq!(flattened.len(), actions.len());
        for (original, flat) in actions.iter().zip(flattened) {
            assert_eq!(original.id, flat.id);
        }

        // Non-overlapping: each segment ends before the next begins
        for pair in segments.windows(2) {
            assert!(pair[0].ended_at() <= pair[1].started_at());
        }

        // Non-empty
        assert!(segments.iter().all(|s| !s.actions.is_empty()));
    }

    #[test]
    fn test_segmentation_is_deterministic() {
        let mut actions = Vec::new();
        for i in 0..20 {
            let app = if i % 7 < 4 { "Notes" } else { "Safari" };
            if i % 3 == 0 {
                actions.push(click(i * 400, Some(app)));
            } else {
                actions.push(key(i * 400, Some(app)));
            }
        }

        let segmenter = Segmenter::default();
        let first = segmenter.segment(&actions);
        let second = segmenter.segment(&actions);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            let ids_a: Vec<_> = a.actions.iter().map(|x| x.id).collect();
            let ids_b: Vec<_> = b.actions.iter().map(|x| x.id).collect();
            assert_eq!(ids_a, ids_b, "identical boundaries on every run");
        }
    }

    #[test]
    fn test_boundary_distance_empty_window() {
        let segmenter = Segmenter::default();
        assert_eq!(segmenter.boundary_distance(&[], &key(0, None)), 0.0);
    }

    #[test]
    fn test_boundary_distance_saturates_gap() {
        let segmenter = Segmenter::default();
        let window = vec![key(0, None)];
        let far = key(1_000_000, None);
        let d = segmenter.boundary_distance(&window, &far);
        // Same kind, unknown context: only the (saturated) gap contributes
        assert!((d - 0.20).abs() < 1e-9);
    }

    #[test]
    fn test_run_stage_requires_merge_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        match run(dir.path(), SegmenterConfig::default()) {
            Err(crate::Error::Stage { stage, .. }) => assert_eq!(stage, "segment"),
            other => panic!("expected stage error, got {other:?}"),
        }
    }

    #[test]
    fn test_run_stage_writes_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let merged = super::super::action::MergedTrace::new(
            2,
            vec![key(0, Some("Notes")), key(100, Some("Notes"))],
        );
        save_artifact(&merged, &dir.path().join(super::super::action::MERGED_FILE_NAME)).unwrap();

        let artifact = run(dir.path(), SegmenterConfig::default()).unwrap();
        assert_eq!(artifact.segments.len(), 1);

        let loaded = load(dir.path(), "induce").unwrap();
        assert_eq!(loaded.segments.len(), 1);
    }
}
