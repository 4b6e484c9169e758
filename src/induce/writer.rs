//! Workflow Writer
//!
//! Serializes the final segment sequence to the two output artifacts:
//! `workflow.json` (structured) and `workflow.txt` (human-readable). Pure
//! function of its input: rendering is deterministic, and segment order is
//! the temporal order of each segment's first action.

use super::action::{
    save_artifact, Action, Workflow, WORKFLOW_JSON_FILE_NAME, WORKFLOW_TEXT_FILE_NAME,
};
use crate::trace::TracePayload;
use std::path::{Path, PathBuf};
use tracing::info;

/// Renderer for the final workflow artifacts
#[derive(Debug, Default)]
pub struct WorkflowWriter;

impl WorkflowWriter {
    pub fn new() -> Self {
        Self
    }

    /// Write both artifacts into `data_dir`, returning their paths.
    pub fn write(&self, workflow: &Workflow, data_dir: &Path) -> crate::Result<(PathBuf, PathBuf)> {
        debug_assert!(
            workflow
                .segments
                .windows(2)
                .all(|pair| pair[0].started_at() <= pair[1].started_at()),
            "workflow segments must be in temporal order"
        );

        let json_path = data_dir.join(WORKFLOW_JSON_FILE_NAME);
        save_artifact(workflow, &json_path)?;

        let text_path = data_dir.join(WORKFLOW_TEXT_FILE_NAME);
        std::fs::write(&text_path, self.render_text(workflow))?;

        info!(
            segments = workflow.segments.len(),
            json = %json_path.display(),
            text = %text_path.display(),
            "workflow written"
        );
        Ok((json_path, text_path))
    }

    /// Render the human-readable artifact
    pub fn render_text(&self, workflow: &Workflow) -> String {
        let mut out = String::new();
        out.push_str(&format!("Workflow {}\n", workflow.id));
        out.push_str(&format!(
            "Generated {}\n",
            workflow.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out.push_str(&format!("Segments: {}\n\n", workflow.segments.len()));

        for (index, segment) in workflow.segments.iter().enumerate() {
            out.push_str(&format!(
                "{}. {} [{:.2}s – {:.2}s, {} actions]\n",
                index + 1,
                segment.label,
                segment.started_at().as_secs_f64(),
                segment.ended_at().as_secs_f64(),
                segment.actions.len(),
            ));
            for action in &segment.actions {
                out.push_str(&format!("   - {}\n", render_action(action)));
            }
            out.push('\n');
        }

        out
    }
}

fn render_action(action: &Action) -> String {
    let body = match &action.payload {
        TracePayload::Key { token, count } => {
            if *count > 1 {
                format!("key {token} x{count}")
            } else {
                format!("key {token}")
            }
        }
        TracePayload::Click {
            button,
            x,
            y,
            count,
        } => {
            let name = match button {
                crate::capture::types::MouseButton::Left => "left",
                crate::capture::types::MouseButton::Right => "right",
                crate::capture::types::MouseButton::Middle => "middle",
            };
            if *count > 1 {
                format!("click {name} @({x:.1}, {y:.1}) x{count}")
            } else {
                format!("click {name} @({x:.1}, {y:.1})")
            }
        }
        TracePayload::Scroll {
            dx, dy, events, ..
        } => format!("scroll (dx={dx:.1}, dy={dy:.1}, {events} events)"),
        TracePayload::Frame { path, sequence, .. } => {
            format!("frame #{sequence} -> {path}")
        }
    };

    match &action.app {
        Some(app) => format!("{body} [{app}]"),
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::MouseButton;
    use crate::induce::action::Segment;
    use crate::time::Timestamp;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn sample_workflow() -> Workflow {
        let typing = Segment::new(vec![Action {
            id: Uuid::new_v4(),
            started_at: Timestamp::from_millis(0),
            ended_at: Timestamp::from_millis(500),
            device: 0,
            app: Some("Notes".into()),
            payload: TracePayload::Key {
                token: "a".into(),
                count: 3,
            },
            sources: 3,
        }]);
        let clicking = Segment::new(vec![Action {
            id: Uuid::new_v4(),
            started_at: Timestamp::from_millis(4000),
            ended_at: Timestamp::from_millis(4000),
            device: 0,
            app: None,
            payload: TracePayload::Click {
                button: MouseButton::Left,
                x: 120.0,
                y: 48.0,
                count: 1,
            },
            sources: 1,
        }]);
        Workflow::new(vec![typing, clicking])
    }

    #[test]
    fn test_write_produces_both_artifacts() {
        let dir = TempDir::new().unwrap();
        let workflow = sample_workflow();

        let (json_path, text_path) = WorkflowWriter::new().write(&workflow, dir.path()).unwrap();
        assert!(json_path.exists());
        assert!(text_path.exists());

        // The structured artifact round-trips
        let loaded: Workflow =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(loaded.id, workflow.id);
        assert_eq!(loaded.segments.len(), 2);
    }

    #[test]
    fn test_render_is_deterministic() {
        let workflow = sample_workflow();
        let writer = WorkflowWriter::new();
        assert_eq!(writer.render_text(&workflow), writer.render_text(&workflow));
    }

    #[test]
    fn test_render_text_content() {
        let workflow = sample_workflow();
        let text = WorkflowWriter::new().render_text(&workflow);

        assert!(text.contains("Segments: 2"));
        assert!(text.contains("1. typing in Notes"));
        assert!(text.contains("key a x3 [Notes]"));
        assert!(text.contains("2. clicking"));
        assert!(text.contains("click left @(120.0, 48.0)"));
    }

    #[test]
    fn test_render_scroll_and_frame_actions() {
        let segment = Segment::new(vec![
            Action {
                id: Uuid::new_v4(),
                started_at: Timestamp::from_millis(0),
                ended_at: Timestamp::from_millis(100),
                device: 0,
                app: None,
                payload: TracePayload::Scroll {
                    dx: 0.0,
                    dy: -42.0,
                    distance: 42.0,
                    x: 0.0,
                    y: 0.0,
                    events: 17,
                    window_ms: 100,
                    flush: true,
                },
                sources: 1,
            },
            Action {
                id: Uuid::new_v4(),
                started_at: Timestamp::from_millis(200),
                ended_at: Timestamp::from_millis(200),
                device: 1,
                app: None,
                payload: TracePayload::Frame {
                    path: "screenshots/0.2_1_9.jpg".into(),
                    display: 1,
                    sequence: 9,
                    width: 640,
                    height: 480,
                },
                sources: 1,
            },
        ]);
        let workflow = Workflow::new(vec![segment]);
        let text = WorkflowWriter::new().render_text(&workflow);

        assert!(text.contains("scroll (dx=0.0, dy=-42.0, 17 events)"));
        assert!(text.contains("frame #9 -> screenshots/0.2_1_9.jpg"));
    }

    #[test]
    fn test_empty_workflow_renders() {
        let workflow = Workflow::new(Vec::new());
        let text = WorkflowWriter::new().render_text(&workflow);
        assert!(text.contains("Segments: 0"));
    }
}
