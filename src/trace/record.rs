//! Trace Record Model
//!
//! The persisted form of everything the capture pipeline emits: raw
//! keyboard and mouse presses, aggregated scroll emissions, and written
//! frame references. One record per line in the session trace log.

use crate::capture::scroll::AggregatedScroll;
use crate::capture::types::{DeviceId, DisplayId, EventKind, EventPayload, MouseButton, RawEvent};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Payload of a persisted trace record, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TracePayload {
    /// A key press. `count` is 1 at capture time; the trajectory merger
    /// folds repeats into it.
    Key { token: String, count: u32 },
    /// A mouse button press. `count` is 1 at capture time.
    Click {
        button: MouseButton,
        x: f64,
        y: f64,
        count: u32,
    },
    /// An aggregated scroll emission covering `window_ms` of accumulation
    Scroll {
        dx: f64,
        dy: f64,
        distance: f64,
        x: f64,
        y: f64,
        events: u32,
        window_ms: u64,
        flush: bool,
    },
    /// A screen frame written to disk by the worker pool
    Frame {
        path: String,
        display: DisplayId,
        sequence: u64,
        width: u32,
        height: u32,
    },
}

impl TracePayload {
    /// The event kind of this payload
    pub fn kind(&self) -> EventKind {
        match self {
            TracePayload::Key { .. } => EventKind::Keyboard,
            TracePayload::Click { .. } => EventKind::Mouse,
            TracePayload::Scroll { .. } => EventKind::Scroll,
            TracePayload::Frame { .. } => EventKind::Frame,
        }
    }
}

/// One persisted trace record: timestamp, device, payload, and the
/// application context when the backend resolved one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Monotonic timestamp (for scroll emissions: end of the window)
    pub timestamp: Timestamp,
    /// Device or display that produced the record
    pub device: DeviceId,
    /// Frontmost application context, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Record payload
    pub payload: TracePayload,
}

impl TraceRecord {
    /// Convert a raw keyboard or mouse event into its persisted form.
    ///
    /// Scroll events never pass through directly: they go through the
    /// scroll filter and arrive via [`TraceRecord::from_scroll`].
    pub fn from_raw(event: &RawEvent) -> Option<Self> {
        let payload = match &event.payload {
            EventPayload::Keyboard { token } => TracePayload::Key {
                token: token.clone(),
                count: 1,
            },
            EventPayload::Mouse {
                button,
                x,
                y,
                click_count,
            } => TracePayload::Click {
                button: *button,
                x: *x,
                y: *y,
                count: (*click_count).max(1) as u32,
            },
            EventPayload::Scroll { .. } => return None,
        };

        Some(Self {
            timestamp: event.timestamp,
            device: event.device,
            app: event.app.clone(),
            payload,
        })
    }

    /// Persisted form of an aggregated scroll emission
    pub fn from_scroll(emission: &AggregatedScroll, app: Option<String>) -> Self {
        Self {
            timestamp: emission.ended_at,
            device: emission.device,
            app,
            payload: TracePayload::Scroll {
                dx: emission.dx,
                dy: emission.dy,
                distance: emission.distance,
                x: emission.x,
                y: emission.y,
                events: emission.events,
                window_ms: emission
                    .ended_at
                    .duration_since(emission.started_at)
                    .as_millis(),
                flush: emission.is_flush,
            },
        }
    }

    /// Persisted reference to a frame written by the worker pool
    pub fn frame_written(
        timestamp: Timestamp,
        display: DisplayId,
        sequence: u64,
        path: String,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            timestamp,
            device: display,
            app: None,
            payload: TracePayload::Frame {
                path,
                display,
                sequence,
                width,
                height,
            },
        }
    }

    /// The record kind
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Start of the time range this record covers (equal to `timestamp`
    /// for point events, window start for scroll emissions)
    pub fn started_at(&self) -> Timestamp {
        match &self.payload {
            TracePayload::Scroll { window_ms, .. } => Timestamp::from_ticks(
                self.timestamp
                    .ticks()
                    .saturating_sub(window_ms * 1_000_000),
            ),
            _ => self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_keyboard() {
        let event = RawEvent::keyboard(Timestamp::from_millis(10), 1, "a").with_app("Notes");
        let record = TraceRecord::from_raw(&event).expect("keyboard converts");
        assert_eq!(record.kind(), EventKind::Keyboard);
        assert_eq!(record.device, 1);
        assert_eq!(record.app.as_deref(), Some("Notes"));
        assert_eq!(
            record.payload,
            TracePayload::Key {
                token: "a".to_string(),
                count: 1
            }
        );
    }

    #[test]
    fn test_from_raw_mouse_click_count_floor() {
        let event = RawEvent::mouse(
            Timestamp::from_millis(10),
            0,
            MouseButton::Left,
            5.0,
            6.0,
            0,
        );
        let record = TraceRecord::from_raw(&event).unwrap();
        match record.payload {
            TracePayload::Click { count, .. } => assert_eq!(count, 1),
            _ => panic!("expected click payload"),
        }
    }

    #[test]
    fn test_from_raw_rejects_scroll() {
        let event = RawEvent::scroll(Timestamp::from_millis(10), 0, 1.0, 2.0, 0.0, 0.0);
        assert!(TraceRecord::from_raw(&event).is_none());
    }

    #[test]
    fn test_from_scroll_window() {
        let emission = AggregatedScroll {
            started_at: Timestamp::from_millis(100),
            ended_at: Timestamp::from_millis(600),
            device: 2,
            x: 10.0,
            y: 20.0,
            dx: 0.0,
            dy: 12.0,
            distance: 12.0,
            events: 8,
            is_flush: false,
        };

        let record = TraceRecord::from_scroll(&emission, Some("Safari".into()));
        assert_eq!(record.timestamp, Timestamp::from_millis(600));
        assert_eq!(record.started_at(), Timestamp::from_millis(100));
        match record.payload {
            TracePayload::Scroll {
                window_ms, events, ..
            } => {
                assert_eq!(window_ms, 500);
                assert_eq!(events, 8);
            }
            _ => panic!("expected scroll payload"),
        }
    }

    #[test]
    fn test_frame_written_record() {
        let record = TraceRecord::frame_written(
            Timestamp::from_millis(42),
            1,
            7,
            "frames/42_1_7.jpg".to_string(),
            1920,
            1080,
        );
        assert_eq!(record.kind(), EventKind::Frame);
        assert_eq!(record.device, 1);
        assert_eq!(record.started_at(), record.timestamp);
    }

    #[test]
    fn test_record_serialization_roundtrip() {
        let record = TraceRecord {
            timestamp: Timestamp::from_millis(99),
            device: 3,
            app: None,
            payload: TracePayload::Key {
                token: "enter".to_string(),
                count: 2,
            },
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: TraceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
        assert!(json.contains("\"kind\":\"key\""));
    }
}
