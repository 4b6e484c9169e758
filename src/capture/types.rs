//! Core types for event capture
//!
//! Defines the fundamental data structures used throughout the capture
//! pipeline.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Identifier for the display a frame or pointer event originated from.
pub type DisplayId = u32;

/// Identifier for the input device (or display) that produced an event.
///
/// Keyboard and pointer backends report a stable per-device id; frame
/// records carry the display id of the grabbed screen.
pub type DeviceId = u32;

/// Kinds of events flowing through the capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A keyboard key press (delivered as a key token)
    Keyboard,
    /// A mouse button press
    Mouse,
    /// A scroll wheel / trackpad scroll tick
    Scroll,
    /// A written screen frame reference
    Frame,
}

/// Mouse buttons recognized by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Payload of a raw input event, tagged by kind.
///
/// Frames do not travel as raw events: they move from the capture scheduler
/// to the worker pool as owned buffers and only enter the trace as written
/// frame references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A key press, delivered as a printable token ("a", "enter", "cmd+s")
    Keyboard { token: String },
    /// A mouse button press at screen coordinates
    Mouse {
        button: MouseButton,
        x: f64,
        y: f64,
        click_count: u8,
    },
    /// A single scroll tick with per-axis deltas at screen coordinates
    Scroll { dx: f64, dy: f64, x: f64, y: f64 },
}

impl EventPayload {
    /// The event kind this payload belongs to
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Keyboard { .. } => EventKind::Keyboard,
            EventPayload::Mouse { .. } => EventKind::Mouse,
            EventPayload::Scroll { .. } => EventKind::Scroll,
        }
    }

    /// Scroll magnitude (Euclidean norm of the deltas), 0 for other kinds
    pub fn scroll_magnitude(&self) -> f64 {
        match self {
            EventPayload::Scroll { dx, dy, .. } => (dx * dx + dy * dy).sqrt(),
            _ => 0.0,
        }
    }
}

/// Raw event as delivered by a capture backend.
///
/// Immutable once created. Within a single backend stream, timestamps are
/// non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Monotonic timestamp (timebase ticks)
    pub timestamp: Timestamp,
    /// Device or display that produced the event
    pub device: DeviceId,
    /// Frontmost application context, when the backend can resolve it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Event payload
    pub payload: EventPayload,
}

impl RawEvent {
    /// Create a keyboard event
    pub fn keyboard(timestamp: Timestamp, device: DeviceId, token: impl Into<String>) -> Self {
        Self {
            timestamp,
            device,
            app: None,
            payload: EventPayload::Keyboard {
                token: token.into(),
            },
        }
    }

    /// Create a mouse press event
    pub fn mouse(
        timestamp: Timestamp,
        device: DeviceId,
        button: MouseButton,
        x: f64,
        y: f64,
        click_count: u8,
    ) -> Self {
        Self {
            timestamp,
            device,
            app: None,
            payload: EventPayload::Mouse {
                button,
                x,
                y,
                click_count,
            },
        }
    }

    /// Create a scroll event
    pub fn scroll(
        timestamp: Timestamp,
        device: DeviceId,
        dx: f64,
        dy: f64,
        x: f64,
        y: f64,
    ) -> Self {
        Self {
            timestamp,
            device,
            app: None,
            payload: EventPayload::Scroll { dx, dy, x, y },
        }
    }

    /// Attach an application context
    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    /// The event kind
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Check if this is a keyboard event
    pub fn is_keyboard(&self) -> bool {
        self.kind() == EventKind::Keyboard
    }

    /// Check if this is a mouse press event
    pub fn is_mouse(&self) -> bool {
        self.kind() == EventKind::Mouse
    }

    /// Check if this is a scroll event
    pub fn is_scroll(&self) -> bool {
        self.kind() == EventKind::Scroll
    }
}

/// An event paired with its channel sequence number.
///
/// Sequence numbers are assigned by the producing sink and allow ordering
/// verification across a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedEvent {
    /// Position in the producing channel's stream
    pub sequence: u64,
    /// The raw event
    pub event: RawEvent,
}
