//! Scroll Filter
//!
//! Suppresses excessive scroll-event volume while preserving perceptible
//! scroll intent. Raw scroll ticks arrive at trackpad rates (hundreds per
//! second); the filter folds them into aggregated emissions.
//!
//! State machine: {Idle, Accumulating}. The first scroll event opens a
//! [`ScrollSession`]; subsequent events within the session timeout add
//! distance and may trigger an aggregated emission; a quiet period of
//! `session_timeout` flushes the remainder and destroys the session.
//!
//! Every transition runs in O(1) on the event-delivery path. No I/O.

use super::types::{DeviceId, EventPayload, RawEvent};
use crate::time::{Duration, Timestamp};
use tracing::trace;

/// Scroll filter thresholds.
///
/// Defaults match the recognized configuration surface: 0.5 s debounce,
/// 5.0 px minimum distance, 10 emissions/s ceiling, 2.0 s session timeout.
#[derive(Debug, Clone)]
pub struct ScrollFilterConfig {
    /// Minimum time between aggregated emissions
    pub debounce: Duration,
    /// Minimum accumulated distance before an emission
    pub min_distance: f64,
    /// Maximum emissions per second
    pub max_frequency: u32,
    /// Quiet period after which the session is flushed
    pub session_timeout: Duration,
}

impl Default for ScrollFilterConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            min_distance: 5.0,
            max_frequency: 10,
            session_timeout: Duration::from_millis(2000),
        }
    }
}

impl ScrollFilterConfig {
    /// Minimum interval between emissions implied by `max_frequency`
    fn min_emit_interval(&self) -> Duration {
        if self.max_frequency == 0 {
            return Duration::from_millis(u64::MAX / 1_000_000);
        }
        Duration::from_nanos(1_000_000_000 / self.max_frequency as u64)
    }
}

/// Transient accumulator of unemitted scroll distance.
///
/// Owned solely by the filter; lives from the first scroll event until the
/// session timeout elapses with no further events, then is flushed and
/// destroyed.
#[derive(Debug, Clone)]
pub struct ScrollSession {
    /// When the session opened
    pub started_at: Timestamp,
    /// Timestamp of the most recent event
    pub last_event_at: Timestamp,
    /// Timestamp of the most recent emission, if any
    pub last_emit_at: Option<Timestamp>,
    /// Start of the current (unemitted) aggregation window
    window_started_at: Timestamp,
    /// Unemitted per-axis deltas
    pending_dx: f64,
    pending_dy: f64,
    /// Unemitted cumulative distance
    pending_distance: f64,
    /// Events absorbed since the last emission
    pending_events: u32,
    /// Total events in the session
    pub event_count: u32,
    /// Emissions produced by the session
    pub emit_count: u32,
    /// Most recent cursor position
    position: (f64, f64),
    /// Device the session belongs to
    device: DeviceId,
}

impl ScrollSession {
    fn open(event: &RawEvent, dx: f64, dy: f64, x: f64, y: f64) -> Self {
        let magnitude = (dx * dx + dy * dy).sqrt();
        Self {
            started_at: event.timestamp,
            last_event_at: event.timestamp,
            last_emit_at: None,
            window_started_at: event.timestamp,
            pending_dx: dx,
            pending_dy: dy,
            pending_distance: magnitude,
            pending_events: 1,
            event_count: 1,
            emit_count: 0,
            position: (x, y),
            device: event.device,
        }
    }

    fn absorb(&mut self, event: &RawEvent, dx: f64, dy: f64, x: f64, y: f64) {
        self.last_event_at = event.timestamp;
        self.pending_dx += dx;
        self.pending_dy += dy;
        self.pending_distance += (dx * dx + dy * dy).sqrt();
        self.pending_events += 1;
        self.event_count += 1;
        self.position = (x, y);
    }

    /// Elapsed time since the last emission, measured from the session
    /// start when nothing has been emitted yet.
    fn since_last_emit(&self, now: Timestamp) -> Duration {
        now.duration_since(self.last_emit_at.unwrap_or(self.started_at))
    }

    fn take_emission(&mut self, now: Timestamp, is_flush: bool) -> AggregatedScroll {
        let emission = AggregatedScroll {
            started_at: self.window_started_at,
            ended_at: now,
            device: self.device,
            x: self.position.0,
            y: self.position.1,
            dx: self.pending_dx,
            dy: self.pending_dy,
            distance: self.pending_distance,
            events: self.pending_events,
            is_flush,
        };
        self.pending_dx = 0.0;
        self.pending_dy = 0.0;
        self.pending_distance = 0.0;
        self.pending_events = 0;
        self.window_started_at = now;
        self.last_emit_at = Some(now);
        self.emit_count += 1;
        emission
    }
}

/// An aggregated scroll emission covering one accumulation window
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedScroll {
    /// Start of the aggregation window
    pub started_at: Timestamp,
    /// End of the aggregation window
    pub ended_at: Timestamp,
    /// Source device
    pub device: DeviceId,
    /// Cursor position at the last absorbed event
    pub x: f64,
    pub y: f64,
    /// Summed per-axis deltas
    pub dx: f64,
    pub dy: f64,
    /// Summed per-event distance
    pub distance: f64,
    /// Number of raw events folded in
    pub events: u32,
    /// True when this emission closed the session (timeout or shutdown)
    pub is_flush: bool,
}

/// Counters describing filter behaviour over a session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScrollFilterStats {
    /// Raw scroll events offered
    pub received: u64,
    /// Aggregated emissions produced
    pub emitted: u64,
    /// Events absorbed without an immediate emission
    pub absorbed: u64,
    /// Sessions opened
    pub sessions_opened: u64,
    /// Sessions closed by flush
    pub sessions_flushed: u64,
}

/// Stateful scroll debouncer.
///
/// Owned by the trace collector and driven inline on its thread: `offer`
/// for each raw scroll event, `poll` on the collector cadence to observe
/// session timeouts, `flush` once at shutdown.
#[derive(Debug)]
pub struct ScrollFilter {
    config: ScrollFilterConfig,
    session: Option<ScrollSession>,
    stats: ScrollFilterStats,
}

impl ScrollFilter {
    /// Create a filter with the given thresholds
    pub fn new(config: ScrollFilterConfig) -> Self {
        Self {
            config,
            session: None,
            stats: ScrollFilterStats::default(),
        }
    }

    /// Offer a raw scroll event to the filter.
    ///
    /// Non-scroll events are ignored. Returns an aggregated emission when
    /// the debounce, distance, and frequency thresholds all allow one; a
    /// stale session (event arriving past the timeout) is flushed first and
    /// its final emission returned, with the new event opening a fresh
    /// session.
    pub fn offer(&mut self, event: &RawEvent) -> Option<AggregatedScroll> {
        let (dx, dy, x, y) = match event.payload {
            EventPayload::Scroll { dx, dy, x, y } => (dx, dy, x, y),
            _ => return None,
        };
        self.stats.received += 1;
        let now = event.timestamp;

        // A session the poll loop has not yet reaped: flush it, then open a
        // fresh one for this event.
        let stale = self
            .session
            .as_ref()
            .map(|s| now.duration_since(s.last_event_at) > self.config.session_timeout)
            .unwrap_or(false);
        let stale_flush = if stale { self.close_session(now) } else { None };

        match self.session.as_mut() {
            None => {
                self.session = Some(ScrollSession::open(event, dx, dy, x, y));
                self.stats.sessions_opened += 1;
                self.stats.absorbed += 1;
                stale_flush
            }
            Some(session) => {
                session.absorb(event, dx, dy, x, y);

                let debounced = session.since_last_emit(now) >= self.config.debounce;
                let far_enough = session.pending_distance >= self.config.min_distance;
                let under_rate = match session.last_emit_at {
                    Some(last) => {
                        now.duration_since(last) >= self.config.min_emit_interval()
                    }
                    None => true,
                };

                if debounced && far_enough && under_rate {
                    self.stats.emitted += 1;
                    Some(session.take_emission(now, false))
                } else {
                    trace!(
                        pending_px = session.pending_distance,
                        events = session.pending_events,
                        "scroll absorbed"
                    );
                    self.stats.absorbed += 1;
                    stale_flush
                }
            }
        }
    }

    /// Observe the passage of time: flush the session if it has been quiet
    /// for longer than the session timeout.
    pub fn poll(&mut self, now: Timestamp) -> Option<AggregatedScroll> {
        let expired = self
            .session
            .as_ref()
            .map(|s| now.duration_since(s.last_event_at) > self.config.session_timeout)
            .unwrap_or(false);
        if expired {
            self.close_session(now)
        } else {
            None
        }
    }

    /// Shutdown flush: close any open session regardless of elapsed time.
    pub fn flush(&mut self, now: Timestamp) -> Option<AggregatedScroll> {
        if self.session.is_some() {
            self.close_session(now)
        } else {
            None
        }
    }

    /// Whether a session is currently accumulating
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Filter counters
    pub fn stats(&self) -> ScrollFilterStats {
        self.stats
    }

    /// Close the open session, emitting the remainder if any events are
    /// still unemitted. The session is destroyed either way, so a flush can
    /// happen at most once per session.
    fn close_session(&mut self, now: Timestamp) -> Option<AggregatedScroll> {
        let mut session = self.session.take()?;
        self.stats.sessions_flushed += 1;
        if session.pending_events > 0 {
            self.stats.emitted += 1;
            Some(session.take_emission(now, true))
        } else {
            None
        }
    }
}

impl Default for ScrollFilter {
    fn default() -> Self {
        Self::new(ScrollFilterConfig::default())
    }
}
