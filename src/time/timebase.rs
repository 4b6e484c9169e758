//! Monotonic Timebase
//!
//! Provides nanosecond-precision monotonic timestamps anchored at process
//! startup. Every sensor thread stamps events against the same anchor, so
//! timestamps are totally ordered across backends and never go backward.

use std::sync::OnceLock;
use std::time::Instant;

/// Global anchor instant, initialized once at startup
static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Monotonic timebase for the capture session
///
/// This struct provides:
/// - Nanosecond precision timestamps
/// - Monotonic guarantees (time never goes backward)
/// - Zero-overhead in hot path (raw ticks stored, one tick = one nanosecond)
#[derive(Debug, Clone, Copy)]
pub struct Timebase;

impl Timebase {
    /// Initialize the timebase. Call once at startup.
    /// Subsequent calls are no-ops; the first anchor wins.
    pub fn init() {
        ANCHOR.get_or_init(Instant::now);
    }

    /// Get current ticks (nanoseconds since the anchor).
    #[inline(always)]
    pub fn now_ticks() -> u64 {
        let anchor = ANCHOR.get().expect("Timebase::init() not called");
        anchor.elapsed().as_nanos() as u64
    }

    /// Get current time in nanoseconds since the anchor.
    #[inline]
    pub fn now_nanos() -> u64 {
        Self::now_ticks()
    }

    /// Get current time in microseconds since the anchor.
    #[inline]
    pub fn now_micros() -> u64 {
        Self::now_nanos() / 1_000
    }

    /// Get current time in milliseconds since the anchor.
    #[inline]
    pub fn now_millis() -> u64 {
        Self::now_nanos() / 1_000_000
    }

    /// Calculate elapsed time between two tick values in nanoseconds.
    /// Returns 0 if end < start.
    #[inline]
    pub fn elapsed_nanos(start_ticks: u64, end_ticks: u64) -> u64 {
        end_ticks.saturating_sub(start_ticks)
    }

    /// Calculate elapsed time in milliseconds.
    #[inline]
    pub fn elapsed_millis(start_ticks: u64, end_ticks: u64) -> u64 {
        Self::elapsed_nanos(start_ticks, end_ticks) / 1_000_000
    }

    /// Check if two tick values maintain monotonicity.
    /// Returns true if t2 >= t1.
    #[inline]
    pub fn is_monotonic(t1: u64, t2: u64) -> bool {
        t2 >= t1
    }
}

/// A timestamp wrapper storing raw ticks (nanoseconds since the anchor).
/// Conversion to coarser units is deferred until needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp from raw ticks.
    #[inline]
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Create a timestamp from milliseconds since the anchor.
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Capture current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self(Timebase::now_ticks())
    }

    /// Get the raw tick value.
    #[inline]
    pub const fn ticks(&self) -> u64 {
        self.0
    }

    /// Convert to nanoseconds.
    #[inline]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Convert to microseconds.
    #[inline]
    pub const fn as_micros(&self) -> u64 {
        self.0 / 1_000
    }

    /// Convert to milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Convert to seconds as f64.
    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Calculate duration since another timestamp (saturating).
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_ticks(self.0.saturating_sub(earlier.0))
    }

    /// Advance this timestamp by a duration (saturating).
    #[inline]
    pub fn advanced_by(&self, delta: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(delta.ticks()))
    }

    /// Check if this timestamp is after another.
    #[inline]
    pub fn is_after(&self, other: Timestamp) -> bool {
        self.0 > other.0
    }
}

impl serde::Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Serialize as raw ticks for maximum precision
        serializer.serialize_u64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let ticks = u64::deserialize(deserializer)?;
        Ok(Timestamp(ticks))
    }
}

/// A duration wrapper using raw ticks (nanoseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    /// Create a duration from raw ticks.
    #[inline]
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Create a duration from nanoseconds.
    #[inline]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create a duration from microseconds.
    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }

    /// Create a duration from milliseconds.
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Create a duration from seconds as f64, saturating at zero.
    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs.max(0.0) * 1_000_000_000.0) as u64)
    }

    /// Get raw tick count.
    #[inline]
    pub const fn ticks(&self) -> u64 {
        self.0
    }

    /// Convert to nanoseconds.
    #[inline]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Convert to microseconds.
    #[inline]
    pub const fn as_micros(&self) -> u64 {
        self.0 / 1_000
    }

    /// Convert to milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Convert to seconds as f64.
    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Zero duration.
    pub const ZERO: Duration = Duration(0);
}

impl std::ops::Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Self) -> Self::Output {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration(self.0.saturating_sub(rhs.0))
    }
}
